use std::borrow::Cow;

/// Outcome of an admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Cow<'static, str>,
}

impl Decision {
    pub fn allow(reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Maps a kernel-type tag to an allow/deny decision.
///
/// Called from every handler thread concurrently.
pub trait DecisionPolicy: Send + Sync {
    fn decide(&self, kernel_type: &str) -> Decision;
}

/// Admits everything with reason `OK`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl DecisionPolicy for AllowAll {
    fn decide(&self, _kernel_type: &str) -> Decision {
        Decision::allow("OK")
    }
}

impl<F> DecisionPolicy for F
where
    F: Fn(&str) -> Decision + Send + Sync,
{
    fn decide(&self, kernel_type: &str) -> Decision {
        self(kernel_type)
    }
}
