// Wait step used between retries of the non-blocking ring operations.

use crossbeam_utils::Backoff;
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

/// How a blocking queue operation waits between two attempts.
///
/// The blocking variants never park the thread on an OS primitive; they retry
/// the non-blocking operation and run one wait step in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpinPolicy {
    /// CPU relax hint (`pause` on x86) between attempts.
    #[default]
    Spin,
    /// Exponential spin that degrades to yielding (crossbeam `Backoff::snooze`).
    Backoff,
    /// Yield the time slice between attempts.
    Yield,
    /// Sleep a fixed interval between attempts.
    Sleep(Duration),
}

impl SpinPolicy {
    /// Create the per-call wait state.
    pub fn waiter(&self) -> SpinWait {
        SpinWait {
            policy: *self,
            backoff: Backoff::new(),
        }
    }
}

/// Wait state for one blocking call.
pub struct SpinWait {
    policy: SpinPolicy,
    backoff: Backoff,
}

impl SpinWait {
    #[inline]
    pub fn wait(&mut self) {
        match self.policy {
            SpinPolicy::Spin => std::hint::spin_loop(),
            SpinPolicy::Backoff => self.backoff.snooze(),
            SpinPolicy::Yield => thread::yield_now(),
            SpinPolicy::Sleep(interval) => thread::sleep(interval),
        }
    }
}

impl fmt::Display for SpinPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpinPolicy::Spin => f.write_str("spin"),
            SpinPolicy::Backoff => f.write_str("backoff"),
            SpinPolicy::Yield => f.write_str("yield"),
            SpinPolicy::Sleep(d) => write!(f, "sleep:{}", d.as_micros()),
        }
    }
}

impl FromStr for SpinPolicy {
    type Err = String;

    /// Accepts `spin`, `backoff`, `yield` and `sleep:<micros>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "spin" => Ok(SpinPolicy::Spin),
            "backoff" => Ok(SpinPolicy::Backoff),
            "yield" => Ok(SpinPolicy::Yield),
            other => match other.strip_prefix("sleep:") {
                Some(micros) => micros
                    .parse::<u64>()
                    .map(|us| SpinPolicy::Sleep(Duration::from_micros(us)))
                    .map_err(|e| format!("invalid sleep interval '{micros}': {e}")),
                None => Err(format!("unknown spin policy '{other}'")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_policy() {
        assert_eq!("spin".parse::<SpinPolicy>(), Ok(SpinPolicy::Spin));
        assert_eq!("Backoff".parse::<SpinPolicy>(), Ok(SpinPolicy::Backoff));
        assert_eq!(" yield ".parse::<SpinPolicy>(), Ok(SpinPolicy::Yield));
        assert_eq!(
            "sleep:250".parse::<SpinPolicy>(),
            Ok(SpinPolicy::Sleep(Duration::from_micros(250)))
        );
        assert!("sleep:soon".parse::<SpinPolicy>().is_err());
        assert!("park".parse::<SpinPolicy>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for policy in [
            SpinPolicy::Spin,
            SpinPolicy::Backoff,
            SpinPolicy::Yield,
            SpinPolicy::Sleep(Duration::from_micros(10)),
        ] {
            assert_eq!(policy.to_string().parse::<SpinPolicy>(), Ok(policy));
        }
    }
}
