// Segment naming. Names are scoped by an OS-user suffix so concurrent users on
// one host never share a registry or a channel.

use std::env;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use sha2::{Digest, Sha256};

use super::config::CHANNEL_NAME_LEN;
use super::error::IpcError;

const REGISTRY_BASE: &str = "/kernel_scheduler_registry";

lazy_static! {
    static ref DEFAULT_USER: String = user_from_env();
}

fn user_from_env() -> String {
    ["KSCHED_USER", "USER"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .map(|u| sanitize(&u))
        .find(|u| !u.is_empty())
        .unwrap_or_else(|| "nouser".to_owned())
}

fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

/// Client runtime kinds. Each gets its own channel-name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientType {
    #[default]
    PyTorch,
    SGLang,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::PyTorch => "pytorch",
            ClientType::SGLang => "sglang",
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            ClientType::PyTorch => "/ks_pytorch_",
            ClientType::SGLang => "/ks_sglang_",
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientType {
    type Err = IpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pytorch" => Ok(ClientType::PyTorch),
            "sglang" => Ok(ClientType::SGLang),
            other => Err(IpcError::UnknownClientType(other.to_owned())),
        }
    }
}

/// Produces registry and channel segment names for one user scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    user: String,
}

impl Naming {
    /// Scope for an explicit user (sanitized to file-name-safe characters).
    pub fn new(user: &str) -> Self {
        let user = sanitize(user);
        Self {
            user: if user.is_empty() { "nouser".to_owned() } else { user },
        }
    }

    /// Scope of the calling OS user: `KSCHED_USER`, else `USER`, else `nouser`.
    pub fn from_env() -> Self {
        Self {
            user: DEFAULT_USER.clone(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// `/kernel_scheduler_registry_<user>`
    pub fn registry_name(&self) -> String {
        format!("{REGISTRY_BASE}_{}", self.user)
    }

    /// `/ks_<type>_<user>_<id>`, where `id` is `unique_id` if non-empty, else the pid.
    ///
    /// Names that would not fit the registry's channel-name field are shortened
    /// to the prefix plus a SHA-256 digest of the full name, so they stay unique.
    pub fn channel_name(&self, client_type: ClientType, pid: i64, unique_id: &str) -> String {
        let id = if unique_id.is_empty() {
            pid.to_string()
        } else {
            sanitize(unique_id)
        };
        let full = format!("{}{}_{}", client_type.prefix(), self.user, id);
        if full.len() < CHANNEL_NAME_LEN {
            return full;
        }
        let digest = format!("{:x}", Sha256::digest(full.as_bytes()));
        let mut short = String::with_capacity(CHANNEL_NAME_LEN);
        short.push_str(client_type.prefix());
        let budget = CHANNEL_NAME_LEN - 1 - short.len();
        short.push_str(&digest[..budget.min(digest.len())]);
        short
    }
}

impl Default for Naming {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_name_carries_user_suffix() {
        let naming = Naming::new("alice");
        assert_eq!(naming.registry_name(), "/kernel_scheduler_registry_alice");
    }

    #[test]
    fn channel_name_prefers_unique_id() {
        let naming = Naming::new("alice");
        assert_eq!(
            naming.channel_name(ClientType::PyTorch, 4242, "abc"),
            "/ks_pytorch_alice_abc"
        );
        assert_eq!(
            naming.channel_name(ClientType::SGLang, 4242, ""),
            "/ks_sglang_alice_4242"
        );
    }

    #[test]
    fn user_is_sanitized() {
        let naming = Naming::new("dom/ain user");
        assert_eq!(naming.user(), "dom_ain_user");
        assert_eq!(Naming::new("  ").user(), "nouser");
    }

    #[test]
    fn long_channel_names_are_hashed_to_fit() {
        let naming = Naming::new("alice");
        let long_id = "x".repeat(120);
        let a = naming.channel_name(ClientType::PyTorch, 1, &long_id);
        let b = naming.channel_name(ClientType::PyTorch, 1, &"y".repeat(120));
        assert!(a.len() < CHANNEL_NAME_LEN);
        assert!(a.starts_with("/ks_pytorch_"));
        assert_ne!(a, b);
        assert_eq!(a, naming.channel_name(ClientType::PyTorch, 1, &long_id));
    }

    #[test]
    fn client_type_parses() {
        assert_eq!("PyTorch".parse::<ClientType>().unwrap(), ClientType::PyTorch);
        assert_eq!("sglang".parse::<ClientType>().unwrap(), ClientType::SGLang);
        assert!(matches!(
            "jax".parse::<ClientType>(),
            Err(IpcError::UnknownClientType(t)) if t == "jax"
        ));
    }
}
