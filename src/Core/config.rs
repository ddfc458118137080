// Sizing constants shared by every participant of one deployment, plus the
// tunables of the scheduler and the registry listener.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

use super::spin::SpinPolicy;

/// Number of slots in each ring. One slot always stays empty.
pub const SPSC_QUEUE_SIZE: usize = 1024;

/// Bytes per ring slot (255 usable bytes plus the terminator).
pub const MAX_MSG_SIZE: usize = 256;

/// Cache line the shared records are aligned to.
pub const CACHE_LINE_SIZE: usize = 64;

/// Number of registry entries.
pub const MAX_CLIENTS: usize = 64;

/// Default timeout of blocking operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Receive timeout of the handler loop; bounds shutdown latency.
pub const RECEIVE_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Registry string field widths, terminator included.
pub const CHANNEL_NAME_LEN: usize = 64;
pub const CLIENT_TYPE_LEN: usize = 16;
pub const UNIQUE_ID_LEN: usize = 64;

/// Tunables of the per-client handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Timeout of each blocking receive.
    pub recv_timeout: Duration,
    /// Timeout of each response push.
    pub send_timeout: Duration,
    /// Check the client pid after this many consecutive idle receives (0 disables).
    pub liveness_check_every: u32,
    /// Wait step of the blocking ring operations.
    pub spin: SpinPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recv_timeout: RECEIVE_POLL_TIMEOUT,
            send_timeout: DEFAULT_TIMEOUT,
            liveness_check_every: 10,
            spin: SpinPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_liveness_check_every(mut self, idle_polls: u32) -> Self {
        self.liveness_check_every = idle_polls;
        self
    }

    pub fn with_spin(mut self, spin: SpinPolicy) -> Self {
        self.spin = spin;
        self
    }

    /// Defaults overridden by `KSCHED_RECV_TIMEOUT_MS`, `KSCHED_SEND_TIMEOUT_MS`
    /// and `KSCHED_SPIN`. Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_value::<u64>("KSCHED_RECV_TIMEOUT_MS") {
            config.recv_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_value::<u64>("KSCHED_SEND_TIMEOUT_MS") {
            config.send_timeout = Duration::from_millis(ms);
        }
        if let Some(spin) = env_value::<SpinPolicy>("KSCHED_SPIN") {
            config.spin = spin;
        }
        config
    }
}

/// Tunables of the registry listener.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    /// Sleep between two looks at the registry version.
    pub poll_interval: Duration,
    /// Interval between two stale-entry sweeps.
    pub reap_interval: Duration,
    /// Entries whose heartbeat is older than this are reaped. `None` only reaps dead pids.
    pub heartbeat_timeout: Option<Duration>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            reap_interval: Duration::from_secs(1),
            heartbeat_timeout: None,
        }
    }
}

impl ListenerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Defaults overridden by `KSCHED_POLL_INTERVAL_MS` and `KSCHED_HEARTBEAT_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_value::<u64>("KSCHED_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_value::<u64>("KSCHED_HEARTBEAT_TIMEOUT_MS") {
            config.heartbeat_timeout = Some(Duration::from_millis(ms));
        }
        config
    }
}

fn env_value<T>(key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("ignoring {key}={raw:?}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_defaults_match_reference_sizing() {
        let config = SchedulerConfig::default();
        assert_eq!(config.recv_timeout, Duration::from_millis(100));
        assert_eq!(config.send_timeout, Duration::from_millis(5000));
        assert_eq!(config.spin, SpinPolicy::Spin);
    }

    #[test]
    fn builders_override_fields() {
        let config = SchedulerConfig::new()
            .with_recv_timeout(Duration::from_millis(5))
            .with_send_timeout(Duration::from_millis(50))
            .with_liveness_check_every(0)
            .with_spin(SpinPolicy::Yield);
        assert_eq!(config.recv_timeout, Duration::from_millis(5));
        assert_eq!(config.send_timeout, Duration::from_millis(50));
        assert_eq!(config.liveness_check_every, 0);
        assert_eq!(config.spin, SpinPolicy::Yield);

        let listener = ListenerConfig::new()
            .with_poll_interval(Duration::from_millis(1))
            .with_heartbeat_timeout(Some(Duration::from_secs(3)));
        assert_eq!(listener.poll_interval, Duration::from_millis(1));
        assert_eq!(listener.heartbeat_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn env_value_ignores_garbage() {
        env::set_var("KSCHED_TEST_ENV_VALUE", "not-a-number");
        assert_eq!(env_value::<u64>("KSCHED_TEST_ENV_VALUE"), None);
        env::set_var("KSCHED_TEST_ENV_VALUE", "42");
        assert_eq!(env_value::<u64>("KSCHED_TEST_ENV_VALUE"), Some(42));
        env::remove_var("KSCHED_TEST_ENV_VALUE");
    }
}
