use std::time::Duration;

use crate::Core::error::Result;
use crate::Core::naming::ClientType;

/// Consistent snapshot of one published registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub slot: usize,
    pub channel_name: String,
    pub client_type: String,
    pub unique_id: String,
    pub pid: i64,
    /// Monotonic milliseconds of the last heartbeat.
    pub last_heartbeat: u64,
    /// Entry generation the snapshot was taken at.
    pub generation: u64,
}

impl ClientInfo {
    pub fn kind(&self) -> Result<ClientType> {
        self.client_type.parse()
    }

    /// Time since the last heartbeat, measured against `now_millis`.
    pub fn heartbeat_age(&self, now_millis: u64) -> Duration {
        Duration::from_millis(now_millis.saturating_sub(self.last_heartbeat))
    }
}
