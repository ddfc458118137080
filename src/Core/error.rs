use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the transport, registry, scheduler and client layers.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The backing segment could not be created (fatal at startup for the owner).
    #[error("failed to create shared memory segment '{name}': {source}")]
    Create {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The backing segment does not exist or could not be mapped.
    #[error("failed to open shared memory segment '{name}': {source}")]
    Open {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The segment exists but is smaller than the record it should hold.
    #[error("shared memory segment '{name}' too small: expected at least {expected} bytes, got {actual}")]
    TooSmall {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// The segment exists but its creator has not finished initializing it.
    #[error("shared memory segment '{name}' is not initialized (magic 0x{found:016X})")]
    NotInitialized { name: String, found: u64 },

    /// Every registry slot is claimed.
    #[error("client registry is full ({capacity} slots)")]
    RegistryFull { capacity: usize },

    /// A slot index outside the registry table.
    #[error("registry slot {slot} out of range (capacity {capacity})")]
    InvalidSlot { slot: usize, capacity: usize },

    /// The registry exists but no scheduler has marked it ready.
    #[error("scheduler is not ready")]
    SchedulerNotReady,

    /// `on_new_client` was called after `stop`.
    #[error("scheduler has been stopped")]
    SchedulerStopped,

    /// A bounded wait elapsed.
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: &'static str, after: Duration },

    /// A frame that does not follow the wire format.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Client type string not known to the naming scheme.
    #[error("unknown client type '{0}'")]
    UnknownClientType(String),

    /// The registry slot was reaped and may now belong to another client.
    #[error("registry slot {slot} no longer holds this client")]
    SlotReclaimed { slot: usize },

    /// The connection was already closed by `disconnect`.
    #[error("client connection is closed")]
    Disconnected,

    /// A handler or listener thread could not be spawned.
    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, IpcError>;
