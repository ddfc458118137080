pub mod SharedMemory;
pub mod config;
pub mod error;
pub mod naming;
pub mod process;
pub mod spin;
pub mod watchdog;

pub use SharedMemory::{
    attach_shared_memory, create_heap_memory, create_shared_memory, unlink_shared_memory,
    HeapMemory, RawHandle, SharedMemoryBackend,
};
pub use config::{ListenerConfig, SchedulerConfig};
pub use error::{IpcError, Result};
pub use naming::{ClientType, Naming};
pub use spin::SpinPolicy;
