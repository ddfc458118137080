// Module naming follows project convention (SPSC = Single-Producer Single-Consumer)
#![allow(non_snake_case)]

pub mod Core;
pub mod SPSC;

/// Two SPSC rings plus connection flags: one client session.
pub mod Channel;

/// Shared directory of connected clients.
pub mod Registry;

pub mod Transport;

pub mod Scheduler;

pub mod Client;

pub mod Debug {
    pub mod StructDebug;
}

pub mod ffi;

pub use Client::{ClientBuilder, ClientConnection};
pub use Core::{ClientType, IpcError, ListenerConfig, Naming, Result, SchedulerConfig, SpinPolicy};
pub use Scheduler::{AllowAll, Decision, DecisionPolicy, KernelStats, SchedulerBuilder};
pub use Transport::{LocalTransport, RegistryListener, ShmTransport, TransportFactory};
