mod client_info;
pub mod layout;
mod registry;

pub use client_info::ClientInfo;
pub use layout::{AtomicBytes, RegistryData, RegistryEntryData, REGISTRY_MAGIC};
pub use registry::SharedRegistry;
