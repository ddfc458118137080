use std::mem::size_of;

use log::debug;

use super::{Channel, Registry, Role, TransportFactory};
use crate::Channel::{ChannelData, MappedChannel};
use crate::Core::error::{IpcError, Result};
use crate::Core::naming::Naming;
use crate::Core::spin::SpinPolicy;
use crate::Core::{
    attach_shared_memory, create_shared_memory, unlink_shared_memory, SharedMemoryBackend,
};
use crate::Registry::{RegistryData, SharedRegistry};

/// Transport over named POSIX shared-memory segments (`/dev/shm`).
#[derive(Debug, Clone)]
pub struct ShmTransport {
    naming: Naming,
    spin: SpinPolicy,
}

impl ShmTransport {
    pub fn new(naming: Naming) -> Self {
        Self {
            naming,
            spin: SpinPolicy::default(),
        }
    }

    /// Scoped to the calling OS user.
    pub fn from_env() -> Self {
        Self::new(Naming::from_env())
    }

    /// Wait step used by the rings of every channel this transport opens.
    pub fn with_spin(mut self, spin: SpinPolicy) -> Self {
        self.spin = spin;
        self
    }

    fn create_segment(name: &str, size: usize) -> Result<Box<dyn SharedMemoryBackend>> {
        // Stale segments are unlinked, not reused: old mappers keep the old inode.
        unlink_shared_memory(name).map_err(|source| IpcError::Create {
            name: name.to_owned(),
            source,
        })?;
        create_shared_memory(size, name).map_err(|source| IpcError::Create {
            name: name.to_owned(),
            source,
        })
    }

    fn attach_segment(name: &str) -> Result<Box<dyn SharedMemoryBackend>> {
        attach_shared_memory(name).map_err(|source| IpcError::Open {
            name: name.to_owned(),
            source,
        })
    }
}

impl Default for ShmTransport {
    fn default() -> Self {
        Self::from_env()
    }
}

impl TransportFactory for ShmTransport {
    fn open_channel(&self, name: &str, is_creator: bool, role: Role) -> Result<Box<dyn Channel>> {
        let channel = if is_creator {
            let memory = Self::create_segment(name, size_of::<ChannelData>())?;
            MappedChannel::create(name, memory, role, self.spin)?
        } else {
            let memory = Self::attach_segment(name)?;
            MappedChannel::attach(name, memory, role, self.spin)?
        };
        Ok(Box::new(channel))
    }

    fn create_registry(&self, is_creator: bool) -> Result<Box<dyn Registry>> {
        let name = self.naming.registry_name();
        let registry = if is_creator {
            let memory = Self::create_segment(&name, size_of::<RegistryData>())?;
            SharedRegistry::create(&name, memory)?
        } else {
            let memory = Self::attach_segment(&name)?;
            SharedRegistry::attach(&name, memory)?
        };
        Ok(Box::new(registry))
    }

    fn destroy_channel(&self, name: &str) -> Result<()> {
        debug!("destroying channel {}", name);
        Ok(unlink_shared_memory(name)?)
    }

    fn destroy_registry(&self) -> Result<()> {
        let name = self.naming.registry_name();
        debug!("destroying registry {}", name);
        Ok(unlink_shared_memory(&name)?)
    }

    fn naming(&self) -> &Naming {
        &self.naming
    }

    fn name(&self) -> &str {
        "shm"
    }
}
