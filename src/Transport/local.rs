// In-process transport. Segments are heap regions kept in a name table, so the
// same channel and registry code runs without touching /dev/shm.

use std::collections::HashMap;
use std::io;
use std::mem::size_of;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{Channel, Registry, Role, TransportFactory};
use crate::Channel::{ChannelData, MappedChannel};
use crate::Core::error::{IpcError, Result};
use crate::Core::naming::Naming;
use crate::Core::spin::SpinPolicy;
use crate::Core::{create_heap_memory, HeapMemory, RawHandle, SharedMemoryBackend};
use crate::Registry::{RegistryData, SharedRegistry};

type SegmentTable = Mutex<HashMap<String, Arc<HeapMemory>>>;

/// Process-local `TransportFactory`. Clones share one name table.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    naming: Naming,
    spin: SpinPolicy,
    segments: Arc<SegmentTable>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::with_naming(Naming::new("local"))
    }

    pub fn with_naming(naming: Naming) -> Self {
        Self {
            naming,
            spin: SpinPolicy::default(),
            segments: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_spin(mut self, spin: SpinPolicy) -> Self {
        self.spin = spin;
        self
    }

    /// Whether a segment with `name` is currently registered.
    pub fn contains(&self, name: &str) -> bool {
        self.segments.lock().contains_key(name)
    }

    /// Number of live segment names.
    pub fn segment_count(&self) -> usize {
        self.segments.lock().len()
    }

    fn create_segment(&self, name: &str, size: usize) -> Result<Box<dyn SharedMemoryBackend>> {
        let memory = Arc::new(create_heap_memory(size).map_err(|source| IpcError::Create {
            name: name.to_owned(),
            source,
        })?);
        self.segments
            .lock()
            .insert(name.to_owned(), Arc::clone(&memory));
        Ok(Box::new(LocalSegment {
            name: name.to_owned(),
            memory,
            table: Arc::downgrade(&self.segments),
        }))
    }

    fn attach_segment(&self, name: &str) -> Result<Box<dyn SharedMemoryBackend>> {
        let memory = self.segments.lock().get(name).cloned().ok_or_else(|| {
            IpcError::Open {
                name: name.to_owned(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such local segment"),
            }
        })?;
        Ok(Box::new(LocalSegment {
            name: name.to_owned(),
            memory,
            table: Arc::downgrade(&self.segments),
        }))
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for LocalTransport {
    fn open_channel(&self, name: &str, is_creator: bool, role: Role) -> Result<Box<dyn Channel>> {
        let channel = if is_creator {
            let memory = self.create_segment(name, size_of::<ChannelData>())?;
            MappedChannel::create(name, memory, role, self.spin)?
        } else {
            let memory = self.attach_segment(name)?;
            MappedChannel::attach(name, memory, role, self.spin)?
        };
        Ok(Box::new(channel))
    }

    fn create_registry(&self, is_creator: bool) -> Result<Box<dyn Registry>> {
        let name = self.naming.registry_name();
        let registry = if is_creator {
            let memory = self.create_segment(&name, size_of::<RegistryData>())?;
            SharedRegistry::create(&name, memory)?
        } else {
            let memory = self.attach_segment(&name)?;
            SharedRegistry::attach(&name, memory)?
        };
        Ok(Box::new(registry))
    }

    fn destroy_channel(&self, name: &str) -> Result<()> {
        self.segments.lock().remove(name);
        Ok(())
    }

    fn destroy_registry(&self) -> Result<()> {
        self.segments.lock().remove(&self.naming.registry_name());
        Ok(())
    }

    fn naming(&self) -> &Naming {
        &self.naming
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// One handle on a heap segment. The region lives while any handle does.
#[derive(Debug)]
struct LocalSegment {
    name: String,
    memory: Arc<HeapMemory>,
    table: Weak<SegmentTable>,
}

impl SharedMemoryBackend for LocalSegment {
    fn as_ptr(&self) -> *mut u8 {
        self.memory.as_ptr()
    }

    fn size(&self) -> usize {
        self.memory.size()
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Heap
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn unlink(&self) -> io::Result<()> {
        let Some(table) = self.table.upgrade() else {
            return Ok(());
        };
        let mut table = table.lock();
        // Only drop the name if it still refers to this region.
        if table
            .get(&self.name)
            .map_or(false, |current| Arc::ptr_eq(current, &self.memory))
        {
            table.remove(&self.name);
        }
        Ok(())
    }
}
