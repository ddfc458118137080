use std::fmt;
use std::mem::size_of;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::atomic::fence;
use std::time::Duration;

use crossbeam_utils::Backoff;
use log::{debug, info};

use super::client_info::ClientInfo;
use super::layout::{RegistryData, RegistryEntryData, REGISTRY_MAGIC};
use crate::Core::config::MAX_CLIENTS;
use crate::Core::error::{IpcError, Result};
use crate::Core::process::{monotonic_millis, process_alive};
use crate::Core::SharedMemoryBackend;
use crate::Transport::Registry;

/// Give up on a snapshot after this many torn reads.
const SNAPSHOT_RETRIES: usize = 1 << 16;

/// Registry record living in a mapped (or heap) segment.
///
/// Slot claims are lock-free (CAS on `active`). Each entry is then filled
/// under a per-entry sequence lock so that readers in other processes only
/// ever observe complete entries.
pub struct SharedRegistry {
    name: String,
    memory: Box<dyn SharedMemoryBackend>,
}

impl SharedRegistry {
    /// Initialize a fresh registry record in `memory`.
    pub fn create(name: &str, memory: Box<dyn SharedMemoryBackend>) -> Result<Self> {
        let registry = Self::view(name, memory)?;
        let data = registry.data();
        data.magic.store(0, Relaxed);
        data.server_ready.store(false, Relaxed);
        data.version.store(0, Relaxed);
        for entry in data.entries.iter() {
            entry.active.store(false, Relaxed);
            entry.published.store(false, Relaxed);
            entry.generation.store(0, Relaxed);
            entry.client_pid.store(0, Relaxed);
            entry.last_heartbeat.store(0, Relaxed);
            entry.channel_name.clear();
            entry.client_type.clear();
            entry.unique_id.clear();
        }
        data.magic.store(REGISTRY_MAGIC, Release);
        debug!("registry {} created ({} slots)", name, MAX_CLIENTS);
        Ok(registry)
    }

    /// Open a registry record that a creator already initialized.
    pub fn attach(name: &str, memory: Box<dyn SharedMemoryBackend>) -> Result<Self> {
        let registry = Self::view(name, memory)?;
        let found = registry.data().magic.load(Acquire);
        if found != REGISTRY_MAGIC {
            return Err(IpcError::NotInitialized {
                name: name.to_owned(),
                found,
            });
        }
        Ok(registry)
    }

    fn view(name: &str, memory: Box<dyn SharedMemoryBackend>) -> Result<Self> {
        let expected = size_of::<RegistryData>();
        if memory.size() < expected {
            return Err(IpcError::TooSmall {
                name: name.to_owned(),
                expected,
                actual: memory.size(),
            });
        }
        Ok(Self {
            name: name.to_owned(),
            memory,
        })
    }

    #[inline]
    fn data(&self) -> &RegistryData {
        unsafe { &*(self.memory.as_ptr() as *const RegistryData) }
    }

    fn entry(&self, slot: usize) -> Option<&RegistryEntryData> {
        self.data().entries.get(slot)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn memory(&self) -> &dyn SharedMemoryBackend {
        &*self.memory
    }

    /// Enter the entry's write section. Returns the (even) generation the
    /// entry had before the lock was taken.
    fn lock(entry: &RegistryEntryData) -> u64 {
        let backoff = Backoff::new();
        loop {
            let generation = entry.generation.load(Relaxed);
            if generation & 1 == 0
                && entry
                    .generation
                    .compare_exchange_weak(generation, generation + 1, Acquire, Relaxed)
                    .is_ok()
            {
                // Field stores below must not become visible before the odd
                // generation does.
                fence(Release);
                return generation;
            }
            backoff.snooze();
        }
    }

    fn unlock(entry: &RegistryEntryData) {
        entry.generation.fetch_add(1, Release);
    }

    fn bump_version(&self) {
        self.data().version.fetch_add(1, Release);
    }

    fn snapshot(&self, slot: usize) -> Option<ClientInfo> {
        let entry = self.entry(slot)?;
        let backoff = Backoff::new();
        for _ in 0..SNAPSHOT_RETRIES {
            let before = entry.generation.load(Acquire);
            if before & 1 == 1 {
                backoff.snooze();
                continue;
            }

            let info = if entry.active.load(Relaxed) && entry.published.load(Relaxed) {
                Some(ClientInfo {
                    slot,
                    channel_name: entry.channel_name.load_string(),
                    client_type: entry.client_type.load_string(),
                    unique_id: entry.unique_id.load_string(),
                    pid: entry.client_pid.load(Relaxed),
                    last_heartbeat: entry.last_heartbeat.load(Relaxed),
                    generation: before,
                })
            } else {
                None
            };

            fence(Acquire);
            if entry.generation.load(Relaxed) == before {
                return info;
            }
            backoff.snooze();
        }
        debug!("registry {} slot {} kept changing, skipped", self.name, slot);
        None
    }

    /// Release `slot` only if it is still the entry observed at `generation`.
    fn release_if(&self, slot: usize, generation: u64) -> bool {
        let Some(entry) = self.entry(slot) else {
            return false;
        };
        let before = Self::lock(entry);
        let release = before == generation
            && entry.active.load(Relaxed)
            && entry.published.load(Relaxed);
        if release {
            entry.published.store(false, Relaxed);
            entry.active.store(false, Release);
        }
        Self::unlock(entry);
        if release {
            self.bump_version();
        }
        release
    }
}

impl Registry for SharedRegistry {
    fn is_server_ready(&self) -> bool {
        self.data().server_ready.load(Acquire)
    }

    fn set_server_ready(&self, ready: bool) {
        self.data().server_ready.store(ready, Release);
    }

    fn register_client(
        &self,
        channel_name: &str,
        client_type: &str,
        unique_id: &str,
        pid: i64,
    ) -> Result<usize> {
        for (slot, entry) in self.data().entries.iter().enumerate() {
            if entry
                .active
                .compare_exchange(false, true, AcqRel, Relaxed)
                .is_err()
            {
                continue;
            }

            Self::lock(entry);
            entry.channel_name.store_str(channel_name);
            entry.client_type.store_str(client_type);
            entry.unique_id.store_str(unique_id);
            entry.client_pid.store(pid, Relaxed);
            entry.last_heartbeat.store(monotonic_millis(), Relaxed);
            entry.published.store(true, Relaxed);
            Self::unlock(entry);

            self.bump_version();
            debug!(
                "registry {}: slot {} -> {} ({}, pid {})",
                self.name, slot, channel_name, client_type, pid
            );
            return Ok(slot);
        }
        Err(IpcError::RegistryFull {
            capacity: MAX_CLIENTS,
        })
    }

    fn unregister_client(&self, slot: usize) {
        let Some(entry) = self.entry(slot) else {
            return;
        };
        Self::lock(entry);
        // A claimed but unpublished slot still belongs to its registrant.
        let release = entry.active.load(Relaxed) && entry.published.load(Relaxed);
        if release {
            entry.published.store(false, Relaxed);
            entry.active.store(false, Release);
        }
        Self::unlock(entry);
        if release {
            self.bump_version();
            debug!("registry {}: slot {} released", self.name, slot);
        }
    }

    fn update_heartbeat(&self, slot: usize) {
        let Some(entry) = self.entry(slot) else {
            return;
        };
        if !entry.active.load(Acquire) {
            return;
        }
        entry.last_heartbeat.store(monotonic_millis(), Release);
        self.bump_version();
    }

    fn refresh_heartbeat(&self, slot: usize, generation: u64) -> bool {
        let Some(entry) = self.entry(slot) else {
            return false;
        };
        if entry.generation.load(Acquire) != generation || !entry.active.load(Acquire) {
            return false;
        }
        entry.last_heartbeat.store(monotonic_millis(), Release);
        self.bump_version();
        true
    }

    fn release_registration(&self, slot: usize, generation: u64) -> bool {
        let released = self.release_if(slot, generation);
        if released {
            debug!("registry {}: slot {} released", self.name, slot);
        }
        released
    }

    fn client_info(&self, slot: usize) -> Option<ClientInfo> {
        self.snapshot(slot)
    }

    fn active_clients(&self) -> Vec<ClientInfo> {
        (0..MAX_CLIENTS).filter_map(|slot| self.snapshot(slot)).collect()
    }

    fn version(&self) -> u32 {
        self.data().version.load(Acquire)
    }

    fn capacity(&self) -> usize {
        MAX_CLIENTS
    }

    fn reap_stale(&self, heartbeat_timeout: Option<Duration>) -> Vec<ClientInfo> {
        let now = monotonic_millis();
        let mut reaped = Vec::new();
        for client in self.active_clients() {
            let dead = !process_alive(client.pid);
            let stale = heartbeat_timeout.map_or(false, |t| client.heartbeat_age(now) > t);
            if !(dead || stale) {
                continue;
            }
            if self.release_if(client.slot, client.generation) {
                info!(
                    "registry {}: reaped slot {} ({}, pid {}, {})",
                    self.name,
                    client.slot,
                    client.channel_name,
                    client.pid,
                    if dead { "process gone" } else { "heartbeat timed out" }
                );
                reaped.push(client);
            }
        }
        reaped
    }
}

impl fmt::Debug for SharedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_shared_registry(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Core::create_heap_memory;

    fn heap_registry() -> SharedRegistry {
        let memory = create_heap_memory(size_of::<RegistryData>()).unwrap();
        SharedRegistry::create("test-registry", Box::new(memory)).unwrap()
    }

    #[test]
    fn register_publishes_entry() {
        let registry = heap_registry();
        let v0 = registry.version();
        let slot = registry
            .register_client("/ks_pytorch_u_1", "pytorch", "abc", 1)
            .unwrap();
        assert_eq!(slot, 0);
        assert!(registry.version() > v0);

        let info = registry.client_info(slot).unwrap();
        assert_eq!(info.channel_name, "/ks_pytorch_u_1");
        assert_eq!(info.client_type, "pytorch");
        assert_eq!(info.unique_id, "abc");
        assert_eq!(info.pid, 1);
        assert_eq!(info.generation % 2, 0);
    }

    #[test]
    fn unregister_twice_is_noop() {
        let registry = heap_registry();
        let slot = registry.register_client("/c", "sglang", "", 1).unwrap();
        registry.unregister_client(slot);
        let v = registry.version();
        registry.unregister_client(slot);
        registry.unregister_client(MAX_CLIENTS + 3);
        assert_eq!(registry.version(), v);
        assert!(registry.client_info(slot).is_none());
    }

    #[test]
    fn released_slot_is_reused() {
        let registry = heap_registry();
        let a = registry.register_client("/a", "pytorch", "", 1).unwrap();
        let b = registry.register_client("/b", "pytorch", "", 1).unwrap();
        registry.unregister_client(a);
        let c = registry.register_client("/c", "pytorch", "", 1).unwrap();
        assert_eq!(c, a);
        assert_ne!(c, b);
    }

    #[test]
    fn stale_snapshot_does_not_release_new_owner() {
        let registry = heap_registry();
        let slot = registry.register_client("/old", "pytorch", "", 1).unwrap();
        let old = registry.client_info(slot).unwrap();
        registry.unregister_client(slot);
        registry.register_client("/new", "pytorch", "", 1).unwrap();

        assert!(!registry.release_if(slot, old.generation));
        assert_eq!(registry.client_info(slot).unwrap().channel_name, "/new");
    }

    #[test]
    fn attach_rejects_uninitialized_memory() {
        let memory = create_heap_memory(size_of::<RegistryData>()).unwrap();
        let err = SharedRegistry::attach("blank", Box::new(memory)).unwrap_err();
        assert!(matches!(err, IpcError::NotInitialized { found: 0, .. }));
    }
}
