// Server-side discovery: watch the registry and hand newly registered channels
// to the scheduler.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Release};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, info, warn};
use parking_lot::Mutex;

use super::{Channel, ClientIdentity, Registry, Role, TransportFactory};
use crate::Core::config::ListenerConfig;
use crate::Core::error::{IpcError, Result};

/// Owns the deployment's registry and polls it for new clients.
pub struct RegistryListener {
    transport: Arc<dyn TransportFactory>,
    config: ListenerConfig,
    registry: Option<Arc<dyn Registry>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RegistryListener {
    pub fn new(transport: Arc<dyn TransportFactory>) -> Self {
        Self::with_config(transport, ListenerConfig::default())
    }

    pub fn with_config(transport: Arc<dyn TransportFactory>, config: ListenerConfig) -> Self {
        Self {
            transport,
            config,
            registry: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Create the registry and mark it ready. Fails if the backing store cannot
    /// be created.
    pub fn init(&mut self) -> Result<()> {
        let registry: Arc<dyn Registry> = Arc::from(self.transport.create_registry(true)?);
        registry.set_server_ready(true);
        info!(
            "registry {} ready over {} transport",
            self.transport.naming().registry_name(),
            self.transport.name()
        );
        self.registry = Some(registry);
        Ok(())
    }

    /// Start the polling thread. Every newly published registry entry is opened
    /// as the scheduler end of its channel and passed to `on_client`.
    pub fn start<F>(&self, on_client: F) -> Result<()>
    where
        F: FnMut(Box<dyn Channel>) + Send + 'static,
    {
        let registry = self.registry.clone().ok_or(IpcError::SchedulerNotReady)?;
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!("registry listener already running");
            return Ok(());
        }

        self.running.store(true, Release);
        let poller = Poller {
            transport: Arc::clone(&self.transport),
            registry,
            config: self.config.clone(),
            running: Arc::clone(&self.running),
        };
        let handle = thread::Builder::new()
            .name("ksched-listener".to_owned())
            .spawn(move || poller.run(on_client))
            .map_err(|source| {
                self.running.store(false, Release);
                IpcError::Spawn {
                    name: "ksched-listener".to_owned(),
                    source,
                }
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stop polling, clear `server_ready` and remove the registry store.
    pub fn stop(&self) {
        self.running.store(false, Release);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("registry listener thread panicked");
            }
        }
        if let Some(registry) = &self.registry {
            if registry.is_server_ready() {
                registry.set_server_ready(false);
                if let Err(e) = self.transport.destroy_registry() {
                    warn!("failed to destroy registry: {}", e);
                }
                info!("registry listener stopped");
            }
        }
    }

    pub fn registry(&self) -> Option<Arc<dyn Registry>> {
        self.registry.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Acquire)
    }
}

impl Drop for RegistryListener {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Poller {
    transport: Arc<dyn TransportFactory>,
    registry: Arc<dyn Registry>,
    config: ListenerConfig,
    running: Arc<AtomicBool>,
}

impl Poller {
    fn run<F>(self, mut on_client: F)
    where
        F: FnMut(Box<dyn Channel>),
    {
        // slot -> generation of the entry already handed off
        let mut seen: HashMap<usize, u64> = HashMap::new();
        let mut failed: HashMap<usize, u64> = HashMap::new();
        let mut last_version = None;
        let mut last_reap = Instant::now();

        while self.running.load(Acquire) {
            if last_reap.elapsed() >= self.config.reap_interval {
                self.registry.reap_stale(self.config.heartbeat_timeout);
                last_reap = Instant::now();
            }

            let version = self.registry.version();
            if last_version != Some(version) {
                last_version = Some(version);
                let clients = self.registry.active_clients();
                seen.retain(|slot, generation| {
                    clients
                        .iter()
                        .any(|c| c.slot == *slot && c.generation == *generation)
                });

                for client in clients {
                    if seen.get(&client.slot) == Some(&client.generation) {
                        continue;
                    }
                    match self.transport.open_channel(&client.channel_name, false, Role::Server) {
                        Ok(mut channel) => {
                            channel.bind_identity(ClientIdentity::from(&client));
                            seen.insert(client.slot, client.generation);
                            failed.remove(&client.slot);
                            info!(
                                "client {} ({}, pid {}) discovered in slot {}",
                                client.channel_name, client.client_type, client.pid, client.slot
                            );
                            on_client(channel);
                        }
                        Err(e) => {
                            let repeated =
                                failed.insert(client.slot, client.generation) == Some(client.generation);
                            if !repeated {
                                warn!("cannot open channel {}: {}", client.channel_name, e);
                            } else {
                                debug!("still cannot open channel {}: {}", client.channel_name, e);
                            }
                            // Retry on the next poll even if nothing else changes.
                            last_version = None;
                        }
                    }
                }
            }

            thread::sleep(self.config.poll_interval);
        }
        debug!("registry poller exiting");
    }
}
