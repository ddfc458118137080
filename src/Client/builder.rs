use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use super::connection::ClientConnection;
use crate::Core::config::DEFAULT_TIMEOUT;
use crate::Core::error::{IpcError, Result};
use crate::Core::naming::ClientType;
use crate::Core::process::current_pid;
use crate::Transport::{Registry, TransportFactory};

const CONNECT_POLL: Duration = Duration::from_millis(1);

pub struct ClientBuilder {
    client_type: ClientType,
    unique_id: String,
    pid: i64,
    connect_timeout: Duration,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            client_type: ClientType::default(),
            unique_id: String::new(),
            pid: current_pid(),
            connect_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_type(mut self, client_type: ClientType) -> Self {
        self.client_type = client_type;
        self
    }

    /// Used in the channel name instead of the pid when non-empty.
    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = unique_id.into();
        self
    }

    /// Pid recorded in the registry. Defaults to the calling process.
    pub fn with_pid(mut self, pid: i64) -> Self {
        self.pid = pid;
        self
    }

    /// Bound on each wait of the handshake.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Open the registry, create and register a channel, and wait until the
    /// scheduler has taken it over.
    pub fn connect(self, transport: &dyn TransportFactory) -> Result<ClientConnection> {
        let registry = self.open_registry(transport)?;
        if !wait_until(self.connect_timeout, || registry.is_server_ready()) {
            return Err(IpcError::SchedulerNotReady);
        }

        let name = transport
            .naming()
            .channel_name(self.client_type, self.pid, &self.unique_id);
        let channel = transport.create_channel(&name, true)?;
        channel.set_client_connected(true);

        let slot = registry.register_client(&name, self.client_type.as_str(), &self.unique_id, self.pid)?;
        let Some(generation) = registry.client_info(slot).map(|info| info.generation) else {
            return Err(IpcError::SlotReclaimed { slot });
        };
        debug!("channel {} registered in slot {} (generation {})", name, slot, generation);

        if !wait_until(self.connect_timeout, || channel.is_server_ready()) {
            registry.release_registration(slot, generation);
            return Err(IpcError::Timeout {
                what: "scheduler to accept the channel",
                after: self.connect_timeout,
            });
        }

        info!("connected to scheduler over {} ({})", transport.name(), name);
        Ok(ClientConnection::new(
            registry,
            channel,
            slot,
            generation,
            self.client_type,
            self.unique_id,
        ))
    }

    /// The scheduler may still be creating the registry; retry until the
    /// connect timeout and report the last failure.
    fn open_registry(&self, transport: &dyn TransportFactory) -> Result<Box<dyn Registry>> {
        let deadline = Instant::now() + self.connect_timeout;
        loop {
            match transport.create_registry(false) {
                Ok(registry) => return Ok(registry),
                Err(
                    e @ (IpcError::Open { .. }
                    | IpcError::NotInitialized { .. }
                    | IpcError::TooSmall { .. }),
                ) if Instant::now() < deadline => {
                    debug!("registry not available yet: {}", e);
                    thread::sleep(CONNECT_POLL);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn wait_until(timeout: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if ready() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(CONNECT_POLL);
    }
}
