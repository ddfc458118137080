// Transport-agnostic interfaces. The scheduler, listener and client only talk to
// these traits; `shm` and `local` provide the backing stores.

use std::time::Duration;

use crate::Core::error::Result;
use crate::Core::naming::Naming;
use crate::Core::spin::SpinPolicy;
use crate::Registry::ClientInfo;
use crate::SPSC::Message;

pub mod listener;
pub mod local;
pub mod shm;

pub use listener::RegistryListener;
pub use local::LocalTransport;
pub use shm::ShmTransport;

/// One direction of a channel.
pub trait MessageQueue: Send + Sync {
    /// Non-blocking send; `false` when the queue is full.
    fn try_send(&self, message: &[u8]) -> bool;

    /// Send, retrying until `timeout` elapses (`None` waits forever).
    fn send_blocking(&self, message: &[u8], timeout: Option<Duration>) -> bool;

    /// Non-blocking receive; `false` when the queue is empty.
    fn try_receive(&self, out: &mut Message) -> bool;

    /// Receive, retrying until `timeout` elapses (`None` waits forever).
    fn receive_blocking(&self, out: &mut Message, timeout: Option<Duration>) -> bool;

    fn is_empty(&self) -> bool;

    fn len(&self) -> usize;
}

/// Who a channel belongs to, as recorded in the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_type: String,
    pub unique_id: String,
    pub pid: i64,
}

impl From<&ClientInfo> for ClientIdentity {
    fn from(info: &ClientInfo) -> Self {
        Self {
            client_type: info.client_type.clone(),
            unique_id: info.unique_id.clone(),
            pid: info.pid,
        }
    }
}

/// Which end of a channel a handle represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Pushes requests, pops responses, owns `client_connected`.
    Client,
    /// Pops requests, pushes responses, owns `server_ready`.
    Server,
}

/// A client's full duplex session: two queues plus the connection flags.
///
/// A channel is owned by exactly one thread on each side, so it is `Send` but
/// deliberately not `Sync`.
pub trait Channel: Send {
    /// Client -> scheduler.
    fn request_queue(&self) -> &dyn MessageQueue;

    /// Scheduler -> client.
    fn response_queue(&self) -> &dyn MessageQueue;

    fn is_client_connected(&self) -> bool;
    fn set_client_connected(&self, connected: bool);

    fn is_server_ready(&self) -> bool;
    fn set_server_ready(&self, ready: bool);

    /// Segment name of the channel.
    fn name(&self) -> &str;

    fn role(&self) -> Role;

    fn identity(&self) -> &ClientIdentity;

    /// Attach the registry identity of the peer (done by the listener).
    fn bind_identity(&mut self, identity: ClientIdentity);

    /// Wait step of this end's blocking sends and receives.
    fn set_spin_policy(&mut self, spin: SpinPolicy);

    fn client_type(&self) -> &str {
        &self.identity().client_type
    }

    fn unique_id(&self) -> &str {
        &self.identity().unique_id
    }

    fn client_pid(&self) -> i64 {
        self.identity().pid
    }
}

impl std::fmt::Debug for dyn Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// Shared directory of active client channels.
pub trait Registry: Send + Sync {
    fn is_server_ready(&self) -> bool;
    fn set_server_ready(&self, ready: bool);

    /// Claim a free slot and publish the entry. Fails with
    /// `IpcError::RegistryFull` when every slot is taken.
    fn register_client(
        &self,
        channel_name: &str,
        client_type: &str,
        unique_id: &str,
        pid: i64,
    ) -> Result<usize>;

    /// Release a slot. Releasing an inactive or out-of-range slot does nothing.
    fn unregister_client(&self, slot: usize);

    /// Refresh a slot's heartbeat timestamp.
    fn update_heartbeat(&self, slot: usize);

    /// Refresh the heartbeat only while `slot` still holds the registration
    /// observed at `generation`. `false` once it was released or reused.
    fn refresh_heartbeat(&self, slot: usize, generation: u64) -> bool;

    /// Release `slot` only while it still holds the registration observed at
    /// `generation`.
    fn release_registration(&self, slot: usize, generation: u64) -> bool;

    /// Consistent snapshot of one published entry.
    fn client_info(&self, slot: usize) -> Option<ClientInfo>;

    /// Snapshots of every published entry.
    fn active_clients(&self) -> Vec<ClientInfo>;

    /// Change counter, bumped on every registration, release and heartbeat.
    fn version(&self) -> u32;

    fn capacity(&self) -> usize;

    /// Release entries whose process is gone, or whose heartbeat is older than
    /// `heartbeat_timeout`. Returns the released entries.
    fn reap_stale(&self, heartbeat_timeout: Option<Duration>) -> Vec<ClientInfo>;
}

/// Creates, opens and destroys the named stores behind channels and the registry.
pub trait TransportFactory: Send + Sync {
    /// Open a channel store with an explicit role.
    ///
    /// `is_creator = true` allocates and initializes the store (replacing any
    /// stale one); `false` opens an existing store and fails if it is missing.
    fn open_channel(&self, name: &str, is_creator: bool, role: Role) -> Result<Box<dyn Channel>>;

    /// Create or open the deployment's registry.
    fn create_registry(&self, is_creator: bool) -> Result<Box<dyn Registry>>;

    /// Remove a channel store by name.
    fn destroy_channel(&self, name: &str) -> Result<()>;

    /// Remove the registry store.
    fn destroy_registry(&self) -> Result<()>;

    /// Name scope used for the registry and for generated channel names.
    fn naming(&self) -> &Naming;

    /// Human-readable transport name.
    fn name(&self) -> &str;

    /// Create or open a channel. The creator is the client end; the side that
    /// opens an existing store is the scheduler end.
    fn create_channel(&self, name: &str, is_creator: bool) -> Result<Box<dyn Channel>> {
        let role = if is_creator { Role::Client } else { Role::Server };
        self.open_channel(name, is_creator, role)
    }
}
