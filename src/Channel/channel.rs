use std::fmt;
use std::mem::size_of;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release, SeqCst};

use log::{debug, warn};

use super::layout::{ChannelData, CHANNEL_MAGIC};
use crate::Core::error::{IpcError, Result};
use crate::Core::process::process_alive;
use crate::Core::spin::SpinPolicy;
use crate::Core::SharedMemoryBackend;
use crate::SPSC::RingBuffer;
use crate::Transport::{Channel, ClientIdentity, MessageQueue, Role};

/// A channel whose `ChannelData` lives in a mapped (or heap) segment.
///
/// The handle keeps the mapping alive; both ring views point into it.
pub struct MappedChannel {
    name: String,
    role: Role,
    request: RingBuffer,
    response: RingBuffer,
    identity: ClientIdentity,
    // Dropped after the views above, which borrow its memory.
    memory: Box<dyn SharedMemoryBackend>,
}

impl MappedChannel {
    /// Initialize a fresh channel record in `memory` (creator side).
    pub fn create(
        name: &str,
        memory: Box<dyn SharedMemoryBackend>,
        role: Role,
        spin: SpinPolicy,
    ) -> Result<Self> {
        let channel = Self::view(name, memory, role, spin)?;
        channel.init();
        channel.data().magic.store(CHANNEL_MAGIC, Release);
        debug!("channel {} created ({:?} end)", name, role);
        Ok(channel)
    }

    /// Open a channel record that a creator already initialized.
    pub fn attach(
        name: &str,
        memory: Box<dyn SharedMemoryBackend>,
        role: Role,
        spin: SpinPolicy,
    ) -> Result<Self> {
        let channel = Self::view(name, memory, role, spin)?;
        let found = channel.data().magic.load(Acquire);
        if found != CHANNEL_MAGIC {
            return Err(IpcError::NotInitialized {
                name: name.to_owned(),
                found,
            });
        }
        debug!("channel {} attached ({:?} end)", name, role);
        Ok(channel)
    }

    fn view(
        name: &str,
        memory: Box<dyn SharedMemoryBackend>,
        role: Role,
        spin: SpinPolicy,
    ) -> Result<Self> {
        let expected = size_of::<ChannelData>();
        if memory.size() < expected {
            return Err(IpcError::TooSmall {
                name: name.to_owned(),
                expected,
                actual: memory.size(),
            });
        }
        let data = memory.as_ptr() as *const ChannelData;
        let (request, response) = unsafe {
            (
                RingBuffer::new(&(*data).request_queue, spin),
                RingBuffer::new(&(*data).response_queue, spin),
            )
        };
        Ok(Self {
            name: name.to_owned(),
            role,
            request,
            response,
            identity: ClientIdentity::default(),
            memory,
        })
    }

    fn data(&self) -> &ChannelData {
        unsafe { &*(self.memory.as_ptr() as *const ChannelData) }
    }

    /// Zero both rings and both flags.
    pub fn init(&self) {
        let data = self.data();
        self.request.init();
        self.response.init();
        data.client_connected.store(false, Relaxed);
        data.server_ready.store(false, Relaxed);
    }

    /// Ring the client pushes into.
    pub fn request_ring(&self) -> &RingBuffer {
        &self.request
    }

    /// Ring the scheduler pushes into.
    pub fn response_ring(&self) -> &RingBuffer {
        &self.response
    }

    pub fn memory(&self) -> &dyn SharedMemoryBackend {
        &*self.memory
    }

    /// Whether the other end has let go of the channel.
    ///
    /// Pairs with the `SeqCst` flag store in `drop`: of two ends dropping at
    /// once, at least one sees the other's flag cleared.
    fn peer_gone(&self) -> bool {
        let data = self.data();
        match self.role {
            Role::Client => !data.server_ready.load(SeqCst),
            Role::Server => {
                !data.client_connected.load(SeqCst) || !process_alive(self.identity.pid)
            }
        }
    }
}

impl Channel for MappedChannel {
    fn request_queue(&self) -> &dyn MessageQueue {
        &self.request
    }

    fn response_queue(&self) -> &dyn MessageQueue {
        &self.response
    }

    fn is_client_connected(&self) -> bool {
        self.data().client_connected.load(Acquire)
    }

    fn set_client_connected(&self, connected: bool) {
        self.data().client_connected.store(connected, Release);
    }

    fn is_server_ready(&self) -> bool {
        self.data().server_ready.load(Acquire)
    }

    fn set_server_ready(&self, ready: bool) {
        self.data().server_ready.store(ready, Release);
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> Role {
        self.role
    }

    fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    fn bind_identity(&mut self, identity: ClientIdentity) {
        self.identity = identity;
    }

    fn set_spin_policy(&mut self, spin: SpinPolicy) {
        self.request.set_spin_policy(spin);
        self.response.set_spin_policy(spin);
    }
}

impl Drop for MappedChannel {
    fn drop(&mut self) {
        let data = self.data();
        match self.role {
            Role::Client => data.client_connected.store(false, SeqCst),
            Role::Server => data.server_ready.store(false, SeqCst),
        }
        // Last one out removes the name.
        if self.peer_gone() {
            if let Err(e) = self.memory.unlink() {
                warn!("failed to unlink channel {}: {}", self.name, e);
            } else {
                debug!("channel {} released", self.name);
            }
        }
    }
}

impl fmt::Debug for MappedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_mapped_channel(self, f)
    }
}
