use std::fmt;

use crate::Channel::MappedChannel;
use crate::Registry::SharedRegistry;
use crate::SPSC::RingBuffer;
use crate::Transport::{Channel, Registry};

/// Debug function for RingBuffer
///
/// Shows the record address and the current indices; never touches slots.
pub fn debug_ring_buffer(buffer: &RingBuffer, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let (head, tail) = buffer.indices();
    f.debug_struct("RingBuffer")
        .field("queue", &format_args!("0x{:x}", buffer.queue.as_ptr() as usize))
        .field("head", &head)
        .field("tail", &tail)
        .field("spin", &buffer.spin)
        .finish()
}

/// Debug function for MappedChannel
///
/// Shows:
/// - Segment name and role
/// - Both connection flags
/// - Pending messages in each direction
pub fn debug_mapped_channel(channel: &MappedChannel, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MappedChannel")
        .field("name", &channel.name())
        .field("role", &channel.role())
        .field("client_connected", &channel.is_client_connected())
        .field("server_ready", &channel.is_server_ready())
        .field("pending_requests", &channel.request_ring().size())
        .field("pending_responses", &channel.response_ring().size())
        .field("identity", channel.identity())
        .finish()
}

/// Debug function for SharedRegistry
pub fn debug_shared_registry(registry: &SharedRegistry, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SharedRegistry")
        .field("name", &registry.name())
        .field("memory", &"<opaque>")
        .field("server_ready", &registry.is_server_ready())
        .field("version", &registry.version())
        .field("active", &registry.active_clients().len())
        .finish()
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_ring_buffer(self, f)
    }
}
