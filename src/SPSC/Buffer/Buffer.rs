// The SPSC ring buffer view over a QueueData record in shared memory.

use super::layout::QueueData;
use crate::Core::spin::SpinPolicy;

use std::ptr::NonNull;

/// Usable payload bytes per message; the last slot byte is the terminator.
pub const MSG_USABLE: usize = crate::Core::config::MAX_MSG_SIZE - 1;

/// A lock-free single-producer single-consumer ring buffer view.
///
/// This struct is NOT stored in shared memory. It is a transient view holding a
/// pointer to a `QueueData` record that some owner keeps mapped.
///
/// ### Concurrency Design:
/// - **Producer (push)**: reads `tail` relaxed (it is the only writer), checks
///   `tail + 1` against `head` loaded with acquire, copies the payload into the
///   slot, then publishes the new `tail` with a release store.
/// - **Consumer (pop)**: mirrors the producer on `head`.
///
/// The acquire/release pairing on the two indices is the only synchronization;
/// it makes the slot write visible before the index that hands it over.
/// Exactly one thread may push and exactly one thread may pop at a time.
pub struct RingBuffer {
    /// Pointer to the queue record.
    pub(crate) queue: NonNull<QueueData>,

    /// Wait step of the blocking variants.
    pub(crate) spin: SpinPolicy,
}

unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}
