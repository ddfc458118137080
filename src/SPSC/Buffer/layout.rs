use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::atomic::AtomicU64;

use crate::Core::config::{MAX_MSG_SIZE, SPSC_QUEUE_SIZE};

/// Places `T` at the start of its own 64-byte cache line.
///
/// The deployment-wide cache line is 64 bytes, so the layout is pinned here
/// instead of using a platform-dependent padding width.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CacheAligned<T>(pub T);

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

/// One message cell. Holds up to `MAX_MSG_SIZE - 1` bytes plus a terminator.
#[repr(C)]
pub struct Slot(pub(crate) UnsafeCell<[u8; MAX_MSG_SIZE]>);

/// Shared memory layout of one SPSC queue.
///
/// `head` is written only by the consumer, `tail` only by the producer. Both are
/// kept in `[0, SPSC_QUEUE_SIZE)`; one slot is always left empty so that
/// `head == tail` means empty and `(tail + 1) % SPSC_QUEUE_SIZE == head` means full.
#[repr(C, align(64))]
pub struct QueueData {
    /// Next slot to consume.
    pub head: CacheAligned<AtomicU64>,
    /// Next slot to produce.
    pub tail: CacheAligned<AtomicU64>,
    /// Message cells; starts on its own cache line.
    pub slots: [Slot; SPSC_QUEUE_SIZE],
}

// Slot contents are only touched under the SPSC discipline enforced by the
// head/tail handoff.
unsafe impl Sync for QueueData {}
unsafe impl Send for QueueData {}

const _: () = assert!(std::mem::size_of::<Slot>() == MAX_MSG_SIZE);
const _: () = assert!(std::mem::align_of::<QueueData>() == 64);
