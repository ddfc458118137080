use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::time::{Duration, Instant};

use super::layout::QueueData;
use super::Buffer::{RingBuffer, MSG_USABLE};
use crate::Core::config::{MAX_MSG_SIZE, SPSC_QUEUE_SIZE};
use crate::Core::spin::SpinPolicy;
use crate::SPSC::Structs::Buffer_Structs::Message;
use crate::Transport::MessageQueue;

const CAPACITY: u64 = SPSC_QUEUE_SIZE as u64;

impl RingBuffer {
    /// Create a ring buffer view over an existing queue record.
    ///
    /// # Safety
    /// `queue` must point to a `QueueData` that stays valid (mapped) for the
    /// lifetime of the view, and the caller must uphold the single-producer
    /// single-consumer discipline across all views of the same record.
    pub unsafe fn new(queue: *const QueueData, spin: SpinPolicy) -> Self {
        Self {
            queue: NonNull::new_unchecked(queue as *mut QueueData),
            spin,
        }
    }

    /// Replace the wait step of the blocking variants.
    pub fn set_spin_policy(&mut self, spin: SpinPolicy) {
        self.spin = spin;
    }

    pub fn spin_policy(&self) -> SpinPolicy {
        self.spin
    }

    /// Number of slots, including the one that always stays empty.
    #[inline]
    pub const fn capacity() -> usize {
        SPSC_QUEUE_SIZE
    }

    #[inline]
    fn queue(&self) -> &QueueData {
        unsafe { self.queue.as_ref() }
    }

    #[inline]
    fn slot_ptr(&self, index: u64) -> *mut [u8; MAX_MSG_SIZE] {
        // Indices come from shared memory; never trust them for bounds.
        self.queue().slots[(index % CAPACITY) as usize].0.get()
    }

    /// Zero both indices and every slot.
    /// This should ONLY be called by the creator, before the queue is shared.
    pub fn init(&self) {
        let q = self.queue();
        q.head.store(0, Relaxed);
        q.tail.store(0, Relaxed);
        for slot in q.slots.iter() {
            unsafe { (*slot.0.get()).fill(0) };
        }
    }

    /// Push one message without waiting. Returns `false` if the ring is full.
    ///
    /// Payloads longer than 255 bytes are truncated at the slot boundary.
    pub fn try_push(&self, payload: &[u8]) -> bool {
        let q = self.queue();
        let tail = q.tail.load(Relaxed);
        let next_tail = (tail + 1) % CAPACITY;

        if next_tail == q.head.load(Acquire) {
            return false;
        }

        let len = payload.len().min(MSG_USABLE);
        unsafe {
            let slot = self.slot_ptr(tail) as *mut u8;
            ptr::copy_nonoverlapping(payload.as_ptr(), slot, len);
            *slot.add(len) = 0;
        }

        q.tail.store(next_tail, Release);
        true
    }

    /// Pop one message without waiting. Returns `false` if the ring is empty.
    pub fn try_pop(&self, out: &mut Message) -> bool {
        let q = self.queue();
        let head = q.head.load(Relaxed);

        if head == q.tail.load(Acquire) {
            return false;
        }

        unsafe {
            out.fill_from_slot(&*self.slot_ptr(head));
        }

        q.head.store((head + 1) % CAPACITY, Release);
        true
    }

    /// Retry `try_push` until it succeeds or `timeout` elapses. `None` waits forever.
    pub fn push_blocking(&self, payload: &[u8], timeout: Option<Duration>) -> bool {
        let deadline = deadline_after(timeout);
        let mut waiter = self.spin.waiter();
        loop {
            if self.try_push(payload) {
                return true;
            }
            if expired(deadline) {
                return false;
            }
            waiter.wait();
        }
    }

    /// Retry `try_pop` until it succeeds or `timeout` elapses. `None` waits forever.
    pub fn pop_blocking(&self, out: &mut Message, timeout: Option<Duration>) -> bool {
        let deadline = deadline_after(timeout);
        let mut waiter = self.spin.waiter();
        loop {
            if self.try_pop(out) {
                return true;
            }
            if expired(deadline) {
                return false;
            }
            waiter.wait();
        }
    }

    /// Number of messages waiting to be popped.
    pub fn size(&self) -> usize {
        let q = self.queue();
        let head = q.head.load(Acquire);
        let tail = q.tail.load(Acquire);
        ((tail + CAPACITY - head % CAPACITY) % CAPACITY) as usize
    }

    pub fn is_empty(&self) -> bool {
        let q = self.queue();
        q.head.load(Acquire) == q.tail.load(Acquire)
    }

    /// Current (head, tail) pair, for diagnostics.
    pub fn indices(&self) -> (u64, u64) {
        let q = self.queue();
        (q.head.load(Acquire), q.tail.load(Acquire))
    }
}

/// `None` when the wait is unbounded or the deadline does not fit an `Instant`.
fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|t| Instant::now().checked_add(t))
}

#[inline]
fn expired(deadline: Option<Instant>) -> bool {
    matches!(deadline, Some(d) if Instant::now() >= d)
}

impl MessageQueue for RingBuffer {
    fn try_send(&self, message: &[u8]) -> bool {
        self.try_push(message)
    }

    fn send_blocking(&self, message: &[u8], timeout: Option<Duration>) -> bool {
        self.push_blocking(message, timeout)
    }

    fn try_receive(&self, out: &mut Message) -> bool {
        self.try_pop(out)
    }

    fn receive_blocking(&self, out: &mut Message, timeout: Option<Duration>) -> bool {
        self.pop_blocking(out, timeout)
    }

    fn is_empty(&self) -> bool {
        RingBuffer::is_empty(self)
    }

    fn len(&self) -> usize {
        self.size()
    }
}
