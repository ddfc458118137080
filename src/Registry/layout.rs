use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64};

use crate::Core::config::{CHANNEL_NAME_LEN, CLIENT_TYPE_LEN, MAX_CLIENTS, UNIQUE_ID_LEN};
use crate::SPSC::Buffer::CacheAligned;

/// "KSREG001", written last by the creator once the record is initialized.
pub const REGISTRY_MAGIC: u64 = 0x4B53_5245_4730_3031;

pub const CHANNEL_NAME_WORDS: usize = CHANNEL_NAME_LEN / 8;
pub const CLIENT_TYPE_WORDS: usize = CLIENT_TYPE_LEN / 8;
pub const UNIQUE_ID_WORDS: usize = UNIQUE_ID_LEN / 8;

/// Fixed-width, NUL-terminated text field made of atomic words so that a
/// reader racing a writer sees torn text at worst, never undefined behavior.
/// The seqlock around each entry tells the reader to retry in that case.
#[repr(C)]
pub struct AtomicBytes<const W: usize>(pub [AtomicU64; W]);

impl<const W: usize> AtomicBytes<W> {
    /// Longest text that still leaves room for the terminator.
    pub const MAX_LEN: usize = W * 8 - 1;

    /// Store `text`, truncated to `MAX_LEN` bytes and NUL padded.
    pub fn store_str(&self, text: &str) {
        let bytes = &text.as_bytes()[..text.len().min(Self::MAX_LEN)];
        for (i, word) in self.0.iter().enumerate() {
            let mut chunk = [0u8; 8];
            let start = i * 8;
            if start < bytes.len() {
                let end = (start + 8).min(bytes.len());
                chunk[..end - start].copy_from_slice(&bytes[start..end]);
            }
            word.store(u64::from_le_bytes(chunk), Relaxed);
        }
    }

    /// Load the text up to the first NUL.
    pub fn load_string(&self) -> String {
        let mut buf = Vec::with_capacity(W * 8);
        for word in &self.0 {
            buf.extend_from_slice(&word.load(Relaxed).to_le_bytes());
        }
        let len = buf.iter().position(|&b| b == 0).unwrap_or(Self::MAX_LEN);
        String::from_utf8_lossy(&buf[..len]).into_owned()
    }

    pub fn clear(&self) {
        for word in &self.0 {
            word.store(0, Relaxed);
        }
    }
}

impl<const W: usize> Default for AtomicBytes<W> {
    fn default() -> Self {
        Self(std::array::from_fn(|_| AtomicU64::new(0)))
    }
}

/// One registry slot.
///
/// `active` is the claim flag (CAS false -> true). `published` is set, and
/// `generation` is even, only when every other field is consistent.
#[repr(C, align(64))]
#[derive(Default)]
pub struct RegistryEntryData {
    pub active: AtomicBool,
    pub published: AtomicBool,
    /// Odd while a writer is inside the entry.
    pub generation: AtomicU64,
    pub client_pid: AtomicI64,
    /// Monotonic milliseconds.
    pub last_heartbeat: AtomicU64,
    pub channel_name: AtomicBytes<CHANNEL_NAME_WORDS>,
    pub client_type: AtomicBytes<CLIENT_TYPE_WORDS>,
    pub unique_id: AtomicBytes<UNIQUE_ID_WORDS>,
}

/// Shared memory layout of the registry.
#[repr(C, align(64))]
pub struct RegistryData {
    pub magic: CacheAligned<AtomicU64>,
    pub server_ready: CacheAligned<AtomicBool>,
    pub version: CacheAligned<AtomicU32>,
    pub entries: [RegistryEntryData; MAX_CLIENTS],
}
