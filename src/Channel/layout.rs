use std::sync::atomic::{AtomicBool, AtomicU64};

use crate::SPSC::Buffer::{CacheAligned, QueueData};

/// "KSCHAN01", written last by the creator once the record is initialized.
pub const CHANNEL_MAGIC: u64 = 0x4B53_4348_414E_3031;

/// Shared memory layout of one client channel.
#[repr(C, align(64))]
pub struct ChannelData {
    /// Client -> scheduler.
    pub request_queue: QueueData,
    /// Scheduler -> client.
    pub response_queue: QueueData,
    /// Written by the client end only.
    pub client_connected: CacheAligned<AtomicBool>,
    /// Written by the scheduler end only (a.k.a. scheduler_ready).
    pub server_ready: CacheAligned<AtomicBool>,
    pub magic: CacheAligned<AtomicU64>,
}
