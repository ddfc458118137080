pub mod Buffer {
    pub mod Buffer;
    pub mod Buffer_impl;
    pub mod layout;
    pub use Buffer::{RingBuffer, MSG_USABLE}; // re-export for stable path
    pub use layout::{CacheAligned, QueueData, Slot};
}

pub mod Structs {
    pub mod Buffer_Structs;
    pub use Buffer_Structs::Message; // re-export for stable path
}

pub use Buffer::{QueueData, RingBuffer};
pub use Structs::Message;
