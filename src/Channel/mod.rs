mod channel;
pub mod layout;

pub use channel::MappedChannel;
pub use layout::{ChannelData, CHANNEL_MAGIC};
