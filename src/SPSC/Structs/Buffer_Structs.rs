// Fixed-size receive buffer for one ring message.

use std::fmt;

use crate::Core::config::MAX_MSG_SIZE;

/// One popped message. Sized like a ring slot so popping never allocates.
#[derive(Clone)]
pub struct Message {
    bytes: [u8; MAX_MSG_SIZE],
    len: usize,
}

impl Message {
    pub const fn new() -> Self {
        Self {
            bytes: [0; MAX_MSG_SIZE],
            len: 0,
        }
    }

    /// Payload bytes, without the terminator.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Payload as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()).ok()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Copy a slot's content up to its first terminator byte.
    pub(crate) fn fill_from_slot(&mut self, slot: &[u8; MAX_MSG_SIZE]) {
        let len = slot.iter().position(|&b| b == 0).unwrap_or(MAX_MSG_SIZE - 1);
        self.bytes[..len].copy_from_slice(&slot[..len]);
        self.len = len;
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.len)
            .field("text", &String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

impl PartialEq<[u8]> for Message {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl PartialEq<&str> for Message {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}
