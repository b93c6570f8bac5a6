//! Broadcast queue configuration

/// Largest ring a queue will allocate
pub const MAX_CAPACITY: usize = 1 << 16;

/// Broadcast queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Messages retained for subscribers that fall behind
    ///
    /// Once a subscriber is this far behind, the oldest messages are dropped
    /// for it. Tokio rounds the ring up to the next power of two. Values
    /// outside `1..=MAX_CAPACITY` are clamped.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

impl QueueConfig {
    /// Set the ring capacity, clamped to `1..=MAX_CAPACITY`
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self.capacity = self.ring_capacity();
        self
    }

    /// Capacity actually handed to the ring
    pub(crate) fn ring_capacity(&self) -> usize {
        self.capacity.clamp(1, MAX_CAPACITY)
    }
}
