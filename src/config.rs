use crate::shared::definitions::DEFAULT_PAGES;
use std::time::Duration;

/// Tuning knobs of a [`BufferPool`](crate::buffer_pool_manager::BufferPool).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Maximum number of cached pages.
    pub capacity: usize,
    /// Longest a blocked lock request sleeps before probing again.
    pub lock_poll_interval: Duration,
    /// Give up on a lock request after this long. `None` waits forever.
    pub lock_timeout: Option<Duration>,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_PAGES,
            lock_poll_interval: Duration::from_millis(10),
            lock_timeout: None,
        }
    }
}

impl BufferPoolConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}
