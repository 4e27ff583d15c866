use crate::storage::heap::HeapPage;
use parking_lot::RwLock;
use std::sync::Arc;

mod buffer_pool;
mod lock_manager;
mod page_table;

pub use buffer_pool::BufferPool;
pub use lock_manager::LockManager;

/// Shared handle to a cached page. The cache only hands these out; callers
/// must not keep one past the transaction that fetched it.
pub type PageRef = Arc<RwLock<HeapPage>>;
