//! Page cache, page-level two-phase locking and heap-file storage for a
//! single-node relational database.
//!
//! All table pages are read and written through a [`BufferPool`], which
//! locks each page on behalf of a [`TransactionId`] before handing it out
//! and keeps at most a fixed number of pages in memory. Tables are stored as
//! [`HeapFile`]s registered in a [`Catalog`].

pub mod buffer_pool_manager;
pub mod catalog;
pub mod config;
pub mod shared;
pub mod storage;

pub use buffer_pool_manager::{BufferPool, LockManager, PageRef};
pub use catalog::Catalog;
pub use config::BufferPoolConfig;
pub use shared::{
    contracts::{DbFile, Page},
    definitions::{LockMode, PageId, Permissions, RecordId, TableId, TransactionId, PAGE_SIZE},
    error::{DbError, Result},
};
pub use storage::{
    heap::{HeapFile, HeapFileIterator, HeapPage},
    tuple::{Field, Tuple, TupleDesc, Type},
};
