use super::{definitions::*, error::Result};
use crate::{
    buffer_pool_manager::{BufferPool, PageRef},
    storage::{
        heap::HeapPage,
        tuple::{Tuple, TupleDesc},
    },
};
use std::sync::Arc;

/// A cached unit of storage that tracks which transaction last dirtied it
/// and the committed image it rolls back to.
pub trait Page: Send + Sync + 'static {
    fn id(&self) -> PageId;
    /// The transaction that last mutated this page, if it is dirty.
    fn dirtied_by(&self) -> Option<TransactionId>;
    fn is_dirty(&self) -> bool {
        self.dirtied_by().is_some()
    }
    fn mark_dirty(&mut self, tid: Option<TransactionId>);
    /// # Safety
    /// `return.len()` must equal `PAGE_SIZE`.
    fn page_data(&self) -> Vec<u8>;
    fn before_image(&self) -> &[u8];
    /// Snapshots the current content as the new rollback target.
    fn set_before_image(&mut self);
    /// Replaces the content with the before-image and clears the dirty flag.
    fn restore_before_image(&mut self) -> Result<()>;
}

/// A table's backing store, addressed page by page.
pub trait DbFile: Send + Sync + 'static {
    fn id(&self) -> TableId;
    fn tuple_desc(&self) -> &Arc<TupleDesc>;
    /// Reads page `page_id` straight from storage, bypassing the buffer pool.
    fn read_page(&self, page_id: PageId) -> Result<HeapPage>;
    /// Writes `page` at its offset, then clears its dirty flag.
    fn write_page(&self, page: &mut HeapPage) -> Result<()>;
    fn num_pages(&self) -> Result<usize>;
    /// Places `tuple` on a page with a free slot and records its location
    /// in the tuple. Returns the pages that were modified.
    fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<Vec<PageRef>>;
    fn delete_tuple(&self, pool: &BufferPool, tid: TransactionId, tuple: &Tuple)
        -> Result<PageRef>;
}
