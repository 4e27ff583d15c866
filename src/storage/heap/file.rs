use super::{page::HeapPage, scan::HeapFileIterator};
use crate::buffer_pool_manager::{BufferPool, PageRef};
use crate::shared::{
    contracts::{DbFile, Page},
    definitions::*,
    error::{DbError, Result},
};
use crate::storage::{
    fileio::{FileIO, PlatformFileIO},
    tuple::{Tuple, TupleDesc},
};
use log::debug;
use parking_lot::Mutex;
use std::{
    collections::hash_map::DefaultHasher,
    fs::File,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    sync::Arc,
};

/// A table stored as an unordered sequence of heap pages: page `n` lives at
/// byte offset `n * PAGE_SIZE` and the file has no header of its own.
#[derive(Debug)]
pub struct HeapFile {
    id: TableId,
    path: PathBuf,
    file: File,
    desc: Arc<TupleDesc>,
    // Serializes page appends so two writers never claim the same page number.
    append_lock: Mutex<()>,
}

impl HeapFile {
    /// Opens the heap file at `path`, creating an empty one if it does not exist.
    pub fn create(path: impl AsRef<Path>, desc: Arc<TupleDesc>) -> Result<Self> {
        let file = PlatformFileIO::create_file(path.as_ref())?;
        Self::from_file(path.as_ref(), file, desc)
    }

    /// Opens an existing heap file.
    pub fn open(path: impl AsRef<Path>, desc: Arc<TupleDesc>) -> Result<Self> {
        let file = PlatformFileIO::open_file(path.as_ref(), true)?;
        Self::from_file(path.as_ref(), file, desc)
    }

    fn from_file(path: &Path, file: File, desc: Arc<TupleDesc>) -> Result<Self> {
        let path = path.canonicalize()?;
        Ok(Self {
            id: Self::table_id_for(&path),
            path,
            file,
            desc,
            append_lock: Mutex::new(()),
        })
    }

    /// Table ids are derived from the absolute path so reopening a file
    /// yields the same id.
    fn table_id_for(path: &Path) -> TableId {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        TableId(hasher.finish())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lazily yields every tuple of this file, reading pages through `pool`
    /// under shared locks held by `tid`.
    pub fn iterator<'a>(&'a self, pool: &'a BufferPool, tid: TransactionId) -> HeapFileIterator<'a> {
        HeapFileIterator::new(self, pool, tid)
    }

    /// Writes an empty page after the current last page.
    fn append_empty_page(&self) -> Result<PageId> {
        let _append = self.append_lock.lock();
        let page_id = PageId::new(self.id, self.num_pages()?);
        PlatformFileIO::write(&self.file, &HeapPage::create_empty_page_data(), page_id.offset())?;
        debug!("appended page {}", page_id);
        Ok(page_id)
    }
}

impl DbFile for HeapFile {
    fn id(&self) -> TableId {
        self.id
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    fn read_page(&self, page_id: PageId) -> Result<HeapPage> {
        let len = PlatformFileIO::len(&self.file)?;
        let offset = page_id.offset();
        if page_id.table_id != self.id || offset >= len {
            return Err(DbError::PageOutOfRange(page_id));
        }

        // a trailing partial page reads as zero past the end of the file
        let mut data = HeapPage::create_empty_page_data();
        let available = ((len - offset) as usize).min(PAGE_SIZE);
        PlatformFileIO::read(&self.file, &mut data[..available], offset)?;
        HeapPage::from_bytes(page_id, Arc::clone(&self.desc), &data)
    }

    fn write_page(&self, page: &mut HeapPage) -> Result<()> {
        let page_id = page.id();
        PlatformFileIO::write(&self.file, &page.page_data(), page_id.offset())?;
        page.mark_dirty(None);
        Ok(())
    }

    fn num_pages(&self) -> Result<usize> {
        let len = PlatformFileIO::len(&self.file)? as usize;
        Ok((len + PAGE_SIZE - 1) / PAGE_SIZE)
    }

    /// Checks pages in order under an exclusive lock and fills the first
    /// free slot. A full page whose lock was taken only for that check is
    /// released again before moving on, so concurrent inserters do not
    /// serialize on every full page. Locks `tid` held before the call are
    /// kept.
    fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<Vec<PageRef>> {
        if **tuple.desc() != *self.desc {
            return Err(DbError::SchemaMismatch(format!(
                "tuple ({}) does not match table schema ({})",
                tuple.desc(),
                self.desc
            )));
        }

        let mut page_number = 0;
        loop {
            let num_pages = self.num_pages()?;
            while page_number < num_pages {
                let page_id = PageId::new(self.id, page_number);
                let held_before = pool.holds_lock(tid, page_id);
                let page = pool.get_page(tid, page_id, Permissions::ReadWrite)?;

                let placed = {
                    let mut guard = page.write();
                    if guard.num_empty_slots() > 0 {
                        let record_id = guard.insert_tuple(tuple)?;
                        guard.mark_dirty(Some(tid));
                        Some(record_id)
                    } else {
                        None
                    }
                };

                if let Some(record_id) = placed {
                    tuple.set_record_id(Some(record_id));
                    return Ok(vec![page]);
                }
                // nothing was written to a full page locked only for the check
                if !held_before {
                    pool.release_page(tid, page_id);
                }
                page_number += 1;
            }

            // no page has room; the appended page is picked up by the next pass
            self.append_empty_page()?;
        }
    }

    fn delete_tuple(&self, pool: &BufferPool, tid: TransactionId, tuple: &Tuple) -> Result<PageRef> {
        let record_id = tuple.record_id().ok_or(DbError::NoRecordId)?;
        if record_id.page_id.table_id != self.id {
            return Err(DbError::TupleNotFound(record_id));
        }

        let page = pool.get_page(tid, record_id.page_id, Permissions::ReadWrite)?;
        {
            let mut guard = page.write();
            guard.delete_tuple(tuple)?;
            guard.mark_dirty(Some(tid));
        }
        Ok(page)
    }
}
