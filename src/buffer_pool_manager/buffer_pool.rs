use super::{lock_manager::LockManager, page_table::PageTable, PageRef};
use crate::catalog::Catalog;
use crate::config::BufferPoolConfig;
use crate::shared::{
    contracts::Page,
    definitions::*,
    error::{DbError, Result},
};
use crate::storage::tuple::Tuple;
use log::{debug, trace};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// The single path through which pages are read and written.
///
/// Every fetch first takes a page lock on behalf of the requesting
/// transaction, then serves the page from a bounded cache, loading it
/// through the catalog on a miss. Only clean pages are evicted, so dirty
/// data leaves memory only through a flush.
///
/// Lock order: the lock manager's table, the cache mutex and a page's
/// `RwLock` are never held while waiting on one another. Eviction only
/// `try_read`s pages under the cache mutex.
pub struct BufferPool {
    config: BufferPoolConfig,
    catalog: Arc<Catalog>,
    lock_manager: LockManager,
    page_table: Mutex<PageTable>,
}

impl BufferPool {
    pub fn new(catalog: Arc<Catalog>, capacity: usize) -> Self {
        Self::with_config(catalog, BufferPoolConfig::default().with_capacity(capacity))
    }

    pub fn with_config(catalog: Arc<Catalog>, config: BufferPoolConfig) -> Self {
        assert!(config.capacity > 0);
        Self {
            page_table: Mutex::new(PageTable::new(config.capacity)),
            lock_manager: LockManager::new(),
            catalog,
            config,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn config(&self) -> &BufferPoolConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.page_table.lock().capacity()
    }

    /// Number of pages currently cached.
    pub fn len(&self) -> usize {
        self.page_table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_cached(&self, page_id: PageId) -> bool {
        self.page_table.lock().contains(&page_id)
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    /// Fetches a page under the lock `perm` implies, blocking while another
    /// transaction holds a conflicting lock.
    ///
    /// # Errors
    /// - `LockTimeout` when a lock timeout is configured and expires
    /// - `EvictionImpossible` when the page is not cached, the cache is full
    ///   and every cached page is dirty
    /// - any error reading the page from its file
    pub fn get_page(&self, tid: TransactionId, page_id: PageId, perm: Permissions) -> Result<PageRef> {
        self.lock_manager.acquire(
            tid,
            page_id,
            perm.into(),
            self.config.lock_poll_interval,
            self.config.lock_timeout,
        )?;

        if let Some(page) = self.page_table.lock().get(&page_id) {
            trace!("cache hit {}", page_id);
            return Ok(page);
        }

        // read outside the cache mutex; a concurrent reader may win the race
        let file = self.catalog.get_db_file(page_id.table_id)?;
        let page = Arc::new(RwLock::new(file.read_page(page_id)?));

        let mut page_table = self.page_table.lock();
        if let Some(cached) = page_table.get(&page_id) {
            return Ok(cached);
        }
        if let Some(evicted) = page_table.insert(page_id, Arc::clone(&page))? {
            debug!("evicted {} to admit {}", evicted, page_id);
        }
        trace!("cache miss {}", page_id);
        Ok(page)
    }

    /// Adds `tuple` to table `table_id`, recording its new location in the
    /// tuple. Pages the insert modified are marked dirty and kept cached.
    pub fn insert_tuple(&self, tid: TransactionId, table_id: TableId, tuple: &mut Tuple) -> Result<()> {
        let file = self.catalog.get_db_file(table_id)?;
        let pages = file.insert_tuple(self, tid, tuple)?;
        self.cache_dirty_pages(tid, pages)
    }

    /// Removes `tuple` from the table its record id points into.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        let record_id = tuple.record_id().ok_or(DbError::NoRecordId)?;
        let file = self.catalog.get_db_file(record_id.page_id.table_id)?;
        let page = file.delete_tuple(self, tid, tuple)?;
        self.cache_dirty_pages(tid, vec![page])
    }

    fn cache_dirty_pages(&self, tid: TransactionId, pages: Vec<PageRef>) -> Result<()> {
        let pages: Vec<_> = pages
            .into_iter()
            .map(|page| {
                let page_id = {
                    let mut guard = page.write();
                    guard.mark_dirty(Some(tid));
                    guard.id()
                };
                (page_id, page)
            })
            .collect();

        let mut page_table = self.page_table.lock();
        for (page_id, page) in pages {
            match page_table.peek(&page_id) {
                Some(cached) if Arc::ptr_eq(&cached, &page) => {
                    page_table.get(&page_id);
                }
                _ => {
                    if let Some(evicted) = page_table.insert(page_id, page)? {
                        debug!("evicted {} to admit dirty {}", evicted, page_id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes every dirty cached page to its file.
    ///
    /// Pages dirtied by transactions that have not committed yet are written
    /// too. Aborting such a transaction later writes the restored page back,
    /// as long as the page is still cached by then.
    pub fn flush_all_pages(&self) -> Result<()> {
        let page_ids = self.page_table.lock().page_ids();
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Writes page `page_id` to its file if it is cached and dirty.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let Some(page) = self.page_table.lock().peek(&page_id) else { return Ok(()) };
        self.write_back(&page)
    }

    /// Writes every cached page dirtied by `tid`.
    pub fn flush_pages(&self, tid: TransactionId) -> Result<()> {
        for (_, page) in self.cached_pages_locked_by(tid) {
            if page.read().dirtied_by() == Some(tid) {
                self.write_back(&page)?;
            }
        }
        Ok(())
    }

    fn write_back(&self, page: &PageRef) -> Result<()> {
        let mut guard = page.write();
        if !guard.is_dirty() {
            return Ok(());
        }
        let page_id = guard.id();
        self.catalog
            .get_db_file(page_id.table_id)?
            .write_page(&mut guard)?;
        debug!("flushed {}", page_id);
        Ok(())
    }

    /// Cached pages `tid` holds a lock on. The cache mutex is released
    /// before any page is looked at.
    fn cached_pages_locked_by(&self, tid: TransactionId) -> Vec<(PageId, PageRef)> {
        let page_ids = self.lock_manager.pages_locked_by(tid);
        let page_table = self.page_table.lock();
        page_ids
            .into_iter()
            .filter_map(|page_id| Some((page_id, page_table.peek(&page_id)?)))
            .collect()
    }

    /// Drops a page from the cache without writing it back.
    pub fn discard_page(&self, page_id: PageId) {
        if self.page_table.lock().remove(&page_id).is_some() {
            debug!("discarded {}", page_id);
        }
    }

    pub fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.holds(tid, page_id)
    }

    /// Releases one page lock before the transaction ends. This breaks
    /// two-phase locking unless the caller knows the page was not used.
    pub fn release_page(&self, tid: TransactionId, page_id: PageId) {
        self.lock_manager.release(tid, page_id);
    }

    /// Commits or aborts `tid` and releases all of its locks.
    ///
    /// Commit writes every page the transaction dirtied, then makes the
    /// content of every clean page it locked the new before-image, including
    /// pages flushed earlier in the transaction. Abort puts the before-image
    /// back into each page it locked exclusively; a page that was flushed
    /// while uncommitted is written back after the restore. Locks are
    /// released even when a write fails; the write error is returned.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let result = if commit {
            self.commit_pages(tid)
        } else {
            self.rollback_pages(tid)
        };
        self.lock_manager.release_all(tid);
        debug!("{} {}", tid, if commit { "committed" } else { "aborted" });
        result
    }

    fn commit_pages(&self, tid: TransactionId) -> Result<()> {
        for (page_id, page) in self.cached_pages_locked_by(tid) {
            let mut guard = page.write();
            if guard.dirtied_by() == Some(tid) {
                self.catalog
                    .get_db_file(page_id.table_id)?
                    .write_page(&mut guard)?;
            }
            if !guard.is_dirty() {
                guard.set_before_image();
            }
        }
        Ok(())
    }

    fn rollback_pages(&self, tid: TransactionId) -> Result<()> {
        for (page_id, page) in self.cached_pages_locked_by(tid) {
            if self.lock_manager.lock_mode(tid, page_id) != Some(LockMode::Exclusive) {
                continue;
            }
            let mut guard = page.write();
            if guard.dirtied_by() == Some(tid) {
                guard.restore_before_image()?;
                trace!("rolled back {}", page_id);
            } else if !guard.is_dirty() && guard.page_data() != guard.before_image() {
                // flushed before the abort; disk holds the uncommitted content
                guard.restore_before_image()?;
                self.catalog
                    .get_db_file(page_id.table_id)?
                    .write_page(&mut guard)?;
                debug!("rolled back flushed {}", page_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::contracts::DbFile;
    use crate::storage::{
        heap::{HeapFile, HeapPage},
        tuple::{Field, TupleDesc, Type},
    };
    use std::{
        thread::{sleep, spawn},
        time::{Duration, Instant},
    };
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        file: Arc<HeapFile>,
        pool: Arc<BufferPool>,
    }

    impl Fixture {
        fn page_id(&self, n: usize) -> PageId {
            PageId::new(self.file.id(), n)
        }

        fn row(&self, value: i32) -> Tuple {
            Tuple::from_fields(self.file.tuple_desc().clone(), vec![Field::Int(value)]).unwrap()
        }
    }

    /// A single-column table with `pages` pages on disk; page `n` holds
    /// the one tuple `n`.
    fn fixture(pages: usize, config: BufferPoolConfig) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let desc = Arc::new(TupleDesc::new(&[Type::Int]));
        let file = Arc::new(HeapFile::create(dir.path().join("pool.dat"), desc.clone()).unwrap());
        for n in 0..pages {
            let mut page = HeapPage::empty(PageId::new(file.id(), n), desc.clone());
            let tuple = Tuple::from_fields(desc.clone(), vec![Field::Int(n as i32)]).unwrap();
            page.insert_tuple(&tuple).unwrap();
            file.write_page(&mut page).unwrap();
        }
        let catalog = Arc::new(Catalog::new());
        catalog.add_table(file.clone(), "pool");
        Fixture {
            _dir: dir,
            file,
            pool: Arc::new(BufferPool::with_config(catalog, config)),
        }
    }

    fn small(capacity: usize) -> BufferPoolConfig {
        BufferPoolConfig::default()
            .with_capacity(capacity)
            .with_lock_poll_interval(Duration::from_millis(2))
    }

    fn values(page: &PageRef) -> Vec<Field> {
        page.read()
            .tuples()
            .filter_map(|tuple| tuple.field(0).cloned())
            .collect()
    }

    #[test]
    fn get_page_caches_and_locks() {
        let f = fixture(3, small(4));
        let tid = TransactionId::new();
        let page = f.pool.get_page(tid, f.page_id(1), Permissions::ReadOnly).unwrap();

        assert_eq!(values(&page), vec![Field::Int(1)]);
        assert!(f.pool.is_cached(f.page_id(1)));
        assert!(f.pool.holds_lock(tid, f.page_id(1)));

        let again = f.pool.get_page(tid, f.page_id(1), Permissions::ReadOnly).unwrap();
        assert!(Arc::ptr_eq(&page, &again));
        assert_eq!(f.pool.len(), 1);
    }

    #[test]
    fn cache_never_exceeds_capacity() {
        let f = fixture(10, small(3));
        assert_eq!(f.pool.capacity(), 3);
        let tid = TransactionId::new();
        for n in [0, 1, 2, 3, 0, 4, 9, 5, 5, 1, 8] {
            f.pool.get_page(tid, f.page_id(n), Permissions::ReadOnly).unwrap();
            assert!(f.pool.len() <= 3);
        }
        assert_eq!(f.pool.len(), 3);
    }

    #[test]
    fn evicts_lru_and_rereads_from_disk() {
        let f = fixture(3, small(2));
        let tid = TransactionId::new();
        let (a, b, c) = (f.page_id(0), f.page_id(1), f.page_id(2));

        let page_a = f.pool.get_page(tid, a, Permissions::ReadOnly).unwrap();
        f.pool.get_page(tid, b, Permissions::ReadOnly).unwrap();
        f.pool.get_page(tid, c, Permissions::ReadOnly).unwrap();

        assert!(!f.pool.is_cached(a));
        assert!(f.pool.is_cached(b) && f.pool.is_cached(c));

        let reread = f.pool.get_page(tid, a, Permissions::ReadOnly).unwrap();
        assert!(!Arc::ptr_eq(&page_a, &reread));
        assert_eq!(reread.read().page_data(), page_a.read().page_data());
        assert!(!f.pool.is_cached(b));
    }

    #[test]
    fn dirty_pages_are_never_evicted() {
        let f = fixture(4, small(2));
        let tid = TransactionId::new();
        let mut tuple = f.row(100);
        f.pool.insert_tuple(tid, f.file.id(), &mut tuple).unwrap();
        let dirty = tuple.record_id().unwrap().page_id;
        assert_eq!(dirty, f.page_id(0));

        for n in 1..4 {
            f.pool.get_page(tid, f.page_id(n), Permissions::ReadOnly).unwrap();
            assert!(f.pool.is_cached(dirty));
        }
    }

    #[test]
    fn all_dirty_cache_rejects_new_pages() {
        let f = fixture(3, small(1));
        let tid = TransactionId::new();
        f.pool.insert_tuple(tid, f.file.id(), &mut f.row(7)).unwrap();

        let other = TransactionId::new();
        assert!(matches!(
            f.pool.get_page(other, f.page_id(2), Permissions::ReadOnly),
            Err(DbError::EvictionImpossible)
        ));
        assert_eq!(f.pool.len(), 1);
        assert!(!f.pool.is_cached(f.page_id(2)));
    }

    #[test]
    fn commit_writes_through() {
        let f = fixture(1, small(4));
        let tid = TransactionId::new();
        let mut tuple = f.row(42);
        f.pool.insert_tuple(tid, f.file.id(), &mut tuple).unwrap();
        assert_eq!(f.file.read_page(f.page_id(0)).unwrap().tuples().count(), 1);

        f.pool.transaction_complete(tid, true).unwrap();
        let on_disk = f.file.read_page(f.page_id(0)).unwrap();
        assert_eq!(on_disk.tuples().count(), 2);
        assert!(!f.pool.holds_lock(tid, f.page_id(0)));

        let reader = TransactionId::new();
        let cached = f.pool.get_page(reader, f.page_id(0), Permissions::ReadOnly).unwrap();
        let guard = cached.read();
        assert!(!guard.is_dirty());
        assert_eq!(guard.before_image(), on_disk.page_data().as_slice());
    }

    #[test]
    fn abort_restores_before_image() {
        let f = fixture(2, small(4));
        let reader = TransactionId::new();
        let before = values(&f.pool.get_page(reader, f.page_id(1), Permissions::ReadOnly).unwrap());
        f.pool.transaction_complete(reader, true).unwrap();

        let writer = TransactionId::new();
        let victim = {
            let page = f.pool.get_page(writer, f.page_id(1), Permissions::ReadWrite).unwrap();
            let guard = page.read();
            guard.tuple(0).cloned().unwrap()
        };
        f.pool.delete_tuple(writer, &victim).unwrap();
        let mut added = f.row(5);
        f.pool.insert_tuple(writer, f.file.id(), &mut added).unwrap();
        f.pool.transaction_complete(writer, false).unwrap();

        let after = f.pool.get_page(TransactionId::new(), f.page_id(1), Permissions::ReadOnly).unwrap();
        assert_eq!(values(&after), before);
        assert!(!after.read().is_dirty());
        let untouched = f.pool.get_page(TransactionId::new(), f.page_id(0), Permissions::ReadOnly).unwrap();
        assert_eq!(values(&untouched), vec![Field::Int(0)]);
    }

    #[test]
    fn commit_after_flush_becomes_the_rollback_point() {
        let f = fixture(1, small(4));
        let t1 = TransactionId::new();
        f.pool.insert_tuple(t1, f.file.id(), &mut f.row(1)).unwrap();
        f.pool.flush_all_pages().unwrap();
        f.pool.transaction_complete(t1, true).unwrap();

        let t2 = TransactionId::new();
        f.pool.insert_tuple(t2, f.file.id(), &mut f.row(2)).unwrap();
        f.pool.transaction_complete(t2, false).unwrap();

        let reader = TransactionId::new();
        let page = f.pool.get_page(reader, f.page_id(0), Permissions::ReadOnly).unwrap();
        assert_eq!(values(&page), vec![Field::Int(0), Field::Int(1)]);
        f.pool.transaction_complete(reader, true).unwrap();

        let t3 = TransactionId::new();
        f.pool.insert_tuple(t3, f.file.id(), &mut f.row(3)).unwrap();
        f.pool.transaction_complete(t3, true).unwrap();
        let on_disk: Vec<_> = f
            .file
            .read_page(f.page_id(0))
            .unwrap()
            .tuples()
            .filter_map(|tuple| tuple.field(0).cloned())
            .collect();
        assert_eq!(on_disk, vec![Field::Int(0), Field::Int(1), Field::Int(3)]);
    }

    #[test]
    fn abort_after_flush_restores_cache_and_file() {
        let f = fixture(1, small(4));
        let tid = TransactionId::new();
        f.pool.insert_tuple(tid, f.file.id(), &mut f.row(1)).unwrap();
        f.pool.flush_pages(tid).unwrap();
        assert_eq!(f.file.read_page(f.page_id(0)).unwrap().tuples().count(), 2);

        f.pool.transaction_complete(tid, false).unwrap();

        let reader = TransactionId::new();
        let page = f.pool.get_page(reader, f.page_id(0), Permissions::ReadOnly).unwrap();
        assert_eq!(values(&page), vec![Field::Int(0)]);
        assert!(!page.read().is_dirty());
        assert_eq!(f.file.read_page(f.page_id(0)).unwrap().tuples().count(), 1);
    }

    #[test]
    fn completion_ignores_pages_locked_elsewhere() {
        let f = fixture(2, small(4));
        let (t1, t2) = (TransactionId::new(), TransactionId::new());
        let held = f.pool.get_page(t1, f.page_id(0), Permissions::ReadWrite).unwrap();
        let victim = {
            let page = f.pool.get_page(t2, f.page_id(1), Permissions::ReadWrite).unwrap();
            let guard = page.read();
            guard.tuple(0).cloned().unwrap()
        };
        f.pool.delete_tuple(t2, &victim).unwrap();

        let guard = held.write();
        let committer = {
            let pool = Arc::clone(&f.pool);
            spawn(move || pool.transaction_complete(t2, true))
        };
        committer.join().unwrap().unwrap();
        assert!(f.pool.get_page(t1, f.page_id(1), Permissions::ReadOnly).is_ok());
        drop(guard);

        assert_eq!(f.file.read_page(f.page_id(1)).unwrap().tuples().count(), 0);
    }

    #[test]
    fn flush_and_discard() {
        let f = fixture(1, small(4));
        let tid = TransactionId::new();
        f.pool.insert_tuple(tid, f.file.id(), &mut f.row(9)).unwrap();

        f.pool.flush_pages(tid).unwrap();
        assert_eq!(f.file.read_page(f.page_id(0)).unwrap().tuples().count(), 2);
        f.pool.flush_all_pages().unwrap();
        f.pool.flush_page(f.page_id(7)).unwrap();

        f.pool.discard_page(f.page_id(0));
        assert!(!f.pool.is_cached(f.page_id(0)));
        assert!(f.pool.is_empty());
    }

    #[test]
    fn discarded_dirty_page_is_reread_clean() {
        let f = fixture(1, small(4));
        let tid = TransactionId::new();
        f.pool.insert_tuple(tid, f.file.id(), &mut f.row(9)).unwrap();
        f.pool.discard_page(f.page_id(0));

        let page = f.pool.get_page(tid, f.page_id(0), Permissions::ReadOnly).unwrap();
        assert_eq!(values(&page), vec![Field::Int(0)]);
    }

    #[test]
    fn insert_into_unknown_table_fails() {
        let f = fixture(0, small(2));
        assert!(matches!(
            f.pool.insert_tuple(TransactionId::new(), TableId(1), &mut f.row(1)),
            Err(DbError::UnknownTable(_))
        ));
        assert!(matches!(
            f.pool.delete_tuple(TransactionId::new(), &f.row(1)),
            Err(DbError::NoRecordId)
        ));
    }

    #[test]
    fn missing_page_is_an_error() {
        let f = fixture(1, small(2));
        assert!(matches!(
            f.pool.get_page(TransactionId::new(), f.page_id(5), Permissions::ReadOnly),
            Err(DbError::PageOutOfRange(_))
        ));
    }

    #[test]
    fn writer_waits_for_readers() {
        let f = fixture(1, small(4));
        let (r1, r2, w) = (TransactionId::new(), TransactionId::new(), TransactionId::new());
        let x = f.page_id(0);
        f.pool.get_page(r1, x, Permissions::ReadOnly).unwrap();
        f.pool.get_page(r2, x, Permissions::ReadOnly).unwrap();

        let writer = {
            let pool = Arc::clone(&f.pool);
            spawn(move || {
                pool.get_page(w, x, Permissions::ReadWrite).unwrap();
                Instant::now()
            })
        };

        sleep(Duration::from_millis(50));
        assert!(!f.pool.holds_lock(w, x));
        f.pool.transaction_complete(r1, true).unwrap();
        sleep(Duration::from_millis(50));
        assert!(!f.pool.holds_lock(w, x));

        let released_at = Instant::now();
        f.pool.transaction_complete(r2, true).unwrap();
        assert!(writer.join().unwrap() >= released_at);
        assert!(f.pool.holds_lock(w, x));
    }

    #[test]
    fn deadlock_surfaces_as_timeout() {
        let f = fixture(2, small(4).with_lock_timeout(Duration::from_millis(100)));
        let (t1, t2) = (TransactionId::new(), TransactionId::new());
        let (p0, p1) = (f.page_id(0), f.page_id(1));
        f.pool.get_page(t1, p0, Permissions::ReadWrite).unwrap();
        f.pool.get_page(t2, p1, Permissions::ReadWrite).unwrap();

        let other = {
            let pool = Arc::clone(&f.pool);
            spawn(move || pool.get_page(t2, p0, Permissions::ReadOnly).map(|_| ()))
        };
        let mine = f.pool.get_page(t1, p1, Permissions::ReadOnly).map(|_| ());
        let theirs = other.join().unwrap();

        assert!(matches!(mine, Err(DbError::LockTimeout { .. })));
        assert!(matches!(theirs, Err(DbError::LockTimeout { .. })));

        // aborting one side lets the other proceed
        f.pool.transaction_complete(t1, false).unwrap();
        f.pool.get_page(t2, p0, Permissions::ReadOnly).unwrap();
    }
}
