use crate::shared::{
    definitions::{LockMode, PageId, TransactionId},
    error::{DbError, Result},
};
use log::{trace, warn};
use parking_lot::{Condvar, Mutex};
use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

#[derive(Default, Debug)]
/* private */
struct PageLocks {
    shared: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl PageLocks {
    fn is_free(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none()
    }

    fn grants(&self, tid: TransactionId, mode: LockMode) -> bool {
        let exclusive_ok = self.exclusive.map_or(true, |holder| holder == tid);
        match mode {
            LockMode::Shared => exclusive_ok,
            // upgrade is allowed when the requester is the only reader
            LockMode::Exclusive => exclusive_ok && self.shared.iter().all(|&holder| holder == tid),
        }
    }
}

#[derive(Default, Debug)]
/* private */
struct LockTable {
    pages: HashMap<PageId, PageLocks>,
    held: HashMap<TransactionId, HashSet<PageId>>,
}

impl LockTable {
    fn try_grant(&mut self, tid: TransactionId, page_id: PageId, mode: LockMode) -> bool {
        let locks = self.pages.entry(page_id).or_default();
        if !locks.grants(tid, mode) {
            if locks.is_free() {
                self.pages.remove(&page_id);
            }
            return false;
        }

        match mode {
            LockMode::Shared if locks.exclusive != Some(tid) => {
                locks.shared.insert(tid);
            }
            LockMode::Shared => {}
            LockMode::Exclusive => locks.exclusive = Some(tid),
        }
        self.held.entry(tid).or_default().insert(page_id);
        true
    }

    fn release(&mut self, tid: TransactionId, page_id: PageId) -> bool {
        let Some(locks) = self.pages.get_mut(&page_id) else { return false };
        let mut released = locks.shared.remove(&tid);
        if locks.exclusive == Some(tid) {
            locks.exclusive = None;
            released = true;
        }
        if locks.is_free() {
            self.pages.remove(&page_id);
        }

        if let Some(pages) = self.held.get_mut(&tid) {
            pages.remove(&page_id);
            if pages.is_empty() {
                self.held.remove(&tid);
            }
        }
        released
    }

    fn release_all(&mut self, tid: TransactionId) -> usize {
        let Some(pages) = self.held.remove(&tid) else { return 0 };
        for page_id in &pages {
            if let Some(locks) = self.pages.get_mut(page_id) {
                locks.shared.remove(&tid);
                if locks.exclusive == Some(tid) {
                    locks.exclusive = None;
                }
                if locks.is_free() {
                    self.pages.remove(page_id);
                }
            }
        }
        pages.len()
    }

    fn mode(&self, tid: TransactionId, page_id: PageId) -> Option<LockMode> {
        let locks = self.pages.get(&page_id)?;
        if locks.exclusive == Some(tid) {
            Some(LockMode::Exclusive)
        } else if locks.shared.contains(&tid) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }
}

/// Page-granular shared/exclusive locks held on behalf of transactions.
///
/// Every grant decision is taken under one mutex. Waiters park on a condition
/// variable that is signalled whenever a lock is released, and also re-check
/// every poll interval. There is no deadlock detection: transactions that
/// wait on each other in a cycle wait forever unless the caller supplies a
/// timeout.
#[derive(Default, Debug)]
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking attempt: grants the lock and returns true, or changes
    /// nothing and returns false.
    pub fn try_acquire(&self, tid: TransactionId, page_id: PageId, mode: LockMode) -> bool {
        let granted = self.table.lock().try_grant(tid, page_id, mode);
        if granted {
            trace!("{} granted {:?} lock on {}", tid, mode, page_id);
        }
        granted
    }

    /// Blocks until the lock is granted. With `timeout` set, gives up after
    /// that long with [`DbError::LockTimeout`].
    pub fn acquire(
        &self,
        tid: TransactionId,
        page_id: PageId,
        mode: LockMode,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut table = self.table.lock();
        loop {
            if table.try_grant(tid, page_id, mode) {
                trace!("{} granted {:?} lock on {}", tid, mode, page_id);
                return Ok(());
            }

            let mut wait = poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    warn!("{} timed out waiting for {:?} lock on {}", tid, mode, page_id);
                    return Err(DbError::LockTimeout { tid, page_id });
                }
                wait = wait.min(deadline - now);
            }
            self.released.wait_for(&mut table, wait);
        }
    }

    pub fn release(&self, tid: TransactionId, page_id: PageId) {
        if self.table.lock().release(tid, page_id) {
            trace!("{} released lock on {}", tid, page_id);
            self.released.notify_all();
        }
    }

    /// Drops every lock `tid` holds. Safe to call repeatedly.
    pub fn release_all(&self, tid: TransactionId) {
        let count = self.table.lock().release_all(tid);
        if count > 0 {
            trace!("{} released {} locks", tid, count);
            self.released.notify_all();
        }
    }

    pub fn holds(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.lock_mode(tid, page_id).is_some()
    }

    /// The strongest lock `tid` holds on `page_id`.
    pub fn lock_mode(&self, tid: TransactionId, page_id: PageId) -> Option<LockMode> {
        self.table.lock().mode(tid, page_id)
    }

    pub fn pages_locked_by(&self, tid: TransactionId) -> Vec<PageId> {
        let table = self.table.lock();
        let mut pages: Vec<_> = table
            .held
            .get(&tid)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default();
        pages.sort();
        pages
    }

    pub fn shared_holders(&self, page_id: PageId) -> Vec<TransactionId> {
        let table = self.table.lock();
        let mut holders: Vec<_> = table
            .pages
            .get(&page_id)
            .map(|locks| locks.shared.iter().copied().collect())
            .unwrap_or_default();
        holders.sort();
        holders
    }

    pub fn exclusive_holder(&self, page_id: PageId) -> Option<TransactionId> {
        self.table.lock().pages.get(&page_id)?.exclusive
    }
}
