use super::PageRef;
use crate::shared::{
    contracts::Page,
    definitions::PageId,
    error::{DbError, Result},
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Bounded map of cached pages plus their recency order, oldest first.
#[derive(Debug)]
pub struct PageTable {
    capacity: usize,
    table: HashMap<PageId, PageRef>,
    recency: VecDeque<PageId>,
}

impl PageTable {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            capacity,
            table: HashMap::with_capacity(capacity),
            recency: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn contains(&self, page_id: &PageId) -> bool {
        self.table.contains_key(page_id)
    }

    /// Looks up a page and marks it most recently used.
    pub fn get(&mut self, page_id: &PageId) -> Option<PageRef> {
        let page = Arc::clone(self.table.get(page_id)?);
        self.touch(page_id);
        Some(page)
    }

    /// Looks up a page without changing its recency.
    pub fn peek(&self, page_id: &PageId) -> Option<PageRef> {
        self.table.get(page_id).cloned()
    }

    fn touch(&mut self, page_id: &PageId) {
        if let Some(position) = self.recency.iter().position(|id| id == page_id) {
            self.recency.remove(position);
        }
        self.recency.push_back(*page_id);
    }

    /// Caches `page` as most recently used, evicting first when full.
    /// A page already cached under the same id is replaced in place.
    /// Returns the id of the evicted page, if any.
    pub fn insert(&mut self, page_id: PageId, page: PageRef) -> Result<Option<PageId>> {
        let mut evicted = None;
        if !self.table.contains_key(&page_id) && self.table.len() >= self.capacity {
            evicted = Some(self.evict()?);
        }
        self.table.insert(page_id, page);
        self.touch(&page_id);
        Ok(evicted)
    }

    /// Drops the least recently used clean page. Pages that are dirty, or
    /// being written by someone right now, are skipped.
    fn evict(&mut self) -> Result<PageId> {
        let table = &self.table;
        let position = self
            .recency
            .iter()
            .position(|page_id| {
                table
                    .get(page_id)
                    .and_then(|page| page.try_read())
                    .map_or(false, |page| !page.is_dirty())
            })
            .ok_or(DbError::EvictionImpossible)?;

        let victim = self.recency.remove(position).ok_or(DbError::EvictionImpossible)?;
        self.table.remove(&victim);
        Ok(victim)
    }

    pub fn remove(&mut self, page_id: &PageId) -> Option<PageRef> {
        let page = self.table.remove(page_id)?;
        if let Some(position) = self.recency.iter().position(|id| id == page_id) {
            self.recency.remove(position);
        }
        Some(page)
    }

    /// Cached pages, least recently used first.
    pub fn pages(&self) -> Vec<PageRef> {
        self.recency
            .iter()
            .filter_map(|page_id| self.table.get(page_id).cloned())
            .collect()
    }

    pub fn page_ids(&self) -> Vec<PageId> {
        self.recency.iter().copied().collect()
    }
}
