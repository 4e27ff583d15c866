use super::file::HeapFile;
use crate::buffer_pool_manager::BufferPool;
use crate::shared::{
    contracts::DbFile,
    definitions::{PageId, Permissions, TransactionId},
    error::Result,
};
use crate::storage::tuple::Tuple;
use std::vec;

#[derive(Debug)]
struct Cursor {
    page_number: usize,
    tuples: vec::IntoIter<Tuple>,
}

/// Page-by-page, slot-by-slot scan over a heap file.
///
/// Nothing is yielded until [`open`](Self::open) is called. Each page is
/// fetched through the buffer pool with a shared lock held by the scanning
/// transaction; the scan never releases those locks itself.
pub struct HeapFileIterator<'a> {
    file: &'a HeapFile,
    pool: &'a BufferPool,
    tid: TransactionId,
    cursor: Option<Cursor>,
}

impl<'a> HeapFileIterator<'a> {
    pub(super) fn new(file: &'a HeapFile, pool: &'a BufferPool, tid: TransactionId) -> Self {
        Self {
            file,
            pool,
            tid,
            cursor: None,
        }
    }

    pub fn open(&mut self) -> Result<()> {
        let tuples = if self.file.num_pages()? == 0 {
            Vec::new()
        } else {
            self.load(0)?
        };
        self.cursor = Some(Cursor {
            page_number: 0,
            tuples: tuples.into_iter(),
        });
        Ok(())
    }

    fn load(&self, page_number: usize) -> Result<Vec<Tuple>> {
        let page_id = PageId::new(self.file.id(), page_number);
        let page = self
            .pool
            .get_page(self.tid, page_id, Permissions::ReadOnly)?;
        let tuples = page.read().tuples().cloned().collect();
        Ok(tuples)
    }

    /// Moves to the next non-empty page when the current one is exhausted.
    pub fn has_next(&mut self) -> Result<bool> {
        let num_pages = self.file.num_pages()?;
        loop {
            let next_page = match &self.cursor {
                None => return Ok(false),
                Some(cursor) if cursor.tuples.len() > 0 => return Ok(true),
                Some(cursor) => cursor.page_number + 1,
            };
            if next_page >= num_pages {
                return Ok(false);
            }
            let tuples = self.load(next_page)?;
            self.cursor = Some(Cursor {
                page_number: next_page,
                tuples: tuples.into_iter(),
            });
        }
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.close();
        self.open()
    }

    pub fn close(&mut self) {
        self.cursor = None;
    }
}

impl<'a> Iterator for HeapFileIterator<'a> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => self.cursor.as_mut()?.tuples.next().map(Ok),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
