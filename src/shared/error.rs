use super::definitions::{PageId, RecordId, TableId, TransactionId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    // buffer pool errors
    #[error("buffer pool full: every cached page is dirty")]
    EvictionImpossible,
    #[error("{tid} timed out waiting for a lock on page {page_id}")]
    LockTimeout { tid: TransactionId, page_id: PageId },
    // catalog errors
    #[error("unknown table {0}")]
    UnknownTable(TableId),
    #[error("unknown table name {0:?}")]
    UnknownTableName(String),
    // tuple and page errors
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("page {0} is corrupted: {1}")]
    Corrupted(PageId, String),
    #[error("page {0} has no empty slot")]
    PageFull(PageId),
    #[error("no tuple at {0:?}")]
    TupleNotFound(RecordId),
    #[error("tuple has no record id")]
    NoRecordId,
    #[error("page {0} is beyond the end of its file")]
    PageOutOfRange(PageId),
}
