//! Heap files: tables stored as unordered sequences of slotted pages.

mod file;
mod page;
mod scan;

pub use file::HeapFile;
pub use page::{header_size, slots_per_page, HeapPage};
pub use scan::HeapFileIterator;
