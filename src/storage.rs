//! Storage layer.
//!
//! - **Page**: fixed-size heap pages with a slot bitmap header
//! - **PageManager**: reads and writes whole pages of one table file
//! - **BufferPool**: bounded page cache, page locking and transaction
//!   completion
//! - **WAL**: the write-ahead log every change goes through before it
//!   reaches a table file

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;
pub mod wal;

pub use buffer::{BufferPool, PageRef, Permissions};
pub use disk::PageManager;
pub use error::{StorageError, StorageResult};
pub use page::{HeapPage, PageId, DEFAULT_PAGE_SIZE};
