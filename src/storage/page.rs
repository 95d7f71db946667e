pub mod heap_page;

use std::fmt;

use crate::storage::error::{StorageError, StorageResult};

/// Default size of one page in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Identifies a page: the table (file) it belongs to and its position in it.
/// Ordered by table, then page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub table_id: u32,
    pub page_number: u32,
}

impl PageId {
    pub fn new(table_id: u32, page_number: u32) -> Self {
        Self {
            table_id,
            page_number,
        }
    }

    /// The integers that identify this page in a log image.
    pub fn serialize(&self) -> [i32; 2] {
        [self.table_id as i32, self.page_number as i32]
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({}:{})", self.table_id, self.page_number)
    }
}

/// Page layouts that can appear in a log record.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    Heap = 1,
}

impl PageKind {
    pub fn from_i32(value: i32) -> StorageResult<Self> {
        match value {
            1 => Ok(PageKind::Heap),
            _ => Err(StorageError::RecoveryCorruption(format!(
                "unknown page kind {}",
                value
            ))),
        }
    }
}

/// Page id layouts that can appear in a log record.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageIdKind {
    Heap = 1,
}

impl PageIdKind {
    pub fn from_i32(value: i32) -> StorageResult<Self> {
        match value {
            1 => Ok(PageIdKind::Heap),
            _ => Err(StorageError::RecoveryCorruption(format!(
                "unknown page id kind {}",
                value
            ))),
        }
    }

    /// Rebuilds a page id from the integers written by [`PageId::serialize`].
    pub fn build(&self, ints: &[i32]) -> StorageResult<PageId> {
        match (self, ints) {
            (PageIdKind::Heap, [table_id, page_number]) => {
                Ok(PageId::new(*table_id as u32, *page_number as u32))
            }
            (PageIdKind::Heap, _) => Err(StorageError::RecoveryCorruption(format!(
                "heap page id needs 2 integers, got {}",
                ints.len()
            ))),
        }
    }
}

pub use heap_page::HeapPage;
