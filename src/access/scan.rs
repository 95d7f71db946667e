//! Sequential scan over a heap file.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::access::heap::HeapFile;
use crate::access::tuple::Tuple;
use crate::storage::buffer::{BufferPool, Permissions};
use crate::storage::error::StorageResult;
use crate::storage::page::PageId;
use crate::transaction::TransactionId;

/// Iterator over every occupied slot of a heap file, in page then slot
/// order. Pages are fetched through the buffer pool with shared locks when
/// the scan reaches them, so pages appended before that point are seen.
///
/// Usable either through `open`/`has_next`/`next_tuple`/`rewind`/`close`
/// or as a std [`Iterator`] of `StorageResult<Tuple>`; the latter opens
/// the scan on first use.
pub struct HeapFileIterator {
    file: Arc<HeapFile>,
    pool: Arc<BufferPool>,
    tid: TransactionId,
    is_open: bool,
    next_page: u32,
    buffered: VecDeque<Tuple>,
}

impl HeapFileIterator {
    pub fn new(file: Arc<HeapFile>, tid: TransactionId, pool: Arc<BufferPool>) -> Self {
        Self {
            file,
            pool,
            tid,
            is_open: false,
            next_page: 0,
            buffered: VecDeque::new(),
        }
    }

    pub fn open(&mut self) {
        self.is_open = true;
        self.next_page = 0;
        self.buffered.clear();
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Whether another tuple is available. Always false when closed.
    pub fn has_next(&mut self) -> StorageResult<bool> {
        if !self.is_open {
            return Ok(false);
        }
        while self.buffered.is_empty() {
            if self.next_page >= self.file.num_pages()? {
                return Ok(false);
            }
            let pid = PageId::new(self.file.id(), self.next_page);
            let page = self.pool.get_page(self.tid, pid, Permissions::ReadOnly)?;
            self.buffered.extend(page.read().iter().cloned());
            self.next_page += 1;
        }
        Ok(true)
    }

    /// The next tuple, or `None` at the end of the file.
    pub fn next_tuple(&mut self) -> StorageResult<Option<Tuple>> {
        if !self.has_next()? {
            return Ok(None);
        }
        Ok(self.buffered.pop_front())
    }

    /// Restarts the scan from the first page.
    pub fn rewind(&mut self) {
        self.close();
        self.open();
    }

    pub fn close(&mut self) {
        self.is_open = false;
        self.buffered.clear();
    }
}

impl Iterator for HeapFileIterator {
    type Item = StorageResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.is_open && self.next_page == 0 {
            self.open();
        }
        self.next_tuple().transpose()
    }
}
