use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::access::scan::HeapFileIterator;
use crate::access::tuple::{Tuple, TupleDesc};
use crate::catalog::TableId;
use crate::storage::buffer::{BufferPool, Permissions};
use crate::storage::disk::PageManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{HeapPage, PageId};
use crate::transaction::TransactionId;

/// A table stored as an unordered sequence of heap pages in one file.
///
/// Reads of page contents for transactional work go through the
/// [`BufferPool`]; the raw `read_page`/`write_page` methods are the pool's
/// and the log's way down to disk.
pub struct HeapFile {
    path: PathBuf,
    table_id: TableId,
    desc: Arc<TupleDesc>,
    page_size: usize,
    disk: Mutex<PageManager>,
}

impl HeapFile {
    /// Opens the file at `path`, creating it empty if missing. Fails with
    /// `SchemaMismatch` when not even one tuple fits on a page.
    pub fn open(
        path: &Path,
        table_id: TableId,
        desc: Arc<TupleDesc>,
        page_size: usize,
    ) -> StorageResult<Self> {
        if HeapPage::num_slots_for(page_size, desc.byte_size()) == 0 {
            return Err(StorageError::SchemaMismatch(format!(
                "a ({}) tuple is {} bytes, too wide for {} byte pages",
                desc,
                desc.byte_size(),
                page_size
            )));
        }
        let disk = PageManager::open_or_create(path, table_id, page_size)?;
        Ok(Self {
            path: path.to_path_buf(),
            table_id,
            desc,
            page_size,
            disk: Mutex::new(disk),
        })
    }

    pub fn id(&self) -> TableId {
        self.table_id
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        self.disk.lock().num_pages()
    }

    /// Reads a page straight from disk.
    pub fn read_page(&self, pid: PageId) -> StorageResult<HeapPage> {
        self.check_table(pid)?;
        let mut buf = vec![0u8; self.page_size];
        self.disk.lock().read_page(pid.page_number, &mut buf)?;
        HeapPage::new(pid, &buf, Arc::clone(&self.desc), self.page_size)
    }

    /// Writes a page straight to disk.
    pub fn write_page(&self, page: &HeapPage) -> StorageResult<()> {
        self.check_table(page.id())?;
        self.write_page_bytes(page.id().page_number, &page.to_bytes())
    }

    pub fn write_page_bytes(&self, page_number: u32, data: &[u8]) -> StorageResult<()> {
        self.disk.lock().write_page(page_number, data)
    }

    /// Inserts into the first page with a free slot, appending a new page
    /// when every page is full. Returns the pages modified.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        tuple: &mut Tuple,
        pool: &BufferPool,
    ) -> StorageResult<Vec<PageId>> {
        if **tuple.desc() != *self.desc {
            return Err(StorageError::SchemaMismatch(format!(
                "tuple is ({}), table {} holds ({})",
                tuple.desc(),
                self.table_id,
                self.desc
            )));
        }

        let num_pages = self.num_pages()?;
        for page_number in 0..num_pages {
            let pid = PageId::new(self.table_id, page_number);
            let page = pool.get_page(tid, pid, Permissions::ReadWrite)?;
            let mut page = page.write();
            if page.num_empty_slots() > 0 {
                page.insert_tuple(tuple)?;
                page.mark_dirty(Some(tid));
                return Ok(vec![pid]);
            }
        }

        let page_number = {
            let mut disk = self.disk.lock();
            let page_number = disk.num_pages()?;
            disk.write_page(page_number, &HeapPage::empty_page_data(self.page_size))?;
            page_number
        };
        let pid = PageId::new(self.table_id, page_number);
        debug!("{} appended {}", tid, pid);

        let page = pool.get_page(tid, pid, Permissions::ReadWrite)?;
        let mut page = page.write();
        page.insert_tuple(tuple)?;
        page.mark_dirty(Some(tid));
        Ok(vec![pid])
    }

    /// Deletes the tuple at its record id. Returns the pages modified.
    pub fn delete_tuple(
        &self,
        tid: TransactionId,
        tuple: &Tuple,
        pool: &BufferPool,
    ) -> StorageResult<Vec<PageId>> {
        let rid = tuple
            .record_id()
            .ok_or_else(|| StorageError::InvalidRecordId("tuple has no record id".into()))?;
        if rid.page_id.table_id != self.table_id || rid.page_id.page_number >= self.num_pages()? {
            return Err(StorageError::InvalidRecordId(format!(
                "{} is not in table {}",
                rid, self.table_id
            )));
        }

        let page = pool.get_page(tid, rid.page_id, Permissions::ReadWrite)?;
        let mut page = page.write();
        page.delete_tuple(tuple)?;
        page.mark_dirty(Some(tid));
        Ok(vec![rid.page_id])
    }

    /// Sequential scan over every tuple of the file on behalf of `tid`.
    pub fn iterator(
        self: &Arc<Self>,
        tid: TransactionId,
        pool: Arc<BufferPool>,
    ) -> HeapFileIterator {
        HeapFileIterator::new(Arc::clone(self), tid, pool)
    }

    fn check_table(&self, pid: PageId) -> StorageResult<()> {
        if pid.table_id != self.table_id {
            return Err(StorageError::PageNotFound(pid));
        }
        Ok(())
    }
}
