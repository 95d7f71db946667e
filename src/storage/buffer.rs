pub mod lru;
pub mod replacer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::access::tuple::Tuple;
use crate::catalog::{Catalog, TableId};
use crate::concurrency::{LockManager, LockMode};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{HeapPage, PageId};
use crate::storage::wal::LogFile;
use crate::transaction::{TransactionId, TransactionManager, TransactionState};
use lru::LruReplacer;
use replacer::Replacer;

/// A cached page. A page is pinned while anyone besides the pool holds a
/// clone of its handle.
pub type PageRef = Arc<RwLock<HeapPage>>;

pub const DEFAULT_POOL_PAGES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

impl Permissions {
    pub fn lock_mode(&self) -> LockMode {
        match self {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

pub(crate) struct PoolState {
    pages: HashMap<PageId, PageRef>,
    replacer: Box<dyn Replacer>,
}

/// Bounded page cache that also owns page locking and the transaction
/// completion protocol.
///
/// Dirty pages are never evicted, so nothing a running transaction wrote
/// reaches the table files before it commits (except through a flush,
/// which logs the page first).
pub struct BufferPool {
    catalog: Arc<Catalog>,
    log: Arc<LogFile>,
    locks: LockManager,
    transactions: Arc<TransactionManager>,
    state: Mutex<PoolState>,
    capacity: usize,
    lock_timeout: Duration,
    retry_interval: Duration,
}

impl BufferPool {
    pub fn new(
        capacity: usize,
        catalog: Arc<Catalog>,
        log: Arc<LogFile>,
        transactions: Arc<TransactionManager>,
    ) -> Self {
        Self {
            catalog,
            log,
            locks: LockManager::new(),
            transactions,
            state: Mutex::new(PoolState {
                pages: HashMap::with_capacity(capacity),
                replacer: Box::new(LruReplacer::new()),
            }),
            capacity,
            lock_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(10),
        }
    }

    /// Sets how long `get_page` waits for a lock before aborting the
    /// requester, and how often it rechecks the wait-for graph meanwhile.
    pub fn with_lock_timeout(mut self, timeout: Duration, retry_interval: Duration) -> Self {
        self.lock_timeout = timeout;
        self.retry_interval = retry_interval;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn log(&self) -> &Arc<LogFile> {
        &self.log
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    pub fn num_cached(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn is_cached(&self, page_id: PageId) -> bool {
        self.state.lock().pages.contains_key(&page_id)
    }

    /// Fetches a page on behalf of `tid`, first acquiring a shared lock for
    /// `ReadOnly` or an exclusive lock for `ReadWrite`.
    ///
    /// Blocks while the lock is held incompatibly. If waiting would close a
    /// cycle in the wait-for graph, or the wait outlasts the lock timeout,
    /// `tid` is aborted and a `Deadlock`/`LockTimeout` error is returned.
    pub fn get_page(
        &self,
        tid: TransactionId,
        page_id: PageId,
        perm: Permissions,
    ) -> StorageResult<PageRef> {
        self.transactions.ensure_active(tid)?;
        self.acquire_lock(tid, page_id, perm.lock_mode())?;

        let mut state = self.state.lock();
        self.fetch_locked(&mut state, page_id)
    }

    fn acquire_lock(
        &self,
        tid: TransactionId,
        page_id: PageId,
        mode: LockMode,
    ) -> StorageResult<()> {
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            if self.locks.acquire(tid, page_id, mode) {
                return Ok(());
            }

            if self.locks.is_deadlocked(tid) {
                warn!("{} deadlocked waiting for {:?} on {}", tid, mode, page_id);
                self.abort_waiter(tid)?;
                return Err(StorageError::Deadlock { tid, page_id });
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("{} timed out waiting for {:?} on {}", tid, mode, page_id);
                self.abort_waiter(tid)?;
                return Err(StorageError::LockTimeout { tid, page_id });
            }

            self.locks
                .wait_for_release((deadline - now).min(self.retry_interval));
        }
    }

    fn abort_waiter(&self, tid: TransactionId) -> StorageResult<()> {
        self.locks.cancel_wait(tid);
        self.transaction_complete(tid, false)
    }

    fn fetch_locked(&self, state: &mut PoolState, page_id: PageId) -> StorageResult<PageRef> {
        if let Some(page) = state.pages.get(&page_id) {
            let page = Arc::clone(page);
            state.replacer.record_access(page_id);
            return Ok(page);
        }

        if state.pages.len() >= self.capacity {
            self.evict_locked(state)?;
        }

        let file = self.catalog.database_file(page_id.table_id)?;
        let page = Arc::new(RwLock::new(file.read_page(page_id)?));
        state.pages.insert(page_id, Arc::clone(&page));
        state.replacer.record_access(page_id);
        Ok(page)
    }

    /// Drops the least recently used page that is clean and unpinned.
    fn evict_locked(&self, state: &mut PoolState) -> StorageResult<()> {
        let PoolState { pages, replacer } = state;
        let victim = replacer.victim(&mut |page_id| match pages.get(&page_id) {
            Some(page) => Arc::strong_count(page) == 1 && page.read().dirtier().is_none(),
            None => true,
        });

        match victim {
            Some(page_id) => {
                pages.remove(&page_id);
                debug!("Evicted {} ({} pages still cached)", page_id, replacer.size());
                Ok(())
            }
            None => Err(StorageError::CapacityExhausted {
                capacity: self.capacity,
            }),
        }
    }

    /// Inserts `tuple` into table `table_id` on behalf of `tid` and sets its
    /// record id. Every page touched is left dirty with `tid` as dirtier.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> StorageResult<Vec<PageId>> {
        self.transactions.ensure_active(tid)?;
        let file = self.catalog.database_file(table_id)?;
        let pages = file.insert_tuple(tid, tuple, self)?;
        self.mark_dirty(tid, &pages);
        Ok(pages)
    }

    /// Deletes `tuple` from the table its record id points into.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> StorageResult<Vec<PageId>> {
        self.transactions.ensure_active(tid)?;
        let rid = tuple
            .record_id()
            .ok_or_else(|| StorageError::InvalidRecordId("tuple has no record id".into()))?;
        let file = self.catalog.database_file(rid.page_id.table_id)?;
        let pages = file.delete_tuple(tid, tuple, self)?;
        self.mark_dirty(tid, &pages);
        Ok(pages)
    }

    fn mark_dirty(&self, tid: TransactionId, page_ids: &[PageId]) {
        let state = self.state.lock();
        for page_id in page_ids {
            if let Some(page) = state.pages.get(page_id) {
                page.write().mark_dirty(Some(tid));
            }
        }
    }

    /// Writes a dirty cached page to its table file, logging an UPDATE for
    /// it first. The page of a running transaction keeps its dirty marker;
    /// only commit clears it.
    pub fn flush_page(&self, page_id: PageId) -> StorageResult<()> {
        let state = self.state.lock();
        self.flush_locked(&state, page_id)
    }

    /// Flushes every dirty page in the pool.
    pub fn flush_all_pages(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        self.flush_all_locked(&mut state)
    }

    /// Flushes every page `tid` has dirtied.
    pub fn flush_pages(&self, tid: TransactionId) -> StorageResult<()> {
        let state = self.state.lock();
        for (page_id, _) in Self::dirtied_by(&state, tid) {
            self.flush_locked(&state, page_id)?;
        }
        Ok(())
    }

    pub(crate) fn flush_all_locked(&self, state: &mut PoolState) -> StorageResult<()> {
        let mut page_ids: Vec<_> = state.pages.keys().copied().collect();
        page_ids.sort();
        for page_id in page_ids {
            self.flush_locked(state, page_id)?;
        }
        Ok(())
    }

    fn flush_locked(&self, state: &PoolState, page_id: PageId) -> StorageResult<()> {
        let Some(page) = state.pages.get(&page_id) else {
            return Ok(());
        };
        let mut page = page.write();
        let Some(dirtier) = page.dirtier() else {
            return Ok(());
        };

        // A finished dirtier committed but failed to write this page. Its
        // UPDATE and COMMIT records are already durable.
        let committed = self.transactions.state(dirtier).is_none();
        if !committed {
            self.log
                .log_write(dirtier, page.before_image(), page.image())?;
            self.log.force()?;
        }
        self.catalog
            .database_file(page_id.table_id)?
            .write_page(&page)?;
        if committed {
            page.mark_dirty(None);
            page.set_before_image();
        }
        debug!("Flushed {} dirtied by {}", page_id, dirtier);
        Ok(())
    }

    /// Drops a page from the cache without writing it.
    pub fn discard_page(&self, page_id: PageId) {
        let mut state = self.state.lock();
        self.discard_locked(&mut state, page_id);
    }

    pub(crate) fn discard_locked(&self, state: &mut PoolState, page_id: PageId) {
        if state.pages.remove(&page_id).is_some() {
            state.replacer.remove(page_id);
        }
    }

    /// Holds the pool monitor. Checkpoint and recovery keep it for their
    /// whole run so no commit or flush interleaves with them.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock()
    }

    /// Releases one lock before the transaction ends. Breaks two-phase
    /// locking; only for callers that know the page was not modified.
    pub fn unsafe_release_page(&self, tid: TransactionId, page_id: PageId) {
        self.locks.release(tid, page_id);
    }

    pub fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.locks.holds(tid, page_id)
    }

    /// Finishes `tid`.
    ///
    /// On commit every page it dirtied is logged, COMMIT is forced, and the
    /// pages are written to their table files and marked clean. On abort
    /// the log restores the table files from before-images and the cached
    /// copies are dropped.
    ///
    /// Whatever fails along the way, `tid` ends up `Committed` or `Aborted`
    /// with all of its locks released, and the first error is returned. A
    /// commit that fails before COMMIT is durable is aborted instead. One
    /// that fails after it keeps the unwritten pages dirty; the next flush
    /// writes them, and recovery redoes them after a crash.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> StorageResult<()> {
        let mut state = self.state.lock();
        let dirty = Self::dirtied_by(&state, tid);

        if commit {
            self.transactions
                .transition(tid, TransactionState::Committing)?;

            if let Err(e) = self.log_commit_locked(tid, &dirty) {
                warn!("{} could not log its commit, aborting: {}", tid, e);
                self.transactions
                    .transition(tid, TransactionState::Aborting)?;
                if let Err(abort_err) = self.abort_locked(&mut state, tid, &dirty) {
                    warn!("{} failed to roll back: {}", tid, abort_err);
                }
                self.locks.release_all(tid);
                self.transactions
                    .transition(tid, TransactionState::Aborted)?;
                return Err(e);
            }

            let written = self.write_committed(&dirty);
            self.locks.release_all(tid);
            self.transactions
                .transition(tid, TransactionState::Committed)?;
            match written {
                Ok(()) => info!("{} committed ({} pages)", tid, dirty.len()),
                Err(e) => {
                    warn!("{} committed but its pages were not written: {}", tid, e);
                    return Err(e);
                }
            }
        } else {
            self.transactions
                .transition(tid, TransactionState::Aborting)?;
            let result = self.abort_locked(&mut state, tid, &dirty);
            self.locks.release_all(tid);
            self.transactions
                .transition(tid, TransactionState::Aborted)?;
            result?;
            info!("{} aborted", tid);
        }
        Ok(())
    }

    /// Logs the after-image of every page in `dirty`, then COMMIT, forced.
    fn log_commit_locked(
        &self,
        tid: TransactionId,
        dirty: &[(PageId, PageRef)],
    ) -> StorageResult<()> {
        for (_, page) in dirty {
            let page = page.read();
            self.log
                .log_write(tid, page.before_image(), page.image())?;
        }
        self.log.log_commit(tid)
    }

    /// Writes committed pages and marks them clean. Stops at the first
    /// failure, leaving that page and the rest dirty.
    fn write_committed(&self, dirty: &[(PageId, PageRef)]) -> StorageResult<()> {
        for (page_id, page) in dirty {
            let mut page = page.write();
            self.catalog
                .database_file(page_id.table_id)?
                .write_page(&page)?;
            page.mark_dirty(None);
            page.set_before_image();
        }
        Ok(())
    }

    /// Rolls `tid` back through the log and drops every page it touched
    /// from the cache. Dirty pages are dropped even when the rollback fails.
    fn abort_locked(
        &self,
        state: &mut PoolState,
        tid: TransactionId,
        dirty: &[(PageId, PageRef)],
    ) -> StorageResult<()> {
        let restored = self.log.log_abort(tid);
        for (page_id, _) in dirty {
            self.discard_locked(state, *page_id);
        }
        for page_id in restored? {
            self.discard_locked(state, page_id);
        }
        Ok(())
    }

    /// Cached pages whose dirty marker names `tid`, in page order.
    fn dirtied_by(state: &PoolState, tid: TransactionId) -> Vec<(PageId, PageRef)> {
        let mut dirty: Vec<_> = state
            .pages
            .iter()
            .filter(|(_, page)| page.read().dirtier() == Some(tid))
            .map(|(&page_id, page)| (page_id, Arc::clone(page)))
            .collect();
        dirty.sort_by_key(|(page_id, _)| *page_id);
        dirty
    }
}
