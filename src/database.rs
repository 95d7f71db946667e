use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::access::tuple::TupleDesc;
use crate::catalog::{Catalog, TableId};
use crate::recovery::RecoveryStats;
use crate::storage::buffer::{BufferPool, DEFAULT_POOL_PAGES};
use crate::storage::error::StorageResult;
use crate::storage::page::DEFAULT_PAGE_SIZE;
use crate::storage::wal::LogFile;
use crate::transaction::{Transaction, TransactionManager};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Size of every page in bytes.
    pub page_size: usize,
    /// Number of pages the buffer pool caches.
    pub buffer_pool_pages: usize,
    /// How long a lock request may wait before its transaction is aborted.
    pub lock_wait_timeout: Duration,
    /// How long one blocked lock attempt sleeps before checking again.
    pub lock_retry_interval: Duration,
    /// Path of the write-ahead log.
    pub log_path: PathBuf,
    /// Whether forcing the log also syncs it to disk.
    pub sync_on_commit: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            page_size: DEFAULT_PAGE_SIZE,
            buffer_pool_pages: DEFAULT_POOL_PAGES,
            lock_wait_timeout: Duration::from_secs(5),
            lock_retry_interval: Duration::from_millis(10),
            log_path: PathBuf::from("heapdb.log"),
            sync_on_commit: true,
        }
    }
}

impl DatabaseConfig {
    /// Log inside `dir`, no fsync and a short lock timeout.
    pub fn for_testing(dir: &Path) -> Self {
        DatabaseConfig {
            lock_wait_timeout: Duration::from_secs(2),
            log_path: dir.join("heapdb.log"),
            sync_on_commit: false,
            ..Default::default()
        }
    }
}

/// One engine instance: catalog, log, buffer pool and transaction
/// bookkeeping, wired together.
///
/// Call [`Database::recover`] right after opening to replay a log left by
/// a previous run, and [`Database::shutdown`] to close cleanly. Dropping a
/// database without shutting it down behaves like a crash.
pub struct Database {
    config: DatabaseConfig,
    catalog: Arc<Catalog>,
    log: Arc<LogFile>,
    pool: Arc<BufferPool>,
}

impl Database {
    pub fn open(config: DatabaseConfig) -> StorageResult<Self> {
        let catalog = Arc::new(Catalog::new(config.page_size));
        let log = Arc::new(LogFile::open(
            &config.log_path,
            Arc::clone(&catalog),
            config.sync_on_commit,
        )?);
        let transactions = Arc::new(TransactionManager::new());
        let pool = BufferPool::new(
            config.buffer_pool_pages,
            Arc::clone(&catalog),
            Arc::clone(&log),
            transactions,
        )
        .with_lock_timeout(config.lock_wait_timeout, config.lock_retry_interval);

        info!(
            "Opened database (log {:?}, {} pages of {} bytes)",
            config.log_path, config.buffer_pool_pages, config.page_size
        );
        Ok(Self {
            config,
            catalog,
            log,
            pool: Arc::new(pool),
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn log(&self) -> &Arc<LogFile> {
        &self.log
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Registers a table stored in the heap file at `path`.
    pub fn add_table(&self, name: &str, path: &Path, desc: TupleDesc) -> StorageResult<TableId> {
        self.catalog.add_table(name, path, desc)
    }

    /// Replays the log against the registered tables. Tables must be
    /// registered first so their pages can be located.
    pub fn recover(&self) -> StorageResult<RecoveryStats> {
        let stats = self.log.recover(&self.pool)?;
        if let Some(max) = stats.max_tid {
            self.pool.transactions().advance_past(max);
        }
        Ok(stats)
    }

    pub fn begin(&self) -> StorageResult<Transaction> {
        Transaction::begin(Arc::clone(&self.pool))
    }

    /// Writes a checkpoint and truncates the log. Returns the new
    /// checkpoint offset.
    pub fn checkpoint(&self) -> StorageResult<u64> {
        self.log.log_checkpoint(&self.pool)
    }

    /// Final checkpoint, then close.
    pub fn shutdown(self) -> StorageResult<()> {
        self.checkpoint()?;
        self.log.force()?;
        info!("Database shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::tuple::Tuple;
    use crate::access::value::{Field, Type};
    use crate::storage::wal::LogContents;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = DatabaseConfig::default();
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.buffer_pool_pages, 50);
        assert!(config.sync_on_commit);
    }

    #[test]
    fn test_shutdown_leaves_clean_log() -> Result<()> {
        let dir = tempdir()?;
        let config = DatabaseConfig::for_testing(dir.path());
        let log_path = config.log_path.clone();
        let db = Database::open(config)?;
        let table = db.add_table(
            "t",
            &dir.path().join("t.dat"),
            TupleDesc::from_types(vec![Type::Int]),
        )?;
        let desc = db.catalog().tuple_desc(table)?;

        let txn = db.begin()?;
        db.pool()
            .insert_tuple(txn.id(), table, &mut Tuple::new(desc, vec![Field::Int(1)])?)?;
        txn.commit()?;
        db.shutdown()?;

        let contents = LogContents::read(&log_path)?;
        assert!(contents.checkpoint.is_some());
        assert_eq!(contents.records.len(), 1);
        Ok(())
    }

    #[test]
    fn test_recover_advances_transaction_ids() -> Result<()> {
        let dir = tempdir()?;
        let last = {
            let db = Database::open(DatabaseConfig::for_testing(dir.path()))?;
            let mut last = None;
            for _ in 0..3 {
                let txn = db.begin()?;
                last = Some(txn.id());
                txn.commit()?;
            }
            last
        };

        let db = Database::open(DatabaseConfig::for_testing(dir.path()))?;
        let stats = db.recover()?;
        assert_eq!(stats.max_tid, last);
        let txn = db.begin()?;
        assert!(Some(txn.id()) > last);
        Ok(())
    }

    #[test]
    fn test_open_without_recover_discards_old_log() -> Result<()> {
        let dir = tempdir()?;
        {
            let db = Database::open(DatabaseConfig::for_testing(dir.path()))?;
            db.begin()?.commit()?;
        }

        let db = Database::open(DatabaseConfig::for_testing(dir.path()))?;
        db.begin()?.commit()?;
        assert_eq!(db.log().dump()?.len(), 3);
        Ok(())
    }
}
