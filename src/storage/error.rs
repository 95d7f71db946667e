//! Storage layer error types.

use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Deadlock detected: {tid} waiting for {page_id}")]
    Deadlock { tid: TransactionId, page_id: PageId },

    #[error("Lock wait timed out: {tid} waiting for {page_id}")]
    LockTimeout { tid: TransactionId, page_id: PageId },

    #[error("Buffer pool exhausted: all {capacity} cached pages are dirty or pinned")]
    CapacityExhausted { capacity: usize },

    #[error("Unknown table: {0}")]
    UnknownTable(u32),

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Invalid record id: {0}")]
    InvalidRecordId(String),

    #[error("Slot {slot} on {page_id} is empty")]
    SlotEmpty { page_id: PageId, slot: usize },

    #[error("Page is full: {0}")]
    PageFull(PageId),

    #[error("Tuple does not match schema: {0}")]
    SchemaMismatch(String),

    #[error("Transaction {0} is not active")]
    TransactionNotActive(TransactionId),

    #[error("Transaction {0} has no log records")]
    UnknownTransaction(TransactionId),

    #[error("Transaction {0} already logged BEGIN")]
    DuplicateBegin(TransactionId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log corruption: {0}")]
    RecoveryCorruption(String),
}

impl StorageError {
    /// True when the error means the transaction has been aborted by the
    /// engine and the caller should retry it from the start.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            StorageError::Deadlock { .. } | StorageError::LockTimeout { .. }
        )
    }

    /// True for errors that are resolved at the transaction boundary.
    /// I/O failures and log corruption are not.
    pub fn is_recoverable(&self) -> bool {
        self.is_abort() || matches!(self, StorageError::CapacityExhausted { .. })
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
