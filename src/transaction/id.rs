//! Transaction ID generation.

use std::sync::atomic::{AtomicU64, Ordering};

/// A unique identifier for a transaction. Never reused within a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID with the given value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the inner u64 value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Txn{}", self.0)
    }
}

/// A thread-safe transaction ID generator.
pub struct TransactionIdGenerator {
    next_id: AtomicU64,
}

impl TransactionIdGenerator {
    /// Creates a new transaction ID generator starting from 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a generator whose first id is `first`. Used after recovery so
    /// ids already present in the log are not handed out again.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first.max(1)),
        }
    }

    /// Generates the next unique transaction ID.
    pub fn next(&self) -> TransactionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        TransactionId::new(id)
    }

    /// Moves the generator past `id` if it has not been passed yet.
    pub fn advance_past(&self, id: TransactionId) {
        self.next_id.fetch_max(id.0 + 1, Ordering::SeqCst);
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
