//! Transaction manager for coordinating transaction lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use parking_lot::RwLock;

use super::id::{TransactionId, TransactionIdGenerator};
use super::state::{TransactionInfo, TransactionState};
use crate::storage::buffer::BufferPool;
use crate::storage::error::{StorageError, StorageResult};

/// Tracks the state of every transaction that has started and not yet
/// finished. A transaction is forgotten once it reaches `Committed` or
/// `Aborted`; a forgotten id is reported as not active.
pub struct TransactionManager {
    id_generator: TransactionIdGenerator,
    transactions: RwLock<HashMap<TransactionId, TransactionInfo>>,
}

impl TransactionManager {
    /// Creates a new transaction manager.
    pub fn new() -> Self {
        Self {
            id_generator: TransactionIdGenerator::new(),
            transactions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a fresh transaction in the `Active` state.
    pub fn begin(&self) -> TransactionId {
        let id = self.id_generator.next();
        self.transactions.write().insert(id, TransactionInfo::new(id));
        id
    }

    /// Moves `id` to `next`, dropping it on a terminal state. Unknown ids
    /// and illegal edges are rejected with `TransactionNotActive`.
    pub fn transition(&self, id: TransactionId, next: TransactionState) -> StorageResult<()> {
        let mut transactions = self.transactions.write();
        let info = transactions
            .get_mut(&id)
            .ok_or(StorageError::TransactionNotActive(id))?;

        if !info.transition(next) {
            return Err(StorageError::TransactionNotActive(id));
        }
        if next.is_finished() {
            transactions.remove(&id);
        }
        Ok(())
    }

    /// State of a transaction that has not finished yet.
    pub fn state(&self, id: TransactionId) -> Option<TransactionState> {
        self.transactions.read().get(&id).map(|info| info.state)
    }

    /// Checks if a transaction exists and is active.
    pub fn is_active(&self, id: TransactionId) -> bool {
        self.state(id).map(|s| s.is_active()).unwrap_or(false)
    }

    /// Fails with `TransactionNotActive` unless `id` is active.
    pub fn ensure_active(&self, id: TransactionId) -> StorageResult<()> {
        if self.is_active(id) {
            Ok(())
        } else {
            Err(StorageError::TransactionNotActive(id))
        }
    }

    /// Returns the active transactions in id order.
    pub fn active_transactions(&self) -> Vec<TransactionId> {
        let mut ids: Vec<_> = self
            .transactions
            .read()
            .values()
            .filter(|info| info.state.is_active())
            .map(|info| info.id)
            .collect();
        ids.sort();
        ids
    }

    /// Makes sure ids handed out from now on are greater than `id`.
    pub fn advance_past(&self, id: TransactionId) {
        self.id_generator.advance_past(id);
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle to a transaction that automatically aborts on drop if still active.
pub struct Transaction {
    id: TransactionId,
    pool: Arc<BufferPool>,
    finished: bool,
}

impl Transaction {
    /// Starts a transaction and writes its BEGIN record.
    pub fn begin(pool: Arc<BufferPool>) -> StorageResult<Self> {
        let id = pool.transactions().begin();
        if let Err(e) = pool.log().log_begin(id) {
            let manager = pool.transactions();
            manager.transition(id, TransactionState::Aborting)?;
            manager.transition(id, TransactionState::Aborted)?;
            return Err(e);
        }
        Ok(Self {
            id,
            pool,
            finished: false,
        })
    }

    /// Gets the transaction ID.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// The buffer pool this transaction works against.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Commits the transaction.
    pub fn commit(mut self) -> StorageResult<()> {
        self.finished = true;
        self.pool.transaction_complete(self.id, true)
    }

    /// Aborts the transaction. Aborting one the engine already aborted
    /// (deadlock, lock timeout) is a no-op.
    pub fn abort(mut self) -> StorageResult<()> {
        self.finished = true;
        if self.pool.transactions().is_active(self.id) {
            self.pool.transaction_complete(self.id, false)
        } else {
            Ok(())
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && self.pool.transactions().is_active(self.id) {
            if let Err(e) = self.pool.transaction_complete(self.id, false) {
                warn!("Failed to abort {} on drop: {}", self.id, e);
            }
        }
    }
}
