//! Page-level lock management for strict two-phase locking.
//!
//! The lock table maps each page to the entries held on it and the wait
//! table records, per transaction, the page it is currently blocked on.
//! `acquire` never blocks; callers retry after `wait_for_release`.

use std::collections::HashMap;
use std::time::Duration;

use log::debug;
use parking_lot::{Condvar, Mutex};

use super::deadlock::WaitForGraph;
use crate::storage::page::PageId;
use crate::transaction::TransactionId;

/// Lock modes supported by the system. `Exclusive` is the stronger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockMode {
    /// Shared lock for read operations.
    Shared,
    /// Exclusive lock for write operations.
    Exclusive,
}

impl LockMode {
    /// Checks if this lock mode is compatible with another.
    pub fn is_compatible_with(&self, other: &LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

/// A granted lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockEntry {
    pub tid: TransactionId,
    pub mode: LockMode,
}

/// An outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitEntry {
    pub page_id: PageId,
    pub mode: LockMode,
}

#[derive(Debug, Default)]
struct LockTable {
    locks: HashMap<PageId, Vec<LockEntry>>,
    waits: HashMap<TransactionId, WaitEntry>,
}

impl LockTable {
    fn try_grant(&mut self, tid: TransactionId, page_id: PageId, mode: LockMode) -> bool {
        let entries = self.locks.entry(page_id).or_default();

        let granted = if entries.is_empty() {
            entries.push(LockEntry { tid, mode });
            true
        } else if entries.iter().any(|e| e.tid == tid && e.mode >= mode) {
            true
        } else if mode == LockMode::Shared
            && entries.iter().all(|e| e.mode == LockMode::Shared)
        {
            entries.push(LockEntry { tid, mode });
            true
        } else if mode == LockMode::Exclusive && entries.iter().all(|e| e.tid == tid) {
            // Upgrade
            entries.clear();
            entries.push(LockEntry { tid, mode });
            true
        } else {
            false
        };

        if granted {
            self.waits.remove(&tid);
        } else {
            self.waits.insert(tid, WaitEntry { page_id, mode });
        }
        granted
    }

    fn wait_for_graph(&self) -> WaitForGraph {
        let mut graph = WaitForGraph::new();
        for (&waiter, wait) in &self.waits {
            let Some(entries) = self.locks.get(&wait.page_id) else {
                continue;
            };
            for entry in entries {
                if entry.tid != waiter && !entry.mode.is_compatible_with(&wait.mode) {
                    graph.add_edge(waiter, entry.tid);
                }
            }
        }
        graph
    }
}

/// Page lock manager.
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
}

impl LockManager {
    /// Creates a new lock manager.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
        }
    }

    /// Attempts to take `mode` on `page_id`. Returns false and records
    /// the transaction as waiting on the page when the lock conflicts.
    pub fn acquire(&self, tid: TransactionId, page_id: PageId, mode: LockMode) -> bool {
        let granted = self.table.lock().try_grant(tid, page_id, mode);
        if !granted {
            debug!("{} waits for {:?} on {}", tid, mode, page_id);
        }
        granted
    }

    /// Drops whatever `tid` holds on `page_id`.
    pub fn release(&self, tid: TransactionId, page_id: PageId) {
        let mut table = self.table.lock();
        if let Some(entries) = table.locks.get_mut(&page_id) {
            entries.retain(|e| e.tid != tid);
            if entries.is_empty() {
                table.locks.remove(&page_id);
            }
        }
        drop(table);
        self.released.notify_all();
    }

    /// Drops every lock of `tid` and its wait entry.
    pub fn release_all(&self, tid: TransactionId) {
        let mut table = self.table.lock();
        table.locks.retain(|_, entries| {
            entries.retain(|e| e.tid != tid);
            !entries.is_empty()
        });
        table.waits.remove(&tid);
        drop(table);
        self.released.notify_all();
    }

    /// Forgets that `tid` is waiting, without touching held locks.
    pub fn cancel_wait(&self, tid: TransactionId) {
        self.table.lock().waits.remove(&tid);
    }

    /// Whether `tid` holds any lock on `page_id`.
    pub fn holds(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.lock_mode(tid, page_id).is_some()
    }

    /// The mode `tid` holds on `page_id`, if any.
    pub fn lock_mode(&self, tid: TransactionId, page_id: PageId) -> Option<LockMode> {
        let table = self.table.lock();
        table
            .locks
            .get(&page_id)?
            .iter()
            .find(|e| e.tid == tid)
            .map(|e| e.mode)
    }

    /// Snapshot of the entries held on `page_id`.
    pub fn holders(&self, page_id: PageId) -> Vec<LockEntry> {
        self.table
            .lock()
            .locks
            .get(&page_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Pages on which `tid` holds a lock, in page order.
    pub fn pages_locked_by(&self, tid: TransactionId) -> Vec<PageId> {
        let table = self.table.lock();
        let mut pages: Vec<_> = table
            .locks
            .iter()
            .filter(|(_, entries)| entries.iter().any(|e| e.tid == tid))
            .map(|(&pid, _)| pid)
            .collect();
        pages.sort();
        pages
    }

    /// The page `tid` is blocked on, if any.
    pub fn waiting_on(&self, tid: TransactionId) -> Option<PageId> {
        self.table.lock().waits.get(&tid).map(|w| w.page_id)
    }

    /// Current wait-for graph built from the lock and wait tables.
    pub fn wait_for_graph(&self) -> WaitForGraph {
        self.table.lock().wait_for_graph()
    }

    /// Whether `tid` is part of a wait-for cycle.
    pub fn is_deadlocked(&self, tid: TransactionId) -> bool {
        let table = self.table.lock();
        if !table.waits.contains_key(&tid) {
            return false;
        }
        match table.wait_for_graph().find_cycle_through(tid) {
            Some(cycle) => {
                debug!("Deadlock cycle through {}: {:?}", tid, cycle);
                true
            }
            None => false,
        }
    }

    /// Blocks until some lock is released or `timeout` passes.
    pub fn wait_for_release(&self, timeout: Duration) {
        let mut table = self.table.lock();
        self.released.wait_for(&mut table, timeout);
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
