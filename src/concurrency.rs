//! Concurrency control module.
//!
//! Page-level shared/exclusive locking for strict two-phase locking, and
//! deadlock detection over the wait-for graph derived from the lock table.

pub mod deadlock;
pub mod lock;

pub use deadlock::WaitForGraph;
pub use lock::{LockEntry, LockManager, LockMode, WaitEntry};
