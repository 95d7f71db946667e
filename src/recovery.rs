//! Checkpointing and crash recovery on top of the write-ahead log.
//!
//! Both are implemented as methods on [`crate::storage::wal::LogFile`]
//! that take the buffer pool, because they need the pool monitor held
//! while they touch the log.

pub mod checkpoint;
pub mod replay;

pub use replay::RecoveryStats;
