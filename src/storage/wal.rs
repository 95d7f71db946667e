//! Write-Ahead Logging (WAL) module.
//!
//! - Record types and their big-endian encoding
//! - The log file: append, force, rollback and truncation
//!
//! Checkpointing and crash recovery live in [`crate::recovery`].

pub mod log_file;
pub mod record;

pub use log_file::{LogContents, LogFile, HEADER_SIZE, NO_CHECKPOINT};
pub use record::{LogRecord, LogRecordType, PageImage};
