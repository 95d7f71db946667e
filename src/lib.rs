pub mod access;
pub mod catalog;
pub mod concurrency;
pub mod database;
pub mod recovery;
pub mod storage;
pub mod transaction;
