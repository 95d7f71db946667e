//! Access layer for tuple-oriented operations.
//!
//! - **Type / Field**: the fixed-width column types and their values
//! - **TupleDesc / Tuple**: schemas and rows, with record ids once placed
//! - **HeapFile**: a table as an unordered file of heap pages
//! - **HeapFileIterator**: restartable sequential scan through the pool

pub mod heap;
pub mod scan;
pub mod tuple;
pub mod value;

pub use heap::HeapFile;
pub use scan::HeapFileIterator;
pub use tuple::{RecordId, Tuple, TupleDesc};
pub use value::{Field, Type};
