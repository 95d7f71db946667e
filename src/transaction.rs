//! Transaction management module.
//!
//! Transaction ids, the lifecycle state machine and the `Transaction`
//! handle that commits or aborts through the buffer pool.

pub mod id;
pub mod manager;
pub mod state;

// Re-export commonly used types
pub use id::{TransactionId, TransactionIdGenerator};
pub use manager::{Transaction, TransactionManager};
pub use state::{TransactionInfo, TransactionState};
