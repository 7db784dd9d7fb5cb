pub mod concurrency;

// Public exports
pub use concurrency::lock_manager::{LockManager, LockMode};
pub use concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};
pub use concurrency::transaction_manager::TransactionManager;
