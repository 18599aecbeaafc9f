pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;
pub mod wal;

pub use lock_manager::{LockError, LockManager, LockMode};
pub use transaction::{Transaction, TransactionError, TransactionState};
pub use transaction_manager::TransactionManager;
