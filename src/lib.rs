// Export public modules
pub mod common;
pub mod storage;
pub mod index;
pub mod transaction;

// Re-export key items for convenient access
pub use storage::buffer::BufferPoolManager;
pub use storage::buffer::BufferPoolError;
pub use storage::buffer::ExtendibleHashTable;
pub use storage::buffer::LruReplacer;
pub use index::btree::BPlusTree;
pub use transaction::LockManager;
pub use transaction::Transaction;
pub use transaction::TransactionManager;
pub use transaction::wal::LogManager;
