// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use index::btree::BTreeIndex;
pub use index::btree::BTreeError;
pub use storage::buffer::BufferPoolError;
pub use storage::buffer::BufferPoolManager;
pub use transaction::concurrency::LockManager;
pub use transaction::concurrency::TransactionManager;
