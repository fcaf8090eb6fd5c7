use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::common::types::TxnId;
use crate::transaction::concurrency::error::TransactionAbort;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Creates and finishes transactions, releasing held locks on completion
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a transaction at the given isolation level
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Commit: mark the transaction committed and release everything it holds
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionAbort> {
        txn.set_state(TransactionState::Committed);
        self.release_all_locks(txn)?;
        self.finish(txn.id());
        Ok(())
    }

    /// Abort: mark the transaction aborted and release everything it holds
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionAbort> {
        txn.set_state(TransactionState::Aborted);
        self.release_all_locks(txn)?;
        self.finish(txn.id());
        Ok(())
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// Rows unlock before tables so table unlock validation holds
    fn release_all_locks(&self, txn: &Arc<Transaction>) -> Result<(), TransactionAbort> {
        for (table_id, rid) in txn.held_row_locks() {
            self.lock_manager.unlock_row(txn, table_id, rid)?;
        }
        for table_id in txn.held_table_locks() {
            self.lock_manager.unlock_table(txn, table_id)?;
        }
        Ok(())
    }

    fn finish(&self, txn_id: TxnId) {
        self.active_transactions.lock().remove(&txn_id);
        self.lock_manager.unregister_txn(txn_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::concurrency::lock_manager::LockMode;

    #[test]
    fn test_begin_assigns_increasing_ids() {
        let lock_manager = Arc::new(LockManager::new());
        let manager = TransactionManager::new(lock_manager);

        let t1 = manager.begin(IsolationLevel::RepeatableRead);
        let t2 = manager.begin(IsolationLevel::ReadCommitted);
        assert_eq!(t1.id(), 1);
        assert_eq!(t2.id(), 2);
        assert!(manager.get_transaction(1).is_some());
    }

    #[test]
    fn test_commit_releases_locks() {
        let lock_manager = Arc::new(LockManager::new());
        let manager = TransactionManager::new(lock_manager.clone());

        let txn = manager.begin(IsolationLevel::RepeatableRead);
        lock_manager
            .lock_table(&txn, LockMode::IntentionExclusive, 1)
            .unwrap();
        lock_manager
            .lock_row(&txn, LockMode::Exclusive, 1, crate::common::types::Rid::new(1, 0))
            .unwrap();

        manager.commit(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(!txn.is_table_locked(1, LockMode::IntentionExclusive));
        assert!(!txn.holds_row_locks_on(1));
        assert!(manager.get_transaction(txn.id()).is_none());

        // A committed transaction cannot take new locks.
        assert_eq!(
            lock_manager.lock_table(&txn, LockMode::IntentionShared, 2),
            Ok(false)
        );
    }

    #[test]
    fn test_abort_releases_locks() {
        let lock_manager = Arc::new(LockManager::new());
        let manager = TransactionManager::new(lock_manager.clone());

        let txn = manager.begin(IsolationLevel::ReadCommitted);
        lock_manager.lock_table(&txn, LockMode::Shared, 3).unwrap();

        manager.abort(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(!txn.is_table_locked(3, LockMode::Shared));
    }
}
