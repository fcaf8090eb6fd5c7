use thiserror::Error;

use crate::common::types::TxnId;

/// Why the lock manager aborted a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    UpgradeConflict,
    IncompatibleUpgrade,
    AttemptedUnlockButNoLockHeld,
    AttemptedIntentionLockOnRow,
    TableLockNotPresent,
    TableUnlockedBeforeUnlockingRows,
}

/// Raised when a lock request violates the locking protocol. The
/// transaction's state has already been set to `Aborted` when this
/// propagates; callers must not retry.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason:?}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

impl TransactionAbort {
    pub fn new(txn_id: TxnId, reason: AbortReason) -> Self {
        Self { txn_id, reason }
    }
}
