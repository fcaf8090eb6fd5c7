use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TableId, TxnId};

/// Hierarchical lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// Compatibility of a `requested` mode against a `held` one, per the
    /// standard hierarchical matrix.
    pub fn compatible(held: LockMode, requested: LockMode) -> bool {
        use LockMode::*;
        match requested {
            Exclusive => false,
            SharedIntentionExclusive => held == IntentionShared,
            Shared => matches!(held, IntentionShared | Shared),
            IntentionExclusive => matches!(held, IntentionShared | IntentionExclusive),
            IntentionShared => held != Exclusive,
        }
    }

    /// Whether a held lock may be upgraded to `requested`
    pub fn can_upgrade_to(self, requested: LockMode) -> bool {
        use LockMode::*;
        match self {
            IntentionShared => true,
            Shared => matches!(requested, Exclusive | SharedIntentionExclusive),
            IntentionExclusive => matches!(requested, Exclusive | SharedIntentionExclusive),
            SharedIntentionExclusive => requested == Exclusive,
            Exclusive => false,
        }
    }
}

/// One pending or granted lock request
pub(crate) struct LockRequest {
    pub txn_id: TxnId,
    pub mode: LockMode,
    pub table_id: TableId,
    pub rid: Option<Rid>,
    pub granted: bool,
}

/// FIFO request queue for one lockable resource (a table or a row)
pub(crate) struct LockRequestQueue {
    pub inner: Mutex<QueueInner>,
    pub cv: Condvar,
}

pub(crate) struct QueueInner {
    pub requests: VecDeque<LockRequest>,
    /// Transaction currently re-queued for an upgrade, if any. At most one
    /// per queue; it jumps ahead of other waiters.
    pub upgrading: Option<TxnId>,
}

impl LockRequestQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                requests: VecDeque::new(),
                upgrading: None,
            }),
            cv: Condvar::new(),
        }
    }
}

impl QueueInner {
    /// Whether the request of `txn_id` for `mode` can be granted now:
    /// compatible with every grant held by other transactions, subject to an
    /// in-flight upgrade, and behind no incompatible earlier waiter.
    pub fn can_grant(&self, txn_id: TxnId, mode: LockMode) -> bool {
        for request in &self.requests {
            if request.txn_id == txn_id {
                continue;
            }
            if request.granted && !LockMode::compatible(request.mode, mode) {
                return false;
            }
        }

        if let Some(upgrading) = self.upgrading {
            return upgrading == txn_id;
        }

        // FIFO fairness: earlier incompatible waiters go first.
        for request in &self.requests {
            if request.txn_id == txn_id {
                break;
            }
            if !request.granted && !LockMode::compatible(request.mode, mode) {
                return false;
            }
        }
        true
    }

    pub fn position_of(&self, txn_id: TxnId) -> Option<usize> {
        self.requests.iter().position(|r| r.txn_id == txn_id)
    }

    pub fn first_granted_of(&self, txn_id: TxnId) -> Option<usize> {
        self.requests
            .iter()
            .position(|r| r.granted && r.txn_id == txn_id)
    }

    pub fn remove_at(&mut self, index: usize) -> LockRequest {
        self.requests.remove(index).expect("request index in range")
    }

    pub fn has_waiting(&self, txn_id: TxnId) -> bool {
        self.requests
            .iter()
            .any(|r| !r.granted && r.txn_id == txn_id)
    }
}
