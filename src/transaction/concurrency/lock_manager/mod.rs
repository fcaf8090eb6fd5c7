pub mod deadlock;
pub mod queue;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;

use crate::common::types::{Rid, TableId, TxnId, DEADLOCK_DETECTION_INTERVAL};
use crate::transaction::concurrency::error::{AbortReason, TransactionAbort};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

use deadlock::WaitsForGraph;
use queue::{LockRequest, LockRequestQueue};

pub use queue::LockMode;

/// Multi-granularity two-phase lock manager.
///
/// Grants table locks in the five hierarchical modes and row locks in
/// `Shared`/`Exclusive`, enforcing the isolation-level rules of 2PL.
/// Requests queue FIFO per resource and block on the queue's condition
/// variable; a background sweep aborts the youngest transaction of any
/// waits-for cycle.
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableId, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    /// Transactions seen by this manager, so the detector can abort victims
    txn_registry: Mutex<HashMap<TxnId, Arc<Transaction>>>,
    waits_for: Mutex<WaitsForGraph>,
    detection_interval: Duration,
    running: Arc<AtomicBool>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_detection_interval(DEADLOCK_DETECTION_INTERVAL)
    }

    pub fn with_detection_interval(detection_interval: Duration) -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            txn_registry: Mutex::new(HashMap::new()),
            waits_for: Mutex::new(WaitsForGraph::new()),
            detection_interval,
            running: Arc::new(AtomicBool::new(false)),
            detector: Mutex::new(None),
        }
    }

    /// Acquire a table lock, blocking until it is granted.
    ///
    /// `Ok(false)` means the transaction cannot lock in its current state
    /// (already terminal, or aborted while waiting). Protocol violations
    /// abort the transaction and surface as `Err`.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        table_id: TableId,
    ) -> Result<bool, TransactionAbort> {
        debug!(
            "txn {} requests {:?} on table {} in state {:?}",
            txn.id(),
            mode,
            table_id,
            txn.state()
        );
        if !self.check_table_lock_allowed(txn, mode)? {
            return Ok(false);
        }
        self.register_txn(txn);

        let queue = {
            let mut map = self.table_lock_map.lock();
            map.entry(table_id)
                .or_insert_with(|| Arc::new(LockRequestQueue::new()))
                .clone()
        };
        self.acquire(txn, mode, table_id, None, &queue)
    }

    /// Release a table lock held by the transaction, waking all waiters and
    /// applying the GROWING -> SHRINKING transition for its isolation level.
    pub fn unlock_table(
        &self,
        txn: &Arc<Transaction>,
        table_id: TableId,
    ) -> Result<bool, TransactionAbort> {
        debug!(
            "txn {} unlocks table {} in state {:?}",
            txn.id(),
            table_id,
            txn.state()
        );
        if txn.holds_row_locks_on(table_id) {
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let queue = {
            let mut map = self.table_lock_map.lock();
            map.entry(table_id)
                .or_insert_with(|| Arc::new(LockRequestQueue::new()))
                .clone()
        };

        let mut inner = queue.inner.lock();
        let Some(pos) = inner.first_granted_of(txn.id()) else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        let request = inner.remove_at(pos);
        self.transition_on_unlock(txn, request.mode)?;
        assert!(
            txn.erase_table_lock(table_id),
            "bookkeeping missing for held table lock"
        );
        debug!(
            "txn {} dropped {:?} on table {}",
            txn.id(),
            request.mode,
            request.table_id
        );
        queue.cv.notify_all();
        Ok(true)
    }

    /// Acquire a row lock (`Shared` or `Exclusive` only), blocking until it
    /// is granted. The transaction must already hold an appropriate lock on
    /// the owning table.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        table_id: TableId,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        debug!(
            "txn {} requests {:?} on row {} of table {} in state {:?}",
            txn.id(),
            mode,
            rid,
            table_id,
            txn.state()
        );
        if !self.check_row_lock_allowed(txn, mode)? {
            return Ok(false);
        }

        let table_modes: &[LockMode] = if mode == LockMode::Shared {
            &[
                LockMode::Exclusive,
                LockMode::IntentionShared,
                LockMode::Shared,
                LockMode::SharedIntentionExclusive,
                LockMode::IntentionExclusive,
            ]
        } else {
            &[
                LockMode::Exclusive,
                LockMode::SharedIntentionExclusive,
                LockMode::IntentionExclusive,
            ]
        };
        if !txn.is_table_locked_any(table_id, table_modes) {
            return Err(self.abort(txn, AbortReason::TableLockNotPresent));
        }
        self.register_txn(txn);

        let queue = {
            let mut map = self.row_lock_map.lock();
            map.entry(rid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new()))
                .clone()
        };
        self.acquire(txn, mode, table_id, Some(rid), &queue)
    }

    /// Release a row lock held by the transaction
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        table_id: TableId,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        debug!(
            "txn {} unlocks row {} of table {} in state {:?}",
            txn.id(),
            rid,
            table_id,
            txn.state()
        );
        let queue = {
            let mut map = self.row_lock_map.lock();
            map.entry(rid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new()))
                .clone()
        };

        let mut inner = queue.inner.lock();
        let Some(pos) = inner.first_granted_of(txn.id()) else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        let request = inner.remove_at(pos);
        self.transition_on_unlock(txn, request.mode)?;
        assert!(
            txn.erase_row_lock(table_id, rid),
            "bookkeeping missing for held row lock"
        );
        debug!(
            "txn {} dropped {:?} on row {:?} of table {}",
            txn.id(),
            request.mode,
            request.rid,
            request.table_id
        );
        queue.cv.notify_all();
        Ok(true)
    }

    /// Queue the request, upgrading in place when the transaction already
    /// holds a lock here, and block until granted or aborted.
    fn acquire(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        table_id: TableId,
        rid: Option<Rid>,
        queue: &Arc<LockRequestQueue>,
    ) -> Result<bool, TransactionAbort> {
        let mut inner = queue.inner.lock();

        let mut upgraded = false;
        if let Some(pos) = inner.position_of(txn.id()) {
            let held_mode = inner.requests[pos].mode;
            assert!(
                inner.requests[pos].granted,
                "transaction already waiting in this queue"
            );
            if inner.upgrading.is_some() {
                debug!("txn {} hit a concurrent upgrade", txn.id());
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            if held_mode == mode {
                return Ok(true);
            }
            if !held_mode.can_upgrade_to(mode) {
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }

            debug!(
                "txn {} upgrades {:?} -> {:?} on table {}",
                txn.id(),
                held_mode,
                mode,
                table_id
            );
            inner.remove_at(pos);
            match rid {
                None => assert!(txn.erase_table_lock(table_id), "upgrade bookkeeping"),
                Some(rid) => assert!(txn.erase_row_lock(table_id, rid), "upgrade bookkeeping"),
            }
            inner.upgrading = Some(txn.id());
            upgraded = true;
        }

        inner.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode,
            table_id,
            rid,
            granted: false,
        });

        while txn.state() != TransactionState::Aborted && !inner.can_grant(txn.id(), mode) {
            queue.cv.wait(&mut inner);
        }

        if txn.state() == TransactionState::Aborted {
            debug!("txn {} woke up aborted", txn.id());
            if upgraded {
                inner.upgrading = None;
            }
            if let Some(pos) = inner.position_of(txn.id()) {
                inner.remove_at(pos);
            }
            queue.cv.notify_all();
            return Ok(false);
        }

        if upgraded {
            inner.upgrading = None;
        }
        let pos = inner
            .position_of(txn.id())
            .expect("granted request still queued");
        inner.requests[pos].granted = true;
        match rid {
            None => txn.record_table_lock(mode, table_id),
            Some(rid) => txn.record_row_lock(mode, table_id, rid),
        }
        debug!(
            "txn {} granted {:?} on table {} (rid {:?})",
            txn.id(),
            mode,
            table_id,
            rid
        );
        Ok(true)
    }

    /// 2PL validation for table locks. `Ok(false)` for terminal states.
    fn check_table_lock_allowed(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> Result<bool, TransactionAbort> {
        match txn.state() {
            TransactionState::Aborted | TransactionState::Committed => return Ok(false),
            TransactionState::Shrinking => match txn.isolation_level() {
                IsolationLevel::ReadCommitted
                    if matches!(mode, LockMode::IntentionShared | LockMode::Shared) => {}
                _ => return Err(self.abort(txn, AbortReason::LockOnShrinking)),
            },
            TransactionState::Growing => {}
        }

        if txn.isolation_level() == IsolationLevel::ReadUncommitted
            && matches!(
                mode,
                LockMode::Shared | LockMode::IntentionShared | LockMode::SharedIntentionExclusive
            )
        {
            return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
        }
        Ok(true)
    }

    /// 2PL validation for row locks. Intention modes are never legal on rows.
    fn check_row_lock_allowed(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> Result<bool, TransactionAbort> {
        // Terminal states fail the request outright, before any mode rule.
        if matches!(
            txn.state(),
            TransactionState::Aborted | TransactionState::Committed
        ) {
            return Ok(false);
        }
        if !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        if txn.state() == TransactionState::Shrinking {
            match txn.isolation_level() {
                IsolationLevel::ReadCommitted if mode == LockMode::Shared => {}
                _ => return Err(self.abort(txn, AbortReason::LockOnShrinking)),
            }
        }

        if txn.isolation_level() == IsolationLevel::ReadUncommitted && mode == LockMode::Shared {
            return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
        }
        Ok(true)
    }

    /// Releasing certain modes ends the growing phase, depending on the
    /// isolation level.
    fn transition_on_unlock(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> Result<(), TransactionAbort> {
        if matches!(
            txn.state(),
            TransactionState::Committed | TransactionState::Aborted
        ) {
            return Ok(());
        }
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if matches!(mode, LockMode::Shared | LockMode::Exclusive) {
                    txn.set_state(TransactionState::Shrinking);
                }
            }
            IsolationLevel::ReadCommitted => {
                if mode == LockMode::Exclusive {
                    txn.set_state(TransactionState::Shrinking);
                }
            }
            IsolationLevel::ReadUncommitted => {
                if mode == LockMode::Shared {
                    return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
                }
                if mode == LockMode::Exclusive {
                    txn.set_state(TransactionState::Shrinking);
                }
            }
        }
        Ok(())
    }

    fn abort(&self, txn: &Arc<Transaction>, reason: AbortReason) -> TransactionAbort {
        txn.set_state(TransactionState::Aborted);
        TransactionAbort::new(txn.id(), reason)
    }

    fn register_txn(&self, txn: &Arc<Transaction>) {
        self.txn_registry
            .lock()
            .entry(txn.id())
            .or_insert_with(|| txn.clone());
    }

    /// Forget a finished transaction
    pub fn unregister_txn(&self, txn_id: TxnId) {
        self.txn_registry.lock().remove(&txn_id);
    }

    pub(crate) fn registry(&self) -> &Mutex<HashMap<TxnId, Arc<Transaction>>> {
        &self.txn_registry
    }

    pub(crate) fn maps(
        &self,
    ) -> (
        &Mutex<HashMap<TableId, Arc<LockRequestQueue>>>,
        &Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    ) {
        (&self.table_lock_map, &self.row_lock_map)
    }

    pub(crate) fn graph(&self) -> &Mutex<WaitsForGraph> {
        &self.waits_for
    }

    pub(crate) fn detection_interval(&self) -> Duration {
        self.detection_interval
    }

    pub(crate) fn running_flag(&self) -> &Arc<AtomicBool> {
        &self.running
    }

    pub(crate) fn detector_handle(&self) -> &Mutex<Option<JoinHandle<()>>> {
        &self.detector
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.stop_deadlock_detection();
    }
}
