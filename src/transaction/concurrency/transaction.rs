use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};

use crate::common::types::{Rid, TableId, TxnId};
use crate::transaction::concurrency::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// An active transaction: identity, 2PL state, and the bookkeeping sets the
/// lock manager maintains for the locks it holds.
///
/// All fields the lock manager mutates sit behind their own latches so a
/// transaction can be shared across the requesting thread and the deadlock
/// detector.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: RwLock<TransactionState>,

    shared_table_locks: Mutex<HashSet<TableId>>,
    exclusive_table_locks: Mutex<HashSet<TableId>>,
    intention_shared_table_locks: Mutex<HashSet<TableId>>,
    intention_exclusive_table_locks: Mutex<HashSet<TableId>>,
    shared_intention_exclusive_table_locks: Mutex<HashSet<TableId>>,

    shared_row_locks: Mutex<HashMap<TableId, HashSet<Rid>>>,
    exclusive_row_locks: Mutex<HashMap<TableId, HashSet<Rid>>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: RwLock::new(TransactionState::Growing),
            shared_table_locks: Mutex::new(HashSet::new()),
            exclusive_table_locks: Mutex::new(HashSet::new()),
            intention_shared_table_locks: Mutex::new(HashSet::new()),
            intention_exclusive_table_locks: Mutex::new(HashSet::new()),
            shared_intention_exclusive_table_locks: Mutex::new(HashSet::new()),
            shared_row_locks: Mutex::new(HashMap::new()),
            exclusive_row_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    fn table_set(&self, mode: LockMode) -> &Mutex<HashSet<TableId>> {
        match mode {
            LockMode::Shared => &self.shared_table_locks,
            LockMode::Exclusive => &self.exclusive_table_locks,
            LockMode::IntentionShared => &self.intention_shared_table_locks,
            LockMode::IntentionExclusive => &self.intention_exclusive_table_locks,
            LockMode::SharedIntentionExclusive => &self.shared_intention_exclusive_table_locks,
        }
    }

    pub fn is_table_locked(&self, table_id: TableId, mode: LockMode) -> bool {
        self.table_set(mode).lock().contains(&table_id)
    }

    /// True when the transaction holds any of the given modes on the table
    pub fn is_table_locked_any(&self, table_id: TableId, modes: &[LockMode]) -> bool {
        modes.iter().any(|&mode| self.is_table_locked(table_id, mode))
    }

    pub(crate) fn record_table_lock(&self, mode: LockMode, table_id: TableId) {
        self.table_set(mode).lock().insert(table_id);
    }

    /// Remove the table from whichever bookkeeping set holds it
    pub(crate) fn erase_table_lock(&self, table_id: TableId) -> bool {
        for mode in [
            LockMode::Shared,
            LockMode::Exclusive,
            LockMode::IntentionShared,
            LockMode::IntentionExclusive,
            LockMode::SharedIntentionExclusive,
        ] {
            if self.table_set(mode).lock().remove(&table_id) {
                return true;
            }
        }
        false
    }

    pub fn is_row_locked(&self, table_id: TableId, rid: Rid, mode: LockMode) -> bool {
        let map = match mode {
            LockMode::Shared => self.shared_row_locks.lock(),
            LockMode::Exclusive => self.exclusive_row_locks.lock(),
            _ => return false,
        };
        map.get(&table_id).is_some_and(|rows| rows.contains(&rid))
    }

    /// True when any row of the table is still locked by this transaction
    pub fn holds_row_locks_on(&self, table_id: TableId) -> bool {
        if self
            .shared_row_locks
            .lock()
            .get(&table_id)
            .is_some_and(|rows| !rows.is_empty())
        {
            return true;
        }
        self.exclusive_row_locks
            .lock()
            .get(&table_id)
            .is_some_and(|rows| !rows.is_empty())
    }

    pub(crate) fn record_row_lock(&self, mode: LockMode, table_id: TableId, rid: Rid) {
        let mut map = match mode {
            LockMode::Shared => self.shared_row_locks.lock(),
            LockMode::Exclusive => self.exclusive_row_locks.lock(),
            _ => unreachable!("row locks are only S or X"),
        };
        map.entry(table_id).or_default().insert(rid);
    }

    /// Remove the row from whichever bookkeeping map holds it
    pub(crate) fn erase_row_lock(&self, table_id: TableId, rid: Rid) -> bool {
        if let Some(rows) = self.exclusive_row_locks.lock().get_mut(&table_id) {
            if rows.remove(&rid) {
                return true;
            }
        }
        if let Some(rows) = self.shared_row_locks.lock().get_mut(&table_id) {
            if rows.remove(&rid) {
                return true;
            }
        }
        false
    }

    /// Snapshot of held table locks, for lock release on commit/abort
    pub(crate) fn held_table_locks(&self) -> Vec<TableId> {
        let mut tables = Vec::new();
        for mode in [
            LockMode::Shared,
            LockMode::Exclusive,
            LockMode::IntentionShared,
            LockMode::IntentionExclusive,
            LockMode::SharedIntentionExclusive,
        ] {
            tables.extend(self.table_set(mode).lock().iter().copied());
        }
        tables
    }

    /// Snapshot of held row locks, for lock release on commit/abort
    pub(crate) fn held_row_locks(&self) -> Vec<(TableId, Rid)> {
        let mut rows = Vec::new();
        for (table_id, rids) in self.shared_row_locks.lock().iter() {
            rows.extend(rids.iter().map(|&rid| (*table_id, rid)));
        }
        for (table_id, rids) in self.exclusive_row_locks.lock().iter() {
            rows.extend(rids.iter().map(|&rid| (*table_id, rid)));
        }
        rows
    }
}
