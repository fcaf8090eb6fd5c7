use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use tarndb::common::types::Rid;
use tarndb::transaction::concurrency::{
    AbortReason, IsolationLevel, LockManager, LockMode, Transaction, TransactionState,
};

fn txn(id: u32, isolation: IsolationLevel) -> Arc<Transaction> {
    Arc::new(Transaction::new(id, isolation))
}

#[test]
fn test_basic_table_lock_cycle() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let t1 = txn(1, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, 1)?);
    assert!(t1.is_table_locked(1, LockMode::Shared));

    // Re-requesting the held mode succeeds immediately.
    assert!(lm.lock_table(&t1, LockMode::Shared, 1)?);

    assert!(lm.unlock_table(&t1, 1)?);
    assert!(!t1.is_table_locked(1, LockMode::Shared));
    // Under REPEATABLE_READ, releasing S ends the growing phase.
    assert_eq!(t1.state(), TransactionState::Shrinking);

    Ok(())
}

#[test]
fn test_shared_locks_are_concurrent() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, 1)?);
    assert!(lm.lock_table(&t2, LockMode::Shared, 1)?);

    lm.unlock_table(&t1, 1)?;
    lm.unlock_table(&t2, 1)?;
    Ok(())
}

#[test]
fn test_exclusive_blocks_until_shared_released() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, 7)?);

    let granted = Arc::new(AtomicBool::new(false));
    let waiter = {
        let lm = lm.clone();
        let t2 = t2.clone();
        let granted = granted.clone();
        thread::spawn(move || {
            let ok = lm.lock_table(&t2, LockMode::Exclusive, 7).unwrap();
            granted.store(ok, Ordering::SeqCst);
        })
    };

    // The X request must still be waiting on the granted S.
    thread::sleep(Duration::from_millis(150));
    assert!(!granted.load(Ordering::SeqCst));

    lm.unlock_table(&t1, 7)?;
    waiter.join().unwrap();
    assert!(granted.load(Ordering::SeqCst));
    assert!(t2.is_table_locked(7, LockMode::Exclusive));
    assert_eq!(t1.state(), TransactionState::Shrinking);

    lm.unlock_table(&t2, 7)?;
    Ok(())
}

#[test]
fn test_lock_upgrade() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let t1 = txn(1, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::IntentionShared, 3)?);
    assert!(lm.lock_table(&t1, LockMode::Exclusive, 3)?);

    assert!(!t1.is_table_locked(3, LockMode::IntentionShared));
    assert!(t1.is_table_locked(3, LockMode::Exclusive));

    // X cannot be downgraded.
    let err = lm.lock_table(&t1, LockMode::Shared, 3).unwrap_err();
    assert_eq!(err.reason, AbortReason::IncompatibleUpgrade);
    assert_eq!(t1.state(), TransactionState::Aborted);

    Ok(())
}

#[test]
fn test_concurrent_upgrade_conflict() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, 4)?);
    assert!(lm.lock_table(&t2, LockMode::Shared, 4)?);

    // t1 starts an upgrade and blocks on t2's shared lock.
    let upgrader = {
        let lm = lm.clone();
        let t1 = t1.clone();
        thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, 4).unwrap())
    };
    thread::sleep(Duration::from_millis(150));

    // A second upgrade on the same queue aborts the requester.
    let err = lm.lock_table(&t2, LockMode::Exclusive, 4).unwrap_err();
    assert_eq!(err.reason, AbortReason::UpgradeConflict);
    assert_eq!(t2.state(), TransactionState::Aborted);

    // Releasing the aborted transaction's lock lets the upgrade finish.
    lm.unlock_table(&t2, 4)?;
    assert!(upgrader.join().unwrap());
    assert!(t1.is_table_locked(4, LockMode::Exclusive));

    Ok(())
}

#[test]
fn test_read_uncommitted_rejects_shared() {
    let lm = Arc::new(LockManager::new());

    for (id, mode) in [
        (1, LockMode::Shared),
        (2, LockMode::IntentionShared),
        (3, LockMode::SharedIntentionExclusive),
    ] {
        let t = txn(id, IsolationLevel::ReadUncommitted);
        let err = lm.lock_table(&t, mode, 1).unwrap_err();
        assert_eq!(err.reason, AbortReason::LockSharedOnReadUncommitted);
        assert_eq!(t.state(), TransactionState::Aborted);
    }

    // Write locks remain legal at READ_UNCOMMITTED.
    let t = txn(4, IsolationLevel::ReadUncommitted);
    assert!(lm.lock_table(&t, LockMode::IntentionExclusive, 1).unwrap());
    assert!(lm.lock_table(&t, LockMode::Exclusive, 1).unwrap());
}

#[test]
fn test_lock_on_shrinking_aborts() -> Result<()> {
    // REPEATABLE_READ: nothing may be locked while shrinking.
    let lm = Arc::new(LockManager::new());
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    lm.lock_table(&t1, LockMode::Shared, 1)?;
    lm.unlock_table(&t1, 1)?;
    assert_eq!(t1.state(), TransactionState::Shrinking);
    let err = lm.lock_table(&t1, LockMode::Shared, 2).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);

    // READ_COMMITTED: IS and S stay legal while shrinking.
    let t2 = txn(2, IsolationLevel::ReadCommitted);
    lm.lock_table(&t2, LockMode::IntentionExclusive, 1)?;
    lm.lock_row(&t2, LockMode::Exclusive, 1, Rid::new(1, 1))?;
    lm.unlock_row(&t2, 1, Rid::new(1, 1))?;
    assert_eq!(t2.state(), TransactionState::Shrinking);
    assert!(lm.lock_table(&t2, LockMode::IntentionShared, 2)?);
    assert!(lm.lock_table(&t2, LockMode::Shared, 3)?);
    let err = lm.lock_table(&t2, LockMode::IntentionExclusive, 4).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);

    Ok(())
}

#[test]
fn test_row_lock_validation() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let rid = Rid::new(2, 5);

    // Intention modes are not allowed on rows.
    let err = lm
        .lock_row(&t1, LockMode::IntentionShared, 1, rid)
        .unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedIntentionLockOnRow);

    // A row lock needs a table lock first.
    let t2 = txn(2, IsolationLevel::RepeatableRead);
    let err = lm.lock_row(&t2, LockMode::Exclusive, 1, rid).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);

    // An S row lock under an IS table lock is the standard read pattern.
    let t3 = txn(3, IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t3, LockMode::IntentionShared, 1)?);
    assert!(lm.lock_row(&t3, LockMode::Shared, 1, rid)?);
    // But X on a row needs more than IS on the table.
    let err = lm.lock_row(&t3, LockMode::Exclusive, 1, rid).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);

    Ok(())
}

#[test]
fn test_unlock_table_before_rows_aborts() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let rid = Rid::new(3, 1);

    lm.lock_table(&t1, LockMode::IntentionExclusive, 9)?;
    lm.lock_row(&t1, LockMode::Exclusive, 9, rid)?;

    let err = lm.unlock_table(&t1, 9).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableUnlockedBeforeUnlockingRows);

    Ok(())
}

#[test]
fn test_terminal_state_lock_requests_return_false() -> Result<()> {
    let lm = Arc::new(LockManager::new());
    let all_modes = [
        LockMode::Shared,
        LockMode::Exclusive,
        LockMode::IntentionShared,
        LockMode::IntentionExclusive,
        LockMode::SharedIntentionExclusive,
    ];

    // A committed transaction cannot take any new lock, row or table,
    // whatever the requested mode; the request fails without aborting.
    let committed = txn(1, IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&committed, LockMode::IntentionExclusive, 1)?);
    committed.set_state(TransactionState::Committed);
    for mode in all_modes {
        assert_eq!(lm.lock_table(&committed, mode, 2), Ok(false));
        assert_eq!(lm.lock_row(&committed, mode, 1, Rid::new(0, 1)), Ok(false));
    }
    assert_eq!(committed.state(), TransactionState::Committed);

    // Same for an aborted transaction.
    let aborted = txn(2, IsolationLevel::RepeatableRead);
    aborted.set_state(TransactionState::Aborted);
    for mode in all_modes {
        assert_eq!(lm.lock_table(&aborted, mode, 2), Ok(false));
        assert_eq!(lm.lock_row(&aborted, mode, 1, Rid::new(0, 2)), Ok(false));
    }
    assert_eq!(aborted.state(), TransactionState::Aborted);

    Ok(())
}

#[test]
fn test_unlock_without_lock_aborts() {
    let lm = Arc::new(LockManager::new());
    let t1 = txn(1, IsolationLevel::RepeatableRead);

    let err = lm.unlock_table(&t1, 1).unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedUnlockButNoLockHeld);
    assert_eq!(t1.state(), TransactionState::Aborted);
}

/// Two transactions each hold one row X lock and request the other's:
/// a two-cycle the detector must break by aborting the younger (higher id).
fn deadlock_scenario(lm: Arc<LockManager>, drive_detector: bool) {
    let t10 = txn(10, IsolationLevel::RepeatableRead);
    let t11 = txn(11, IsolationLevel::RepeatableRead);
    let r1 = Rid::new(0, 1);
    let r2 = Rid::new(0, 2);

    lm.lock_table(&t10, LockMode::IntentionExclusive, 1).unwrap();
    lm.lock_table(&t11, LockMode::IntentionExclusive, 1).unwrap();
    lm.lock_row(&t10, LockMode::Exclusive, 1, r1).unwrap();
    lm.lock_row(&t11, LockMode::Exclusive, 1, r2).unwrap();

    let survivor = {
        let lm = lm.clone();
        let t10 = t10.clone();
        thread::spawn(move || lm.lock_row(&t10, LockMode::Exclusive, 1, r2).unwrap())
    };
    let victim = {
        let lm = lm.clone();
        let t11 = t11.clone();
        thread::spawn(move || {
            let granted = lm.lock_row(&t11, LockMode::Exclusive, 1, r1).unwrap();
            // The deadlock victim backs out: release what it still holds.
            if !granted {
                lm.unlock_row(&t11, 1, r2).unwrap();
                lm.unlock_table(&t11, 1).unwrap();
            }
            granted
        })
    };

    if drive_detector {
        // Sweep until the cycle has been built and broken.
        for _ in 0..100 {
            lm.run_detection_pass();
            if t11.state() == TransactionState::Aborted {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    assert!(survivor.join().unwrap(), "older transaction must survive");
    assert!(!victim.join().unwrap(), "younger transaction must be aborted");
    assert_eq!(t11.state(), TransactionState::Aborted);
    assert_eq!(t10.state(), TransactionState::Growing);
    assert!(t10.is_row_locked(1, r2, LockMode::Exclusive));

    // A further pass finds nothing left to break.
    lm.run_detection_pass();
    assert_eq!(t10.state(), TransactionState::Growing);
}

#[test]
fn test_deadlock_broken_by_detection_pass() {
    let lm = Arc::new(LockManager::new());
    deadlock_scenario(lm, true);
}

#[test]
fn test_deadlock_broken_by_background_detector() {
    let lm = Arc::new(LockManager::with_detection_interval(Duration::from_millis(
        20,
    )));
    lm.start_deadlock_detection();
    deadlock_scenario(lm.clone(), false);
    lm.stop_deadlock_detection();
}
