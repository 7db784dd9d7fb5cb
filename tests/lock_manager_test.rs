use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use emberdb::common::types::Rid;
use emberdb::transaction::{
    IsolationLevel, LockManager, TransactionError, TransactionManager, TransactionState,
};

fn setup() -> (Arc<LockManager>, TransactionManager) {
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = TransactionManager::new(lock_manager.clone());
    (lock_manager, txn_manager)
}

#[test]
fn test_shared_locks_are_compatible() {
    let (lock_manager, txn_manager) = setup();
    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_shared(&t0, rid).unwrap());
    assert!(lock_manager.lock_shared(&t1, rid).unwrap());
    assert!(t0.is_shared_locked(&rid));
    assert!(t1.is_shared_locked(&rid));
}

#[test]
fn test_reentrant_acquisition() {
    let (lock_manager, txn_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let r1 = Rid::new(1, 0);
    let r2 = Rid::new(1, 1);

    assert!(lock_manager.lock_shared(&txn, r1).unwrap());
    assert!(lock_manager.lock_shared(&txn, r1).unwrap());

    assert!(lock_manager.lock_exclusive(&txn, r2).unwrap());
    assert!(lock_manager.lock_exclusive(&txn, r2).unwrap());
    // a shared request on an exclusively held record is already satisfied
    assert!(lock_manager.lock_shared(&txn, r2).unwrap());

    assert_eq!(txn.state(), TransactionState::Growing);
}

#[test]
fn test_younger_writer_waits_for_older_holder() {
    let (lock_manager, txn_manager) = setup();
    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_exclusive(&t0, rid).unwrap());

    let (started_tx, started_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    let waiter = {
        let lock_manager = lock_manager.clone();
        let t1 = t1.clone();
        thread::spawn(move || {
            started_tx.send(()).unwrap();
            let granted = lock_manager.lock_exclusive(&t1, rid).unwrap();
            done_tx.send(()).unwrap();
            granted
        })
    };

    started_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(200));
    // the younger transaction waits rather than being granted or wounded
    assert!(done_rx.try_recv().is_err());
    assert_eq!(t1.state(), TransactionState::Growing);

    assert!(lock_manager.unlock(&t0, rid));
    assert!(waiter.join().unwrap());
    assert!(t1.is_exclusive_locked(&rid));
}

#[test]
fn test_exclusive_request_while_holding_shared_blocks_readers() {
    let (lock_manager, txn_manager) = setup();
    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    // asking for X while holding S converts the held lock
    assert!(lock_manager.lock_shared(&t0, rid).unwrap());
    assert!(lock_manager.lock_exclusive(&t0, rid).unwrap());
    assert!(!t0.is_shared_locked(&rid));
    assert!(t0.is_exclusive_locked(&rid));

    // a younger reader must now wait instead of sharing the record
    let (started_tx, started_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    let reader = {
        let lock_manager = lock_manager.clone();
        let t1 = t1.clone();
        thread::spawn(move || {
            started_tx.send(()).unwrap();
            let granted = lock_manager.lock_shared(&t1, rid).unwrap();
            done_tx.send(()).unwrap();
            granted
        })
    };

    started_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(200));
    assert!(done_rx.try_recv().is_err());
    assert_eq!(t1.state(), TransactionState::Growing);

    assert!(lock_manager.unlock(&t0, rid));
    assert!(reader.join().unwrap());
    assert!(t1.is_shared_locked(&rid));
}

#[test]
fn test_wound_wait_aborts_younger_transactions() {
    let (lock_manager, txn_manager) = setup();
    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    // the middle transaction holds X, the youngest blocks behind it
    assert!(lock_manager.lock_exclusive(&t1, rid).unwrap());

    let (started_tx, started_rx) = mpsc::channel();
    let blocked_reader = {
        let lock_manager = lock_manager.clone();
        let t2 = t2.clone();
        thread::spawn(move || {
            started_tx.send(()).unwrap();
            lock_manager.lock_shared(&t2, rid).unwrap()
        })
    };
    started_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(200));

    // the oldest transaction wounds both conflicting younger ones
    assert!(lock_manager.lock_exclusive(&t0, rid).unwrap());
    assert!(t0.is_exclusive_locked(&rid));

    assert!(!blocked_reader.join().unwrap());
    assert_eq!(t1.state(), TransactionState::Aborted);
    assert_eq!(t2.state(), TransactionState::Aborted);
    assert!(t1.exclusive_lock_set().is_empty());
    assert!(t2.shared_lock_set().is_empty());
}

#[test]
fn test_strict_2pl_under_repeatable_read() {
    let (lock_manager, txn_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let r1 = Rid::new(1, 0);
    let r2 = Rid::new(1, 1);
    let r3 = Rid::new(1, 2);

    assert!(lock_manager.lock_shared(&txn, r1).unwrap());
    assert!(lock_manager.lock_shared(&txn, r2).unwrap());

    // any release under REPEATABLE READ enters the shrinking phase
    assert!(lock_manager.unlock(&txn, r1));
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let refused = lock_manager.lock_shared(&txn, r3);
    assert!(matches!(refused, Err(TransactionError::LockOnShrinking(_))));
    assert_eq!(txn.state(), TransactionState::Aborted);
}

#[test]
fn test_read_committed_releases_shared_locks_early() {
    let (lock_manager, txn_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::ReadCommitted);
    let r1 = Rid::new(1, 0);
    let r2 = Rid::new(1, 1);
    let r3 = Rid::new(1, 2);

    assert!(lock_manager.lock_shared(&txn, r1).unwrap());
    assert!(lock_manager.unlock(&txn, r1));

    // releasing a shared lock does not start shrinking under READ COMMITTED
    assert_eq!(txn.state(), TransactionState::Growing);
    assert!(lock_manager.lock_shared(&txn, r2).unwrap());
    assert!(lock_manager.lock_exclusive(&txn, r3).unwrap());

    // releasing an exclusive lock does
    assert!(lock_manager.unlock(&txn, r3));
    assert_eq!(txn.state(), TransactionState::Shrinking);
}

#[test]
fn test_read_uncommitted_rejects_shared_locks() {
    let (lock_manager, txn_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::ReadUncommitted);
    let rid = Rid::new(1, 0);

    let refused = lock_manager.lock_shared(&txn, rid);
    assert!(matches!(
        refused,
        Err(TransactionError::SharedLockOnReadUncommitted(_))
    ));
    assert_eq!(txn.state(), TransactionState::Aborted);

    // exclusive locks are the only kind used at this level
    let txn = txn_manager.begin(IsolationLevel::ReadUncommitted);
    assert!(lock_manager.lock_exclusive(&txn, rid).unwrap());
    assert!(lock_manager.unlock(&txn, rid));
    assert_eq!(txn.state(), TransactionState::Shrinking);
}

#[test]
fn test_lock_upgrade() {
    let (lock_manager, txn_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_shared(&txn, rid).unwrap());
    assert!(lock_manager.lock_upgrade(&txn, rid).unwrap());
    assert!(!txn.is_shared_locked(&rid));
    assert!(txn.is_exclusive_locked(&rid));

    // an upgrade on an already exclusive lock is a no-op
    assert!(lock_manager.lock_upgrade(&txn, rid).unwrap());
}

#[test]
fn test_upgrade_without_shared_lock_fails() {
    let (lock_manager, txn_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    let refused = lock_manager.lock_upgrade(&txn, rid);
    assert!(matches!(refused, Err(TransactionError::UpgradeConflict(_))));
    assert_eq!(txn.state(), TransactionState::Aborted);
}

#[test]
fn test_concurrent_upgrades_conflict() {
    let (lock_manager, txn_manager) = setup();
    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_shared(&t0, rid).unwrap());
    assert!(lock_manager.lock_shared(&t1, rid).unwrap());

    // the younger holder starts an upgrade and blocks behind t0's S lock
    let (started_tx, started_rx) = mpsc::channel();
    let upgrader = {
        let lock_manager = lock_manager.clone();
        let t1 = t1.clone();
        thread::spawn(move || {
            started_tx.send(()).unwrap();
            lock_manager.lock_upgrade(&t1, rid).unwrap()
        })
    };
    started_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(200));

    // a second pending upgrade on the same record is refused
    let refused = lock_manager.lock_upgrade(&t0, rid);
    assert!(matches!(refused, Err(TransactionError::UpgradeConflict(_))));
    assert_eq!(t0.state(), TransactionState::Aborted);

    // aborting t0 releases its S lock and unblocks the pending upgrade
    txn_manager.abort(t0.id()).unwrap();
    assert!(upgrader.join().unwrap());
    assert!(t1.is_exclusive_locked(&rid));
}

#[test]
fn test_unlock_without_lock_fails() {
    let (lock_manager, txn_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(!lock_manager.unlock(&txn, rid));
    assert_eq!(txn.state(), TransactionState::Aborted);
}
