use std::collections::HashSet;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Rid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction states under strict two-phase locking.
///
/// `Growing` and `Shrinking` are the two phases; `Committed` and `Aborted`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Reasons a transaction is aborted.
///
/// Each of these both flips the transaction state to `Aborted` and is
/// returned to the caller, so executors can tell a retryable refusal from
/// a rollback.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("transaction {0} acquired a lock while shrinking")]
    LockOnShrinking(TxnId),

    #[error("transaction {0} requested a shared lock under READ UNCOMMITTED")]
    SharedLockOnReadUncommitted(TxnId),

    #[error("transaction {0} attempted an upgrade while another upgrade was pending")]
    UpgradeConflict(TxnId),

    /// Reserved: wound-wait prevents deadlocks rather than detecting them
    #[error("transaction {0} was chosen as a deadlock victim")]
    Deadlock(TxnId),

    #[error("transaction {0} is not active")]
    NotFound(TxnId),

    #[error("transaction {0} is already committed or aborted")]
    InvalidState(TxnId),
}

/// An active database transaction.
///
/// Shared as `Arc<Transaction>` because the lock manager's wound-wait
/// policy aborts *other* transactions through their handles; all mutable
/// state sits behind its own mutex.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
        }
    }

    /// Transaction id; ids are assigned monotonically, so a lower id means
    /// an older transaction.
    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn is_shared_locked(&self, rid: &Rid) -> bool {
        self.shared_lock_set.lock().contains(rid)
    }

    pub fn is_exclusive_locked(&self, rid: &Rid) -> bool {
        self.exclusive_lock_set.lock().contains(rid)
    }

    /// Record ids currently held in shared mode
    pub fn shared_lock_set(&self) -> HashSet<Rid> {
        self.shared_lock_set.lock().clone()
    }

    /// Record ids currently held in exclusive mode
    pub fn exclusive_lock_set(&self) -> HashSet<Rid> {
        self.exclusive_lock_set.lock().clone()
    }

    pub(crate) fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_shared_lock(&self, rid: &Rid) {
        self.shared_lock_set.lock().remove(rid);
    }

    pub(crate) fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_exclusive_lock(&self, rid: &Rid) {
        self.exclusive_lock_set.lock().remove(rid);
    }

    /// Drop every held lock id. Used when the transaction is wounded: its
    /// queue entries are gone, so the sets must not claim otherwise.
    pub(crate) fn clear_lock_sets(&self) {
        self.shared_lock_set.lock().clear();
        self.exclusive_lock_set.lock().clear();
    }
}
