use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::debug;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Lock modes on a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    /// Standard compatibility: only shared/shared coexists
    fn conflicts_with(self, other: LockMode) -> bool {
        !(self == LockMode::Shared && other == LockMode::Shared)
    }
}

/// One lock request in a record's queue
struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

/// FIFO request queue for a single record
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    /// At most one transaction may have an upgrade pending per record
    upgrading: Option<TxnId>,
    cv: Arc<Condvar>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            upgrading: None,
            cv: Arc::new(Condvar::new()),
        }
    }
}

type LockTable = HashMap<Rid, LockRequestQueue>;

/// Record-level lock manager: strict two-phase locking with wound-wait
/// deadlock prevention.
///
/// One mutex serializes all queue mutations; waiters block on their
/// queue's condition variable, which is broadcast on every release or
/// wound because several compatible shared waiters may become grantable
/// at once. `unlock` never blocks.
pub struct LockManager {
    lock_table: Mutex<LockTable>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a shared lock on `rid`.
    ///
    /// `Ok(false)` means the transaction was wounded while waiting and is
    /// now aborted; errors are protocol violations, which also abort it.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<bool, TransactionError> {
        let mut table = self.lock_table.lock();
        Self::refuse_while_shrinking(txn)?;
        if txn.is_shared_locked(&rid) || txn.is_exclusive_locked(&rid) {
            return Ok(true);
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::SharedLockOnReadUncommitted(txn.id()));
        }

        Self::enqueue(&mut table, rid, txn, LockMode::Shared);
        if !self.wait_for_grant(&mut table, rid, txn, LockMode::Shared) {
            return Ok(false);
        }

        Self::mark_granted(&mut table, rid, txn.id());
        txn.add_shared_lock(rid);
        Ok(true)
    }

    /// Acquire an exclusive lock on `rid`
    pub fn lock_exclusive(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        let mut table = self.lock_table.lock();
        Self::refuse_while_shrinking(txn)?;
        if txn.is_exclusive_locked(&rid) {
            return Ok(true);
        }

        // A held shared lock must turn exclusive in its existing queue
        // entry, the way an upgrade does; leaving it at Shared would let
        // another reader be granted alongside the new writer.
        let held_shared = txn.is_shared_locked(&rid);
        if held_shared {
            table
                .get_mut(&rid)
                .and_then(|queue| queue.requests.iter_mut().find(|r| r.txn.id() == txn.id()))
                .expect("a held shared lock has a queue entry")
                .mode = LockMode::Exclusive;
        } else {
            Self::enqueue(&mut table, rid, txn, LockMode::Exclusive);
        }

        if !self.wait_for_grant(&mut table, rid, txn, LockMode::Exclusive) {
            return Ok(false);
        }

        Self::mark_granted(&mut table, rid, txn.id());
        if held_shared {
            txn.remove_shared_lock(&rid);
        }
        txn.add_exclusive_lock(rid);
        Ok(true)
    }

    /// Upgrade a held shared lock on `rid` to exclusive.
    ///
    /// Fails with `UpgradeConflict` when another upgrade is pending on the
    /// same record or the transaction holds no granted shared lock.
    pub fn lock_upgrade(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        let mut table = self.lock_table.lock();
        Self::refuse_while_shrinking(txn)?;
        if txn.is_exclusive_locked(&rid) {
            return Ok(true);
        }

        {
            let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);
            if queue.upgrading.is_some() {
                txn.set_state(TransactionState::Aborted);
                return Err(TransactionError::UpgradeConflict(txn.id()));
            }
            match queue.requests.iter_mut().find(|r| r.txn.id() == txn.id()) {
                Some(request) if request.mode == LockMode::Shared && request.granted => {
                    // the request turns exclusive in place and waits out
                    // every older reader
                    queue.upgrading = Some(txn.id());
                    request.mode = LockMode::Exclusive;
                }
                _ => {
                    txn.set_state(TransactionState::Aborted);
                    return Err(TransactionError::UpgradeConflict(txn.id()));
                }
            }
        }

        if !self.wait_for_grant(&mut table, rid, txn, LockMode::Exclusive) {
            if let Some(queue) = table.get_mut(&rid) {
                if queue.upgrading == Some(txn.id()) {
                    queue.upgrading = None;
                }
            }
            return Ok(false);
        }

        if let Some(queue) = table.get_mut(&rid) {
            queue.upgrading = None;
        }
        txn.remove_shared_lock(&rid);
        txn.add_exclusive_lock(rid);
        Ok(true)
    }

    /// Release whatever lock `txn` holds on `rid`.
    ///
    /// Returns false (and aborts the transaction) when no granted lock is
    /// held. Whether the release moves the transaction into its shrinking
    /// phase depends on the isolation level: shared locks are release-early
    /// under READ COMMITTED.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        let mut table = self.lock_table.lock();
        let queue = match table.get_mut(&rid) {
            Some(queue) => queue,
            None => {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
        };

        let position = queue
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id() && r.granted);
        let position = match position {
            Some(position) => position,
            None => {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
        };

        let mode = queue.requests[position].mode;
        queue.requests.remove(position);
        queue.cv.notify_all();

        let shrinks = match (mode, txn.isolation_level()) {
            (LockMode::Shared, IsolationLevel::ReadCommitted) => false,
            (LockMode::Shared, _) => true,
            (LockMode::Exclusive, _) => true,
        };
        if shrinks && txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        match mode {
            LockMode::Shared => txn.remove_shared_lock(&rid),
            LockMode::Exclusive => txn.remove_exclusive_lock(&rid),
        }
        true
    }

    /// Block until no older conflicting request precedes `txn` in the
    /// queue, wounding younger conflicting transactions along the way.
    ///
    /// Returns false when the transaction was itself wounded while
    /// waiting; its request is gone from the queue by then.
    fn wait_for_grant(
        &self,
        table: &mut MutexGuard<'_, LockTable>,
        rid: Rid,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> bool {
        loop {
            if txn.state() == TransactionState::Aborted {
                Self::remove_request(table, rid, txn.id());
                return false;
            }
            if !Self::wound_or_blocked(table, rid, txn, mode) {
                return true;
            }
            let cv = table
                .get(&rid)
                .expect("queue exists while a request is enqueued")
                .cv
                .clone();
            cv.wait(table);
        }
    }

    /// One wound-wait pass over the queue entries older than `txn`.
    ///
    /// Every younger conflicting transaction ahead of an older requester is
    /// wounded: aborted, stripped of all its queued requests, its queues
    /// broadcast. Returns whether an older conflicting request remains.
    fn wound_or_blocked(
        table: &mut LockTable,
        rid: Rid,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> bool {
        let mut wounded = Vec::new();
        let mut blocked = false;
        {
            let queue = match table.get(&rid) {
                Some(queue) => queue,
                None => return false,
            };
            for request in &queue.requests {
                if request.txn.id() == txn.id() {
                    break;
                }
                if !request.mode.conflicts_with(mode) {
                    continue;
                }
                if txn.id() < request.txn.id() {
                    debug!(
                        "wound-wait: transaction {} wounds transaction {} on {:?}",
                        txn.id(),
                        request.txn.id(),
                        rid
                    );
                    request.txn.set_state(TransactionState::Aborted);
                    request.txn.clear_lock_sets();
                    wounded.push(request.txn.id());
                } else {
                    blocked = true;
                }
            }
        }
        if !wounded.is_empty() {
            Self::purge_wounded(table, &wounded);
        }
        blocked
    }

    /// Drop every queued request of the wounded transactions, across all
    /// records, waking each affected queue.
    fn purge_wounded(table: &mut LockTable, wounded: &[TxnId]) {
        for queue in table.values_mut() {
            let before = queue.requests.len();
            queue.requests.retain(|r| !wounded.contains(&r.txn.id()));
            if let Some(upgrader) = queue.upgrading {
                if wounded.contains(&upgrader) {
                    queue.upgrading = None;
                }
            }
            if queue.requests.len() != before {
                queue.cv.notify_all();
            }
        }
    }

    /// Strict 2PL: no acquisition once the transaction started releasing
    fn refuse_while_shrinking(txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::LockOnShrinking(txn.id()));
        }
        Ok(())
    }

    /// Append a request unless the transaction is already queued
    fn enqueue(table: &mut LockTable, rid: Rid, txn: &Arc<Transaction>, mode: LockMode) {
        let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);
        if queue.requests.iter().all(|r| r.txn.id() != txn.id()) {
            queue.requests.push_back(LockRequest {
                txn: txn.clone(),
                mode,
                granted: false,
            });
        }
    }

    fn mark_granted(table: &mut LockTable, rid: Rid, txn_id: TxnId) {
        if let Some(queue) = table.get_mut(&rid) {
            if let Some(request) = queue.requests.iter_mut().find(|r| r.txn.id() == txn_id) {
                request.granted = true;
            }
        }
    }

    fn remove_request(table: &mut LockTable, rid: Rid, txn_id: TxnId) {
        if let Some(queue) = table.get_mut(&rid) {
            let before = queue.requests.len();
            queue.requests.retain(|r| r.txn.id() != txn_id);
            if queue.requests.len() != before {
                queue.cv.notify_all();
            }
        }
    }
}
