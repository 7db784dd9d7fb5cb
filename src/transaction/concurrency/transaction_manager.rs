use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Transaction manager - responsible for creating and tracking transactions
pub struct TransactionManager {
    /// Next transaction ID to assign. Ids increase monotonically from 0;
    /// wound-wait treats a lower id as the older transaction.
    next_txn_id: AtomicU32,

    /// Lock manager releasing a transaction's locks at commit/abort
    lock_manager: Arc<LockManager>,

    /// Active transactions map (txn_id -> Transaction)
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    /// Create a new transaction manager
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Begin a new transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Commit a transaction, releasing every lock it still holds.
    ///
    /// Committing a transaction that was aborted underneath the caller
    /// (wounded, or a protocol violation) still releases its locks but
    /// reports `InvalidState` so the caller rolls back instead.
    pub fn commit(&self, txn_id: TxnId) -> Result<(), TransactionError> {
        let txn = self
            .active_transactions
            .lock()
            .remove(&txn_id)
            .ok_or(TransactionError::NotFound(txn_id))?;

        self.release_locks(&txn);
        match txn.state() {
            TransactionState::Aborted => Err(TransactionError::InvalidState(txn_id)),
            _ => {
                txn.set_state(TransactionState::Committed);
                Ok(())
            }
        }
    }

    /// Abort a transaction, releasing every lock it still holds
    pub fn abort(&self, txn_id: TxnId) -> Result<(), TransactionError> {
        let txn = self
            .active_transactions
            .lock()
            .remove(&txn_id)
            .ok_or(TransactionError::NotFound(txn_id))?;

        self.release_locks(&txn);
        txn.set_state(TransactionState::Aborted);
        Ok(())
    }

    /// Get a transaction by ID
    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// Get all active transaction IDs
    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().cloned().collect()
    }

    fn release_locks(&self, txn: &Arc<Transaction>) {
        for rid in txn.shared_lock_set() {
            self.lock_manager.unlock(txn, rid);
        }
        for rid in txn.exclusive_lock_set() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}
