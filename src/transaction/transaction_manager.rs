use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::debug;

use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{Result, Transaction, TransactionError, TransactionState};
use crate::transaction::wal::log_manager::LogManager;

/// Creates transactions and drives their lifecycle: monotonically assigned
/// ids (lower id = older for wait-die), Begin/Commit/Abort WAL records, and
/// lock release at completion (strict 2PL releases everything here, after
/// the state change).
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            log_manager: None,
        }
    }

    pub fn new_with_wal(lock_manager: Arc<LockManager>, log_manager: Arc<LogManager>) -> Self {
        let mut manager = Self::new(lock_manager);
        manager.log_manager = Some(log_manager);
        manager
    }

    /// Begin a new transaction, writing its BEGIN record when a WAL is
    /// attached
    pub fn begin(&self) -> Result<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let mut txn = match &self.log_manager {
            Some(log_manager) => Transaction::new_with_wal(txn_id, log_manager.clone()),
            None => Transaction::new(txn_id),
        };
        if self.log_manager.is_some() {
            txn.log_begin()?;
        }
        debug!("began transaction {}", txn_id);
        Ok(txn)
    }

    /// Commit the transaction and release every lock it holds
    pub fn commit(&self, txn: &mut Transaction) -> Result<()> {
        if matches!(
            txn.state(),
            TransactionState::Committed | TransactionState::Aborted
        ) {
            return Err(TransactionError::InvalidState(txn.id()));
        }

        if self.log_manager.is_some() {
            txn.log_commit()?;
        }
        txn.set_state(TransactionState::Committed);
        self.release_all_locks(txn)?;
        debug!("committed transaction {}", txn.id());
        Ok(())
    }

    /// Abort the transaction and release every lock it holds
    pub fn abort(&self, txn: &mut Transaction) -> Result<()> {
        if txn.state() == TransactionState::Committed {
            return Err(TransactionError::InvalidState(txn.id()));
        }

        if self.log_manager.is_some() && txn.state() != TransactionState::Aborted {
            txn.log_abort()?;
        }
        txn.set_state(TransactionState::Aborted);
        self.release_all_locks(txn)?;
        debug!("aborted transaction {}", txn.id());
        Ok(())
    }

    fn release_all_locks(&self, txn: &mut Transaction) -> Result<()> {
        let mut rids: Vec<_> = txn.shared_lock_set().iter().copied().collect();
        rids.extend(txn.exclusive_lock_set().iter().copied());
        for rid in rids {
            self.lock_manager
                .unlock(txn, rid)
                .map_err(|e| TransactionError::LockError(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Rid;

    #[test]
    fn test_ids_are_monotonic() {
        let tm = TransactionManager::new(Arc::new(LockManager::new(true)));
        let t1 = tm.begin().unwrap();
        let t2 = tm.begin().unwrap();
        assert!(t1.id() < t2.id());
    }

    #[test]
    fn test_commit_releases_strict_locks() {
        let lock_manager = Arc::new(LockManager::new(true));
        let tm = TransactionManager::new(lock_manager.clone());

        let rid = Rid::new(5, 0);
        let mut writer = tm.begin().unwrap();
        lock_manager.lock_exclusive(&mut writer, rid).unwrap();
        tm.commit(&mut writer).unwrap();
        assert!(writer.exclusive_lock_set().is_empty());

        // The record is free again for the next transaction
        let mut reader = tm.begin().unwrap();
        lock_manager.lock_shared(&mut reader, rid).unwrap();
        tm.commit(&mut reader).unwrap();
    }

    #[test]
    fn test_double_commit_rejected() {
        let tm = TransactionManager::new(Arc::new(LockManager::new(true)));
        let mut txn = tm.begin().unwrap();
        tm.commit(&mut txn).unwrap();
        assert!(matches!(
            tm.commit(&mut txn),
            Err(TransactionError::InvalidState(_))
        ));
    }

    #[test]
    fn test_abort_releases_locks() {
        let lock_manager = Arc::new(LockManager::new(true));
        let tm = TransactionManager::new(lock_manager.clone());

        let rid = Rid::new(7, 1);
        let mut txn = tm.begin().unwrap();
        lock_manager.lock_shared(&mut txn, rid).unwrap();
        tm.abort(&mut txn).unwrap();
        assert!(txn.shared_lock_set().is_empty());
        assert_eq!(txn.state(), TransactionState::Aborted);
    }
}
