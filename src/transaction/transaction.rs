use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;

use crate::common::types::{Lsn, PageId, Rid, TxnId, INVALID_LSN};
use crate::storage::page::PageLatch;
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::log_record::LogRecord;

/// Two-phase-locking state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Errors that can occur during transaction processing
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} is already committed or aborted")]
    InvalidState(TxnId),

    #[error("Failed to write to WAL: {0}")]
    LogError(String),

    #[error("Transaction has no write-ahead log attached")]
    WalDisabled,

    #[error("Lock release failed: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, TransactionError>;

/// An active transaction. Owns its 2PL lock sets, the set of page latches
/// held during an index operation (root first), and the pages scheduled for
/// deletion once those latches are released. A smaller id means an older
/// transaction under the wait-die policy.
pub struct Transaction {
    id: TxnId,
    state: TransactionState,
    prev_lsn: Lsn,
    shared_lock_set: HashSet<Rid>,
    exclusive_lock_set: HashSet<Rid>,
    page_set: VecDeque<PageLatch>,
    deleted_page_set: HashSet<PageId>,
    log_manager: Option<Arc<LogManager>>,
}

impl Transaction {
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            state: TransactionState::Growing,
            prev_lsn: INVALID_LSN,
            shared_lock_set: HashSet::new(),
            exclusive_lock_set: HashSet::new(),
            page_set: VecDeque::new(),
            deleted_page_set: HashSet::new(),
            log_manager: None,
        }
    }

    pub fn new_with_wal(id: TxnId, log_manager: Arc<LogManager>) -> Self {
        let mut txn = Self::new(id);
        txn.log_manager = Some(log_manager);
        txn
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn
    }

    pub fn set_prev_lsn(&mut self, lsn: Lsn) {
        self.prev_lsn = lsn;
    }

    pub fn shared_lock_set(&self) -> &HashSet<Rid> {
        &self.shared_lock_set
    }

    pub fn shared_lock_set_mut(&mut self) -> &mut HashSet<Rid> {
        &mut self.shared_lock_set
    }

    pub fn exclusive_lock_set(&self) -> &HashSet<Rid> {
        &self.exclusive_lock_set
    }

    pub fn exclusive_lock_set_mut(&mut self) -> &mut HashSet<Rid> {
        &mut self.exclusive_lock_set
    }

    pub fn page_set(&self) -> &VecDeque<PageLatch> {
        &self.page_set
    }

    pub fn page_set_mut(&mut self) -> &mut VecDeque<PageLatch> {
        &mut self.page_set
    }

    pub fn add_to_page_set(&mut self, latch: PageLatch) {
        self.page_set.push_back(latch);
    }

    pub fn deleted_page_set(&self) -> &HashSet<PageId> {
        &self.deleted_page_set
    }

    pub fn deleted_page_set_mut(&mut self) -> &mut HashSet<PageId> {
        &mut self.deleted_page_set
    }

    fn append_record(&mut self, mut record: LogRecord) -> Result<Lsn> {
        let log_manager = self.log_manager.as_ref().ok_or(TransactionError::WalDisabled)?;
        let lsn = log_manager
            .append_log_record(&mut record)
            .map_err(|e| TransactionError::LogError(e.to_string()))?;
        self.prev_lsn = lsn;
        Ok(lsn)
    }

    fn check_active(&self) -> Result<()> {
        match self.state {
            TransactionState::Committed | TransactionState::Aborted => {
                Err(TransactionError::InvalidState(self.id))
            }
            _ => Ok(()),
        }
    }

    /// Write the BEGIN record for this transaction
    pub fn log_begin(&mut self) -> Result<Lsn> {
        self.check_active()?;
        self.append_record(LogRecord::new_begin(self.id))
    }

    /// Write the COMMIT record for this transaction
    pub fn log_commit(&mut self) -> Result<Lsn> {
        self.check_active()?;
        let record = LogRecord::new_commit(self.id, self.prev_lsn);
        self.append_record(record)
    }

    /// Write the ABORT record for this transaction
    pub fn log_abort(&mut self) -> Result<Lsn> {
        self.check_active()?;
        let record = LogRecord::new_abort(self.id, self.prev_lsn);
        self.append_record(record)
    }

    /// Record the insertion of a tuple
    pub fn log_insert(&mut self, rid: Rid, tuple: &[u8]) -> Result<Lsn> {
        self.check_active()?;
        let record = LogRecord::new_insert(self.id, self.prev_lsn, rid, tuple.to_vec());
        self.append_record(record)
    }

    /// Record that a tuple was marked deleted
    pub fn log_mark_delete(&mut self, rid: Rid, tuple: &[u8]) -> Result<Lsn> {
        self.check_active()?;
        let record = LogRecord::new_mark_delete(self.id, self.prev_lsn, rid, tuple.to_vec());
        self.append_record(record)
    }

    /// Record that a marked tuple was physically removed
    pub fn log_apply_delete(&mut self, rid: Rid, tuple: &[u8]) -> Result<Lsn> {
        self.check_active()?;
        let record = LogRecord::new_apply_delete(self.id, self.prev_lsn, rid, tuple.to_vec());
        self.append_record(record)
    }

    /// Record that a delete mark was rolled back
    pub fn log_rollback_delete(&mut self, rid: Rid, tuple: &[u8]) -> Result<Lsn> {
        self.check_active()?;
        let record = LogRecord::new_rollback_delete(self.id, self.prev_lsn, rid, tuple.to_vec());
        self.append_record(record)
    }

    /// Record an in-place tuple update
    pub fn log_update(&mut self, rid: Rid, old_tuple: &[u8], new_tuple: &[u8]) -> Result<Lsn> {
        self.check_active()?;
        let record = LogRecord::new_update(
            self.id,
            self.prev_lsn,
            rid,
            old_tuple.to_vec(),
            new_tuple.to_vec(),
        );
        self.append_record(record)
    }

    /// Record the allocation of a new page linked after `prev_page_id`
    pub fn log_new_page(&mut self, prev_page_id: PageId) -> Result<Lsn> {
        self.check_active()?;
        let record = LogRecord::new_new_page(self.id, self.prev_lsn, prev_page_id);
        self.append_record(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::DiskManager;
    use crate::transaction::wal::log_manager::LogConfig;
    use tempfile::NamedTempFile;

    fn create_wal_transaction(id: TxnId) -> (Transaction, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        let log_manager = Arc::new(LogManager::new(disk, LogConfig::default()));
        (Transaction::new_with_wal(id, log_manager), file)
    }

    #[test]
    fn test_new_transaction_defaults() {
        let txn = Transaction::new(3);
        assert_eq!(txn.id(), 3);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.prev_lsn(), INVALID_LSN);
        assert!(txn.shared_lock_set().is_empty());
        assert!(txn.exclusive_lock_set().is_empty());
        assert!(txn.page_set().is_empty());
        assert!(txn.deleted_page_set().is_empty());
    }

    #[test]
    fn test_prev_lsn_chains_through_log_helpers() {
        let (mut txn, _file) = create_wal_transaction(1);

        let begin_lsn = txn.log_begin().unwrap();
        assert_eq!(txn.prev_lsn(), begin_lsn);

        let insert_lsn = txn.log_insert(Rid::new(2, 0), &[1, 2, 3]).unwrap();
        assert!(insert_lsn > begin_lsn);
        assert_eq!(txn.prev_lsn(), insert_lsn);

        let commit_lsn = txn.log_commit().unwrap();
        assert!(commit_lsn > insert_lsn);
    }

    #[test]
    fn test_log_helpers_fail_after_completion() {
        let (mut txn, _file) = create_wal_transaction(1);
        txn.log_begin().unwrap();
        txn.set_state(TransactionState::Committed);
        assert!(matches!(
            txn.log_insert(Rid::new(1, 1), &[0]),
            Err(TransactionError::InvalidState(1))
        ));
    }

    #[test]
    fn test_wal_disabled() {
        let mut txn = Transaction::new(9);
        assert!(matches!(txn.log_begin(), Err(TransactionError::WalDisabled)));
    }
}
