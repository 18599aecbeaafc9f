use std::collections::HashMap;

use crossbeam_channel::{bounded, Sender};
use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Rid, TxnId};
use crate::transaction::transaction::{Transaction, TransactionState};

/// Mode held or requested on a record lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Transaction {0} aborted")]
    Aborted(TxnId),

    #[error("Transaction {txn_id} holds no lock on {rid}")]
    NotHeld { txn_id: TxnId, rid: Rid },

    #[error("State violation: {0}")]
    StateViolation(String),

    #[error("Lock table corruption: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, LockError>;

/// A waiter parked on a record lock. The one-shot channel is completed with
/// true when the lock is granted and false when wait-die aborts the waiter.
struct Waiter {
    txn_id: TxnId,
    target: LockMode,
    grant_tx: Sender<bool>,
}

/// Per-record lock state: the granted set (a single holder in Exclusive
/// mode, one or more in Shared mode) and the parked waiters in arrival order
struct WaitList {
    state: LockMode,
    granted: Vec<TxnId>,
    waiters: Vec<Waiter>,
}

impl WaitList {
    fn new(txn_id: TxnId, state: LockMode) -> Self {
        Self {
            state,
            granted: vec![txn_id],
            waiters: Vec::new(),
        }
    }
}

/// Tuple-level lock manager implementing two-phase locking with the
/// wait-die deadlock prevention policy: an older transaction (smaller id)
/// waits for a younger holder; a younger transaction requesting a
/// conflicting lock is aborted immediately.
///
/// In strict mode locks may only be released once the owning transaction
/// has committed or aborted; in non-strict mode the first unlock moves a
/// growing transaction into its shrinking phase.
pub struct LockManager {
    strict: bool,
    record_table: Mutex<HashMap<Rid, WaitList>>,
}

impl LockManager {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            record_table: Mutex::new(HashMap::new()),
        }
    }

    fn check_acquirable(txn: &mut Transaction) -> Result<()> {
        match txn.state() {
            TransactionState::Aborted => Err(LockError::Aborted(txn.id())),
            TransactionState::Committed => Err(LockError::StateViolation(format!(
                "transaction {} acquired a lock after commit",
                txn.id()
            ))),
            TransactionState::Shrinking => {
                // Acquiring in the shrinking phase breaks 2PL
                txn.set_state(TransactionState::Aborted);
                Err(LockError::Aborted(txn.id()))
            }
            TransactionState::Growing => Ok(()),
        }
    }

    /// Acquire a shared lock on the record, blocking while a conflicting
    /// older holder keeps it. Re-entrant for a transaction that already
    /// holds the record in either mode.
    pub fn lock_shared(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        Self::check_acquirable(txn)?;

        let mut table = self.record_table.lock();
        let list = match table.get_mut(&rid) {
            None => {
                table.insert(rid, WaitList::new(txn.id(), LockMode::Shared));
                txn.shared_lock_set_mut().insert(rid);
                return Ok(());
            }
            Some(list) => list,
        };

        match list.state {
            LockMode::Shared => {
                if txn.shared_lock_set().contains(&rid) {
                    return Ok(());
                }
                list.granted.push(txn.id());
                txn.shared_lock_set_mut().insert(rid);
                Ok(())
            }
            LockMode::Exclusive => {
                let holder = *list.granted.first().ok_or_else(|| {
                    LockError::Corruption("exclusive wait-list with no holder".to_string())
                })?;
                if holder == txn.id() {
                    return Ok(());
                }
                if txn.id() > holder {
                    // Wait-die: the younger requester dies
                    debug!("txn {} dies requesting S on {} held by {}", txn.id(), rid, holder);
                    txn.set_state(TransactionState::Aborted);
                    return Err(LockError::Aborted(txn.id()));
                }

                let (grant_tx, grant_rx) = bounded(1);
                list.waiters.push(Waiter {
                    txn_id: txn.id(),
                    target: LockMode::Shared,
                    grant_tx,
                });
                drop(table);

                if grant_rx.recv().unwrap_or(false) {
                    // The waker already installed us in the granted set
                    txn.shared_lock_set_mut().insert(rid);
                    Ok(())
                } else {
                    txn.set_state(TransactionState::Aborted);
                    Err(LockError::Aborted(txn.id()))
                }
            }
        }
    }

    /// Acquire an exclusive lock on the record. Dies if any current holder
    /// is younger; re-entrant when the transaction already holds the record
    /// exclusively.
    pub fn lock_exclusive(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        Self::check_acquirable(txn)?;

        let mut table = self.record_table.lock();
        let list = match table.get_mut(&rid) {
            None => {
                table.insert(rid, WaitList::new(txn.id(), LockMode::Exclusive));
                txn.exclusive_lock_set_mut().insert(rid);
                return Ok(());
            }
            Some(list) => list,
        };

        for &holder in &list.granted {
            if txn.id() > holder {
                debug!("txn {} dies requesting X on {} held by {}", txn.id(), rid, holder);
                txn.set_state(TransactionState::Aborted);
                return Err(LockError::Aborted(txn.id()));
            }
            if list.state == LockMode::Exclusive && txn.id() == holder {
                return Ok(());
            }
        }

        let (grant_tx, grant_rx) = bounded(1);
        list.waiters.push(Waiter {
            txn_id: txn.id(),
            target: LockMode::Exclusive,
            grant_tx,
        });
        drop(table);

        if grant_rx.recv().unwrap_or(false) {
            txn.exclusive_lock_set_mut().insert(rid);
            Ok(())
        } else {
            txn.set_state(TransactionState::Aborted);
            Err(LockError::Aborted(txn.id()))
        }
    }

    /// Upgrade a held shared lock to exclusive. Not atomic: the shared lock
    /// is released and an exclusive lock is reacquired, so another shared
    /// holder may be waited on (or trigger wait-die) in between.
    pub fn lock_upgrade(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        Self::check_acquirable(txn)?;

        {
            let table = self.record_table.lock();
            let list = table.get(&rid).ok_or(LockError::NotHeld {
                txn_id: txn.id(),
                rid,
            })?;
            if !list.granted.contains(&txn.id()) {
                return Err(LockError::NotHeld {
                    txn_id: txn.id(),
                    rid,
                });
            }
            if list.state == LockMode::Exclusive {
                return Ok(());
            }
        }

        self.release(txn, rid, true)?;
        self.lock_exclusive(txn, rid)
    }

    /// Release the lock the transaction holds on the record. In strict mode
    /// only committed or aborted transactions may unlock; in non-strict
    /// mode the first unlock moves a growing transaction to shrinking.
    pub fn unlock(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        if self.strict
            && !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            )
        {
            return Err(LockError::StateViolation(format!(
                "strict 2PL: transaction {} unlocked {} before completion",
                txn.id(),
                rid
            )));
        }
        self.release(txn, rid, false)
    }

    fn release(&self, txn: &mut Transaction, rid: Rid, for_upgrade: bool) -> Result<()> {
        let mut table = self.record_table.lock();
        let list = table.get_mut(&rid).ok_or_else(|| {
            LockError::Corruption(format!("unlock of {} which has no wait-list", rid))
        })?;

        let pos = list
            .granted
            .iter()
            .position(|&id| id == txn.id())
            .ok_or_else(|| {
                LockError::Corruption(format!(
                    "unlock of {} by non-holder transaction {}",
                    rid,
                    txn.id()
                ))
            })?;
        list.granted.remove(pos);

        match list.state {
            LockMode::Exclusive => {
                txn.exclusive_lock_set_mut().remove(&rid);
            }
            LockMode::Shared => {
                txn.shared_lock_set_mut().remove(&rid);
            }
        }

        if !for_upgrade && !self.strict && txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        if !list.granted.is_empty() {
            if list.state != LockMode::Shared {
                return Err(LockError::Corruption(
                    "multiple holders of an exclusive lock".to_string(),
                ));
            }
            return Ok(());
        }

        if list.waiters.is_empty() {
            table.remove(&rid);
            return Ok(());
        }

        // Wake the most recently enqueued waiter and install it as the
        // holder before the table latch drops, then wait-die the younger
        // waiters parked behind it. Selection is deliberately not FIFO; the
        // oldest surviving waiter still makes progress because everyone
        // younger than the winner is aborted here.
        let winner = list.waiters.pop().expect("wait-list emptied concurrently");
        list.state = winner.target;
        list.granted.push(winner.txn_id);
        let _ = winner.grant_tx.send(true);
        debug!("txn {} granted {:?} on {}", winner.txn_id, winner.target, rid);

        let winner_id = winner.txn_id;
        list.waiters.retain(|waiter| {
            if waiter.txn_id > winner_id {
                let _ = waiter.grant_tx.send(false);
                false
            } else {
                true
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_locks_are_compatible() {
        let lm = LockManager::new(false);
        let rid = Rid::new(1, 0);
        let mut t1 = Transaction::new(1);
        let mut t2 = Transaction::new(2);

        lm.lock_shared(&mut t1, rid).unwrap();
        lm.lock_shared(&mut t2, rid).unwrap();
        assert!(t1.shared_lock_set().contains(&rid));
        assert!(t2.shared_lock_set().contains(&rid));

        lm.unlock(&mut t1, rid).unwrap();
        lm.unlock(&mut t2, rid).unwrap();
    }

    #[test]
    fn test_younger_exclusive_requester_dies() {
        let lm = LockManager::new(false);
        let rid = Rid::new(1, 0);
        let mut older = Transaction::new(1);
        let mut younger = Transaction::new(2);

        lm.lock_exclusive(&mut older, rid).unwrap();
        assert!(matches!(
            lm.lock_shared(&mut younger, rid),
            Err(LockError::Aborted(2))
        ));
        assert_eq!(younger.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_shared_reacquire_is_noop() {
        let lm = LockManager::new(false);
        let rid = Rid::new(1, 0);
        let mut txn = Transaction::new(1);

        lm.lock_shared(&mut txn, rid).unwrap();
        lm.lock_shared(&mut txn, rid).unwrap();
        assert_eq!(txn.shared_lock_set().len(), 1);
    }

    #[test]
    fn test_unlock_moves_to_shrinking_then_acquire_aborts() {
        let lm = LockManager::new(false);
        let mut txn = Transaction::new(1);
        let first = Rid::new(1, 0);
        let second = Rid::new(1, 1);

        lm.lock_shared(&mut txn, first).unwrap();
        lm.unlock(&mut txn, first).unwrap();
        assert_eq!(txn.state(), TransactionState::Shrinking);

        assert!(matches!(
            lm.lock_shared(&mut txn, second),
            Err(LockError::Aborted(1))
        ));
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_strict_unlock_requires_completion() {
        let lm = LockManager::new(true);
        let rid = Rid::new(1, 0);
        let mut txn = Transaction::new(1);

        lm.lock_exclusive(&mut txn, rid).unwrap();
        assert!(matches!(
            lm.unlock(&mut txn, rid),
            Err(LockError::StateViolation(_))
        ));

        txn.set_state(TransactionState::Committed);
        lm.unlock(&mut txn, rid).unwrap();
    }

    #[test]
    fn test_upgrade_sole_shared_holder() {
        let lm = LockManager::new(false);
        let rid = Rid::new(1, 0);
        let mut txn = Transaction::new(1);

        lm.lock_shared(&mut txn, rid).unwrap();
        lm.lock_upgrade(&mut txn, rid).unwrap();
        assert!(txn.exclusive_lock_set().contains(&rid));
        assert!(!txn.shared_lock_set().contains(&rid));
        // Upgrading must not end the growing phase
        assert_eq!(txn.state(), TransactionState::Growing);
    }

    #[test]
    fn test_upgrade_without_shared_lock_fails() {
        let lm = LockManager::new(false);
        let rid = Rid::new(1, 0);
        let mut txn = Transaction::new(1);
        assert!(matches!(
            lm.lock_upgrade(&mut txn, rid),
            Err(LockError::NotHeld { .. })
        ));
    }
}
