//! Snapshot visibility
//!
//! A row is visible iff its inserting transaction committed (or is the
//! current transaction) and its deleting transaction is invalid, aborted,
//! or still in progress in another backend. MVCC snapshots additionally
//! hide work from transactions that were in progress when the snapshot
//! was taken; the self-visible kind skips that set and therefore observes
//! the current transaction's own modifications, which the delete-path
//! stats refresh depends on.

use crate::host::txn::{TxnId, TxnManager, TxnStatus};
use std::collections::HashSet;

/// A visibility snapshot held by one backend.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Owning transaction
    pub txid: TxnId,
    /// Transactions whose work this snapshot cannot see.
    /// `None` makes the snapshot self-visible: only commit state counts.
    concurrent: Option<HashSet<TxnId>>,
}

/// Insert/delete header of one physical row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RowHeader {
    /// Inserting transaction
    pub xmin: TxnId,
    /// Deleting transaction, if any
    pub xmax: Option<TxnId>,
}

impl Snapshot {
    /// MVCC snapshot: excludes everything in progress right now.
    pub fn mvcc(txid: TxnId, txns: &TxnManager) -> Self {
        Self {
            txid,
            concurrent: Some(txns.in_progress_except(txid).into_iter().collect()),
        }
    }

    /// Self-visible snapshot: sees the current transaction's own
    /// uncommitted inserts and deletes.
    pub fn self_visible(txid: TxnId) -> Self {
        Self {
            txid,
            concurrent: None,
        }
    }

    fn insert_visible(&self, xmin: TxnId, txns: &TxnManager) -> bool {
        if xmin == self.txid {
            return true;
        }
        if let Some(concurrent) = &self.concurrent {
            if concurrent.contains(&xmin) {
                return false;
            }
        }
        txns.status(xmin) == TxnStatus::Committed
    }

    fn delete_hides(&self, xmax: TxnId, txns: &TxnManager) -> bool {
        if xmax == self.txid {
            // Our own delete: the row is gone for us.
            return true;
        }
        if let Some(concurrent) = &self.concurrent {
            if concurrent.contains(&xmax) {
                return false;
            }
        }
        txns.status(xmax) == TxnStatus::Committed
    }

    /// Full visibility check for one row header.
    pub fn is_visible(&self, header: &RowHeader, txns: &TxnManager) -> bool {
        if !self.insert_visible(header.xmin, txns) {
            return false;
        }
        match header.xmax {
            None => true,
            Some(xmax) => !self.delete_hides(xmax, txns),
        }
    }
}
