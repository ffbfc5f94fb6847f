//! Write-ahead log
//!
//! Standard insert/delete/truncate records plus transaction outcomes, in
//! the host's record format (bincode payloads). Pages are mutated only
//! after the matching record is appended, so replaying the log onto empty
//! heaps reproduces the pre-crash state exactly; recovery then treats
//! transactions without a commit record as aborted.

use crate::host::heap::Heap;
use crate::host::snapshot::RowHeader;
use crate::host::txn::{TxnId, TxnManager};
use crate::types::row::RowLocation;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Log sequence number.
pub type Lsn = u64;

/// One WAL record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalRecord {
    /// Row inserted
    Insert {
        /// Table id
        table: u32,
        /// Row location
        loc: RowLocation,
        /// Inserting transaction
        xmin: TxnId,
        /// Serialized physical row
        payload: Vec<u8>,
    },
    /// Row marked deleted
    Delete {
        /// Table id
        table: u32,
        /// Row location
        loc: RowLocation,
        /// Deleting transaction
        xmax: TxnId,
    },
    /// Table truncated
    Truncate {
        /// Table id
        table: u32,
    },
    /// Transaction committed
    Commit {
        /// Transaction id
        txid: TxnId,
    },
    /// Transaction aborted
    Abort {
        /// Transaction id
        txid: TxnId,
    },
}

/// In-memory WAL: an ordered record list with monotone LSNs.
#[derive(Default)]
pub struct WalLog {
    records: Mutex<Vec<WalRecord>>,
}

impl WalLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record, returning its LSN.
    pub fn append(&self, record: WalRecord) -> Lsn {
        let mut records = self.records.lock();
        records.push(record);
        records.len() as Lsn
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Snapshot of all records (tests and replay).
    pub fn records(&self) -> Vec<WalRecord> {
        self.records.lock().clone()
    }

    /// Replay the log into fresh heaps, marking transaction outcomes in
    /// the given manager. Returns the rebuilt heap per table id.
    pub fn replay(&self, page_budget: usize, txns: &TxnManager) -> HashMap<u32, Heap> {
        let mut heaps: HashMap<u32, Heap> = HashMap::new();
        for record in self.records.lock().iter() {
            match record {
                WalRecord::Insert {
                    table,
                    loc,
                    xmin,
                    payload,
                } => {
                    heaps
                        .entry(*table)
                        .or_insert_with(|| Heap::new(page_budget))
                        .restore_at(
                            *loc,
                            RowHeader {
                                xmin: *xmin,
                                xmax: None,
                            },
                            payload.clone(),
                        );
                }
                WalRecord::Delete { table, loc, xmax } => {
                    if let Some(heap) = heaps.get(table) {
                        // A delete record always follows the matching
                        // insert record in the log.
                        let _ = heap.mark_deleted(*loc, *xmax);
                    }
                }
                WalRecord::Truncate { table } => {
                    if let Some(heap) = heaps.get(table) {
                        heap.truncate();
                    }
                }
                WalRecord::Commit { txid } => txns.mark_committed(*txid),
                WalRecord::Abort { txid } => txns.mark_aborted(*txid),
            }
        }
        heaps
    }
}
