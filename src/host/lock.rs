//! Advisory lock table
//!
//! Transaction-scoped locks keyed by a caller-defined 64-bit integer.
//! The engine uses one per (table, group) to serialize inserts and
//! deletes within a group. A lock is granted at most once per key; the
//! holding transaction may re-acquire it freely, and every lock a
//! transaction holds is released together at commit or abort.

use crate::host::txn::TxnId;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;

#[derive(Default)]
struct LockState {
    owners: HashMap<u64, (TxnId, u32)>,
    held: HashMap<TxnId, Vec<u64>>,
}

/// Process-wide advisory lock table.
#[derive(Default)]
pub struct AdvisoryLocks {
    state: Mutex<LockState>,
    released: Condvar,
}

impl AdvisoryLocks {
    /// Fresh lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a lock for a transaction, blocking while another
    /// transaction holds it. Re-entrant for the holder.
    pub fn acquire(&self, key: u64, txid: TxnId) {
        let mut state = self.state.lock();
        loop {
            match state.owners.get(&key).map(|(owner, _)| *owner) {
                None => {
                    state.owners.insert(key, (txid, 1));
                    state.held.entry(txid).or_default().push(key);
                    return;
                }
                Some(owner) if owner == txid => {
                    if let Some((_, count)) = state.owners.get_mut(&key) {
                        *count += 1;
                    }
                    return;
                }
                Some(_) => {
                    self.released.wait(&mut state);
                }
            }
        }
    }

    /// Release every lock a transaction holds. Called at transaction end.
    pub fn release_all(&self, txid: TxnId) {
        let mut state = self.state.lock();
        if let Some(keys) = state.held.remove(&txid) {
            for key in keys {
                if state.owners.get(&key).map(|(o, _)| *o) == Some(txid) {
                    state.owners.remove(&key);
                }
            }
            self.released.notify_all();
        }
    }

    /// Whether a key is currently held (test and introspection aid).
    pub fn is_held(&self, key: u64) -> bool {
        self.state.lock().owners.contains_key(&key)
    }
}
