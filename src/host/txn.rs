//! Transaction identity and commit state
//!
//! The host transaction manager is modeled minimally: monotonically
//! increasing transaction ids and a commit-state map. Visibility decisions
//! live in [`crate::host::snapshot`].

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Transaction identifier.
pub type TxnId = u64;

/// Commit state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    /// Still running
    InProgress,
    /// Committed
    Committed,
    /// Rolled back (or never seen, which recovery treats the same way)
    Aborted,
}

/// Process-wide transaction table.
pub struct TxnManager {
    next: AtomicU64,
    states: DashMap<TxnId, TxnStatus>,
}

impl Default for TxnManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TxnManager {
    /// Fresh manager; ids start at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            states: DashMap::new(),
        }
    }

    /// Start a new transaction.
    pub fn begin(&self) -> TxnId {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.states.insert(id, TxnStatus::InProgress);
        id
    }

    /// Commit state of a transaction. Unknown ids read as aborted, which
    /// is exactly what crash recovery gives uncommitted work.
    pub fn status(&self, id: TxnId) -> TxnStatus {
        self.states.get(&id).map(|s| *s).unwrap_or(TxnStatus::Aborted)
    }

    /// Mark a transaction committed.
    pub fn mark_committed(&self, id: TxnId) {
        self.states.insert(id, TxnStatus::Committed);
    }

    /// Mark a transaction aborted.
    pub fn mark_aborted(&self, id: TxnId) {
        self.states.insert(id, TxnStatus::Aborted);
    }

    /// Ids of all in-progress transactions except `excluding`.
    pub fn in_progress_except(&self, excluding: TxnId) -> Vec<TxnId> {
        self.states
            .iter()
            .filter(|e| *e.value() == TxnStatus::InProgress && *e.key() != excluding)
            .map(|e| *e.key())
            .collect()
    }

    /// Oldest transaction still in progress, if any. Vacuum may only
    /// remove rows whose deleter committed before this horizon.
    pub fn oldest_active(&self) -> Option<TxnId> {
        self.states
            .iter()
            .filter(|e| *e.value() == TxnStatus::InProgress)
            .map(|e| *e.key())
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let mgr = TxnManager::new();
        let a = mgr.begin();
        let b = mgr.begin();
        assert!(b > a);
        assert_eq!(mgr.status(a), TxnStatus::InProgress);
        mgr.mark_committed(a);
        mgr.mark_aborted(b);
        assert_eq!(mgr.status(a), TxnStatus::Committed);
        assert_eq!(mgr.status(b), TxnStatus::Aborted);
        assert_eq!(mgr.status(999), TxnStatus::Aborted);
    }

    #[test]
    fn oldest_active_tracks_horizon() {
        let mgr = TxnManager::new();
        let a = mgr.begin();
        let b = mgr.begin();
        assert_eq!(mgr.oldest_active(), Some(a));
        mgr.mark_committed(a);
        assert_eq!(mgr.oldest_active(), Some(b));
        mgr.mark_committed(b);
        assert_eq!(mgr.oldest_active(), None);
    }
}
