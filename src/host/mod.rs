//! Modeled host services
//!
//! The engine runs inside a host database; its catalog, page/buffer
//! layer, WAL, snapshot module, advisory locks and TOAST storage are
//! fixed collaborators. This module models them in-process: shared heap
//! pages behind per-page locks, an append-ordered WAL with replay, a
//! transaction table with MVCC and self-visible snapshots, a
//! transaction-scoped advisory lock table, and a TOAST side store.

/// Heap page storage
pub mod heap;
/// Advisory lock table
pub mod lock;
/// Snapshot visibility
pub mod snapshot;
/// TOAST side store
pub mod toast;
/// Transaction identity and commit state
pub mod txn;
/// Write-ahead log
pub mod wal;

pub use heap::{Heap, HeapRow, Page};
pub use lock::AdvisoryLocks;
pub use snapshot::{RowHeader, Snapshot};
pub use toast::ToastStore;
pub use txn::{TxnId, TxnManager, TxnStatus};
pub use wal::{Lsn, WalLog, WalRecord};
