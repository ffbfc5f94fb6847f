//! TOAST side store for oversized attributes
//!
//! Physical rows whose attributes exceed the TOAST threshold store an
//! external reference instead of the bytes; the content lands here.
//! Reconstruction resolves references transparently.

use crate::core::error::{HostError, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Side store for one table's externalized attribute values.
#[derive(Default)]
pub struct ToastStore {
    entries: DashMap<u64, Arc<Vec<u8>>>,
    next: AtomicU64,
}

impl ToastStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Park bytes, returning the reference id.
    pub fn store(&self, bytes: Vec<u8>) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries.insert(id, Arc::new(bytes));
        id
    }

    /// Resolve a reference.
    pub fn fetch(&self, id: u64) -> Result<Arc<Vec<u8>>> {
        self.entries
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| HostError::DanglingToast(id).into())
    }

    /// Drop one reference (vacuum of a dead row).
    pub fn remove(&self, id: u64) {
        self.entries.remove(&id);
    }

    /// Drop everything (truncate).
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of parked values.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
