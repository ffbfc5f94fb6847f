//! Logical and physical row representations
//!
//! A logical row is what the executor sees: one [`Value`] per column with
//! delta columns fully reconstructed. A physical row is what lives on a
//! heap page: delta columns replaced by opaque delta blobs, oversized
//! attributes parked in the TOAST side store, and the sequence column set.

use crate::types::value::Value;
use serde::{Deserialize, Serialize};

/// Address of a physical row: page number plus line pointer index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowLocation {
    /// Heap page number
    pub block: u32,
    /// Line pointer index within the page
    pub offset: u16,
}

impl RowLocation {
    /// Convenience constructor.
    pub fn new(block: u32, offset: u16) -> Self {
        Self { block, offset }
    }
}

/// One stored attribute of a physical row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhysicalValue {
    /// Value stored inline in the row
    Inline(Value),
    /// Value parked in the TOAST side store
    External {
        /// TOAST store handle
        toast_id: u64,
        /// Size of the externalized bytes
        size: u32,
    },
}

/// A physical row as serialized onto a heap page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalRow {
    /// One entry per schema column
    pub values: Vec<PhysicalValue>,
}

/// Output slot filled by scans and fetches.
///
/// Reconstruction clears the location field (mirroring the executor slot
/// lifecycle); callers that need the physical address must save it before
/// converting physical to logical and restore it afterwards.
#[derive(Debug, Clone, Default)]
pub struct TupleSlot {
    /// Reconstructed logical values
    pub values: Vec<Value>,
    /// Physical address of the row, if any
    pub location: Option<RowLocation>,
}

impl TupleSlot {
    /// Empty the slot, dropping values and the location.
    pub fn clear(&mut self) {
        self.values.clear();
        self.location = None;
    }

    /// Value by schema position.
    pub fn value(&self, pos: usize) -> &Value {
        &self.values[pos]
    }
}
