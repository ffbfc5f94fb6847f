//! Row fetches
//!
//! Point reads by location with the MVCC check, and the index-fetch
//! variant that keeps the previous page pinned: successive fetches on
//! the same page (the common case under an ordered index) skip the
//! page lookup.

use crate::core::error::Result;
use crate::engine::Engine;
use crate::host::heap::Page;
use crate::host::snapshot::Snapshot;
use crate::tam::Table;
use crate::types::row::{RowLocation, TupleSlot};
use parking_lot::RwLock;
use std::sync::Arc;

/// Fetch the row version at a location into the slot.
pub(crate) fn fetch_row_version(
    table: &Table,
    snapshot: &Snapshot,
    loc: RowLocation,
    slot: &mut TupleSlot,
) -> Result<bool> {
    let Some(heap_row) = table.data().heap.read(loc) else {
        slot.clear();
        return Ok(false);
    };
    if !snapshot.is_visible(&heap_row.header, &table.engine().txns) {
        slot.clear();
        return Ok(false);
    }
    let row = Engine::decode_row(&heap_row.payload)?;
    let saved = loc;
    table.physical_to_logical(&row, snapshot, slot)?;
    slot.location = Some(saved);
    Ok(true)
}

/// Index fetch state with a pinned page.
pub struct IndexFetch {
    table: Table,
    snapshot: Snapshot,
    pinned: Option<(u32, Arc<RwLock<Page>>)>,
    /// Fetches served from the pinned page (introspection aid)
    pub pin_hits: u64,
}

impl IndexFetch {
    pub(crate) fn new(table: Table, snapshot: Snapshot) -> Self {
        Self {
            table,
            snapshot,
            pinned: None,
            pin_hits: 0,
        }
    }

    /// Drop the pin (index scan rescan).
    pub fn reset(&mut self) {
        self.pinned = None;
    }

    /// Fetch one indexed tuple by location.
    pub fn fetch(&mut self, loc: RowLocation, slot: &mut TupleSlot) -> Result<bool> {
        let page = match &self.pinned {
            Some((block, page)) if *block == loc.block => {
                self.pin_hits += 1;
                Arc::clone(page)
            }
            _ => {
                let Some(page) = self.table.data().heap.page(loc.block) else {
                    slot.clear();
                    return Ok(false);
                };
                self.pinned = Some((loc.block, Arc::clone(&page)));
                page
            }
        };

        let copied = {
            let page = page.read();
            page.row(loc.offset).cloned()
        };
        let Some(heap_row) = copied else {
            slot.clear();
            return Ok(false);
        };
        if !self.snapshot.is_visible(&heap_row.header, &self.table.engine().txns) {
            slot.clear();
            return Ok(false);
        }
        let row = Engine::decode_row(&heap_row.payload)?;
        let saved = loc;
        self.table.physical_to_logical(&row, &self.snapshot, slot)?;
        slot.location = Some(saved);
        Ok(true)
    }
}
