//! Sequential, bitmap and analyze scans
//!
//! All three iterate heap pages, apply visibility, and run physical
//! rows through reconstruction. The pre-reconstruction location is
//! saved around `physical_to_logical` (which clears it) and written
//! back into the slot, so downstream consumers (index scans above all)
//! always see a valid row address.

use crate::core::error::Result;
use crate::engine::Engine;
use crate::host::snapshot::Snapshot;
use crate::tam::Table;
use crate::types::row::{RowLocation, TupleSlot};

/// Forward sequential scan state.
pub struct TableScan {
    table: Table,
    snapshot: Snapshot,
    block: u32,
    offset: u16,
}

impl TableScan {
    pub(crate) fn new(table: Table, snapshot: Snapshot) -> Self {
        Self {
            table,
            snapshot,
            block: 0,
            offset: 0,
        }
    }

    /// Restart the scan from the first page.
    pub fn rescan(&mut self) {
        self.block = 0;
        self.offset = 0;
    }

    /// Advance to the next visible row, reconstructing it into the slot.
    /// Returns `false` when the table is exhausted.
    pub fn next(&mut self, slot: &mut TupleSlot) -> Result<bool> {
        let heap = &self.table.data().heap;
        loop {
            if self.block >= heap.num_pages() {
                slot.clear();
                return Ok(false);
            }
            let Some(page) = heap.page(self.block) else {
                slot.clear();
                return Ok(false);
            };

            // Copy the row out before reconstruction so the page lock is
            // never held across chain walks.
            let copied = {
                let page = page.read();
                let mut found = None;
                while self.offset < page.max_offset() {
                    let offset = self.offset;
                    self.offset += 1;
                    let Some(heap_row) = page.row(offset) else { continue };
                    if !self.snapshot.is_visible(&heap_row.header, &self.table.engine().txns) {
                        continue;
                    }
                    found = Some((RowLocation::new(self.block, offset), heap_row.payload.clone()));
                    break;
                }
                found
            };

            match copied {
                Some((loc, payload)) => {
                    let row = Engine::decode_row(&payload)?;
                    // Reconstruction clears the slot's location; keep it
                    // across the call and write it back.
                    let saved = loc;
                    self.table.physical_to_logical(&row, &self.snapshot, slot)?;
                    slot.location = Some(saved);
                    return Ok(true);
                }
                None => {
                    self.block += 1;
                    self.offset = 0;
                }
            }
        }
    }
}

/// Bitmap scan over an explicit set of candidate locations.
pub struct BitmapScan {
    table: Table,
    snapshot: Snapshot,
    locations: Vec<RowLocation>,
    next_idx: usize,
    block_end: usize,
    current_block: Option<u32>,
}

impl BitmapScan {
    pub(crate) fn new(table: Table, snapshot: Snapshot, mut locations: Vec<RowLocation>) -> Self {
        locations.sort();
        locations.dedup();
        Self {
            table,
            snapshot,
            locations,
            next_idx: 0,
            block_end: 0,
            current_block: None,
        }
    }

    /// Position on the next block that has candidate locations.
    pub fn next_block(&mut self) -> Option<u32> {
        self.next_idx = self.block_end;
        let first = self.locations.get(self.next_idx)?;
        let block = first.block;
        let mut end = self.next_idx;
        while end < self.locations.len() && self.locations[end].block == block {
            end += 1;
        }
        self.block_end = end;
        self.current_block = Some(block);
        Some(block)
    }

    /// Next visible candidate tuple within the current block.
    pub fn next_tuple(&mut self, slot: &mut TupleSlot) -> Result<bool> {
        let Some(block) = self.current_block else {
            slot.clear();
            return Ok(false);
        };
        while self.next_idx < self.block_end {
            let loc = self.locations[self.next_idx];
            self.next_idx += 1;
            debug_assert_eq!(loc.block, block);
            let Some(heap_row) = self.table.data().heap.read(loc) else { continue };
            if !self.snapshot.is_visible(&heap_row.header, &self.table.engine().txns) {
                continue;
            }
            let row = Engine::decode_row(&heap_row.payload)?;
            let saved = loc;
            self.table.physical_to_logical(&row, &self.snapshot, slot)?;
            slot.location = Some(saved);
            return Ok(true);
        }
        slot.clear();
        Ok(false)
    }
}

/// Analyze sampling scan: the caller drives block selection, tuples come
/// back reconstructed so samples reflect logical values.
pub struct AnalyzeScan {
    table: Table,
    snapshot: Snapshot,
    block: Option<u32>,
    offset: u16,
}

impl AnalyzeScan {
    pub(crate) fn new(table: Table, snapshot: Snapshot) -> Self {
        Self {
            table,
            snapshot,
            block: None,
            offset: 0,
        }
    }

    /// Position on a specific block. Returns false past the last page.
    pub fn next_block(&mut self, block: u32) -> bool {
        if block >= self.table.data().heap.num_pages() {
            self.block = None;
            return false;
        }
        self.block = Some(block);
        self.offset = 0;
        true
    }

    /// Next visible tuple in the positioned block.
    pub fn next_tuple(&mut self, slot: &mut TupleSlot) -> Result<bool> {
        let Some(block) = self.block else {
            slot.clear();
            return Ok(false);
        };
        let Some(page) = self.table.data().heap.page(block) else {
            slot.clear();
            return Ok(false);
        };
        let copied = {
            let page = page.read();
            let mut found = None;
            while self.offset < page.max_offset() {
                let offset = self.offset;
                self.offset += 1;
                let Some(heap_row) = page.row(offset) else { continue };
                if !self.snapshot.is_visible(&heap_row.header, &self.table.engine().txns) {
                    continue;
                }
                found = Some((RowLocation::new(block, offset), heap_row.payload.clone()));
                break;
            }
            found
        };
        match copied {
            Some((loc, payload)) => {
                let row = Engine::decode_row(&payload)?;
                let saved = loc;
                self.table.physical_to_logical(&row, &self.snapshot, slot)?;
                slot.location = Some(saved);
                Ok(true)
            }
            None => {
                slot.clear();
                Ok(false)
            }
        }
    }
}
