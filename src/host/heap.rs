//! Heap page storage
//!
//! Pages hold line-pointered row slots: a row keeps its (block, offset)
//! address for life, vacuum frees the line pointer without renumbering
//! the survivors. Each page carries a byte budget; rows land on the last
//! page with room or open a new one. Page access goes through a per-page
//! readers-writer lock, standing in for the host's buffer locks.

use crate::core::error::{HostError, Result};
use crate::host::snapshot::RowHeader;
use crate::host::txn::TxnId;
use crate::types::row::RowLocation;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One stored row: header plus serialized physical row payload.
#[derive(Debug, Clone)]
pub struct HeapRow {
    /// Insert/delete transaction header
    pub header: RowHeader,
    /// Bincode-serialized [`crate::types::row::PhysicalRow`]
    pub payload: Vec<u8>,
}

/// One heap page.
#[derive(Debug, Default)]
pub struct Page {
    /// Line pointers; `None` is a freed slot
    pub slots: Vec<Option<HeapRow>>,
    bytes_used: usize,
}

impl Page {
    /// Highest offset on the page (exclusive).
    pub fn max_offset(&self) -> u16 {
        self.slots.len() as u16
    }

    /// Row at an offset, if the line pointer is live.
    pub fn row(&self, offset: u16) -> Option<&HeapRow> {
        self.slots.get(offset as usize).and_then(|s| s.as_ref())
    }
}

/// Append-only heap of pages for one table.
pub struct Heap {
    pages: RwLock<Vec<Arc<RwLock<Page>>>>,
    page_budget: usize,
    live_rows: AtomicU64,
}

impl Heap {
    /// Heap with the given per-page byte budget.
    pub fn new(page_budget: usize) -> Self {
        Self {
            pages: RwLock::new(Vec::new()),
            page_budget,
            live_rows: AtomicU64::new(0),
        }
    }

    /// Number of pages.
    pub fn num_pages(&self) -> u32 {
        self.pages.read().len() as u32
    }

    /// Live (non-freed) row count, dead-but-unvacuumed included.
    pub fn live_rows(&self) -> u64 {
        self.live_rows.load(Ordering::Relaxed)
    }

    /// Page handle by block number.
    pub fn page(&self, block: u32) -> Option<Arc<RwLock<Page>>> {
        self.pages.read().get(block as usize).cloned()
    }

    /// Append a row, returning its location.
    pub fn insert(&self, header: RowHeader, payload: Vec<u8>) -> RowLocation {
        let size = payload.len();
        let mut pages = self.pages.write();
        let need_new = match pages.last() {
            Some(last) => {
                let page = last.read();
                !page.slots.is_empty() && page.bytes_used + size > self.page_budget
            }
            None => true,
        };
        if need_new {
            pages.push(Arc::new(RwLock::new(Page::default())));
        }
        let block = (pages.len() - 1) as u32;
        let page_arc = Arc::clone(pages.last().expect("page just ensured"));
        drop(pages);

        let mut page = page_arc.write();
        let offset = page.slots.len() as u16;
        page.bytes_used += size;
        page.slots.push(Some(HeapRow { header, payload }));
        self.live_rows.fetch_add(1, Ordering::Relaxed);
        RowLocation::new(block, offset)
    }

    /// Place a row at an exact location, growing pages as needed.
    /// Used by WAL replay only.
    pub fn restore_at(&self, loc: RowLocation, header: RowHeader, payload: Vec<u8>) {
        let mut pages = self.pages.write();
        while pages.len() <= loc.block as usize {
            pages.push(Arc::new(RwLock::new(Page::default())));
        }
        let page_arc = Arc::clone(&pages[loc.block as usize]);
        drop(pages);

        let mut page = page_arc.write();
        while page.slots.len() <= loc.offset as usize {
            page.slots.push(None);
        }
        page.bytes_used += payload.len();
        page.slots[loc.offset as usize] = Some(HeapRow { header, payload });
        self.live_rows.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a row copy.
    pub fn read(&self, loc: RowLocation) -> Option<HeapRow> {
        let page = self.page(loc.block)?;
        let page = page.read();
        page.row(loc.offset).cloned()
    }

    /// Mark a row deleted by setting its deleting transaction.
    pub fn mark_deleted(&self, loc: RowLocation, xmax: TxnId) -> Result<()> {
        let page = self.page(loc.block).ok_or(HostError::InvalidLocation {
            block: loc.block,
            offset: loc.offset,
        })?;
        let mut page = page.write();
        let row = page
            .slots
            .get_mut(loc.offset as usize)
            .and_then(|s| s.as_mut())
            .ok_or(HostError::InvalidLocation {
                block: loc.block,
                offset: loc.offset,
            })?;
        row.header.xmax = Some(xmax);
        Ok(())
    }

    /// Free a line pointer and reclaim its bytes. Offsets of surviving
    /// rows are untouched.
    pub fn free_slot(&self, loc: RowLocation) {
        if let Some(page) = self.page(loc.block) {
            let mut page = page.write();
            let taken = page.slots.get_mut(loc.offset as usize).and_then(|s| s.take());
            if let Some(row) = taken {
                page.bytes_used -= row.payload.len();
                self.live_rows.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Drop every page.
    pub fn truncate(&self) {
        self.pages.write().clear();
        self.live_rows.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(xmin: TxnId) -> RowHeader {
        RowHeader { xmin, xmax: None }
    }

    #[test]
    fn insert_and_read_back() {
        let heap = Heap::new(128);
        let loc = heap.insert(header(1), vec![1, 2, 3]);
        assert_eq!(loc, RowLocation::new(0, 0));
        let row = heap.read(loc).unwrap();
        assert_eq!(row.payload, vec![1, 2, 3]);
        assert_eq!(row.header.xmin, 1);
    }

    #[test]
    fn page_budget_spills_to_new_pages() {
        let heap = Heap::new(100);
        for _ in 0..10 {
            heap.insert(header(1), vec![0; 40]);
        }
        assert!(heap.num_pages() > 1);
        assert_eq!(heap.live_rows(), 10);
    }

    #[test]
    fn oversized_row_gets_its_own_page() {
        let heap = Heap::new(100);
        heap.insert(header(1), vec![0; 10]);
        let loc = heap.insert(header(1), vec![0; 500]);
        assert!(heap.read(loc).is_some());
    }

    #[test]
    fn free_slot_keeps_offsets_stable() {
        let heap = Heap::new(1024);
        let a = heap.insert(header(1), vec![1]);
        let b = heap.insert(header(1), vec![2]);
        heap.free_slot(a);
        assert!(heap.read(a).is_none());
        assert_eq!(heap.read(b).unwrap().payload, vec![2]);
        assert_eq!(heap.live_rows(), 1);
    }

    #[test]
    fn mark_deleted_sets_xmax() {
        let heap = Heap::new(1024);
        let loc = heap.insert(header(1), vec![9]);
        heap.mark_deleted(loc, 2).unwrap();
        assert_eq!(heap.read(loc).unwrap().header.xmax, Some(2));
    }

    #[test]
    fn restore_at_rebuilds_exact_layout() {
        let heap = Heap::new(1024);
        heap.restore_at(RowLocation::new(2, 3), header(5), vec![7]);
        assert_eq!(heap.num_pages(), 3);
        assert_eq!(heap.read(RowLocation::new(2, 3)).unwrap().payload, vec![7]);
        assert!(heap.read(RowLocation::new(2, 1)).is_none());
    }
}
