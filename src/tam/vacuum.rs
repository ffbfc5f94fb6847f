//! Dead row reclamation
//!
//! A row is dead once its deleting transaction committed and no active
//! transaction could still see it (the oldest-active horizon). Vacuum
//! frees the line pointer, releases any TOAST references the row held,
//! and invalidates the table's caches when anything was removed. The
//! heap's live-row and page counters feed the planner estimate.

use crate::core::error::Result;
use crate::engine::Engine;
use crate::host::txn::TxnStatus;
use crate::tam::Table;
use crate::types::row::{PhysicalValue, RowLocation};

/// Result of one vacuum pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VacuumStats {
    /// Line pointers freed
    pub removed: u64,
    /// Rows remaining (dead-but-not-yet-reclaimable included)
    pub remaining: u64,
    /// Pages in the table
    pub pages: u32,
}

pub(crate) fn vacuum(table: &Table) -> Result<VacuumStats> {
    let engine = table.engine();
    let heap = &table.data().heap;
    let horizon = engine.txns.oldest_active();

    let mut stats = VacuumStats {
        pages: heap.num_pages(),
        ..VacuumStats::default()
    };

    for block in 0..heap.num_pages() {
        let Some(page) = heap.page(block) else { continue };
        // Collect victims under the read lock, free them after.
        let victims: Vec<(RowLocation, Vec<u8>)> = {
            let page = page.read();
            (0..page.max_offset())
                .filter_map(|offset| {
                    let row = page.row(offset)?;
                    let xmax = row.header.xmax?;
                    let committed = engine.txns.status(xmax) == TxnStatus::Committed;
                    let beyond_horizon = horizon.is_none_or(|oldest| xmax < oldest);
                    (committed && beyond_horizon)
                        .then(|| (RowLocation::new(block, offset), row.payload.clone()))
                })
                .collect()
        };
        for (loc, payload) in victims {
            // Release TOAST references before dropping the row.
            if let Ok(row) = Engine::decode_row(&payload) {
                for value in &row.values {
                    if let PhysicalValue::External { toast_id, .. } = value {
                        table.data().toast.remove(*toast_id);
                    }
                }
            }
            heap.free_slot(loc);
            stats.removed += 1;
        }
    }

    stats.remaining = heap.live_rows();

    if stats.removed > 0 {
        tracing::debug!(
            table = table.id(),
            removed = stats.removed,
            "vacuum reclaimed dead rows"
        );
        engine.invalidate_table_caches(table.id());
    }
    Ok(stats)
}
