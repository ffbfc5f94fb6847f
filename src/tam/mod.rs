//! Table access layer
//!
//! The operation surface the host executor drives: scans, fetches,
//! inserts, deletes, vacuum, analyze, index builds and truncation. An
//! append-only store: updates and speculative inserts are rejected.

/// Row fetches and index fetches
pub mod fetch;
/// Sequential, bitmap and analyze scans
pub mod scan;
/// Dead row reclamation
pub mod vacuum;

#[cfg(test)]
mod tests;

use crate::core::config::TableOptions;
use crate::core::error::{Error, Result};
use crate::core::hash::GroupHash;
use crate::engine::delete::DeleteOutcome;
use crate::engine::{Engine, TableData, Txn};
use crate::host::snapshot::Snapshot;
use crate::host::wal::WalRecord;
use crate::types::row::{PhysicalRow, RowLocation, TupleSlot};
use crate::types::schema::Schema;
use crate::types::value::Value;
use std::sync::Arc;

pub use fetch::IndexFetch;
pub use scan::{AnalyzeScan, BitmapScan, TableScan};
pub use vacuum::VacuumStats;

/// Row lock strength requested by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared lock
    Share,
    /// Key-share lock
    KeyShare,
    /// Update-intent lock
    Update,
    /// No-key-update-intent lock
    NoKeyUpdate,
}

/// Size estimate handed to the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationSizeEstimate {
    /// On-disk pages
    pub pages: u32,
    /// Estimated live tuples
    pub tuples: u64,
}

/// Handle to one table, shared by reference across backends.
#[derive(Clone)]
pub struct Table {
    engine: Arc<Engine>,
    data: Arc<TableData>,
}

impl Table {
    /// Create a table on the engine.
    pub fn create(
        engine: &Arc<Engine>,
        name: impl Into<String>,
        schema: Schema,
        options: Option<TableOptions>,
    ) -> Result<Table> {
        let data = engine.create_table(name, schema, options)?;
        Ok(Table {
            engine: Arc::clone(engine),
            data,
        })
    }

    /// Open an existing table by id.
    pub fn open(engine: &Arc<Engine>, id: u32) -> Result<Table> {
        let data = engine.table(id)?;
        Ok(Table {
            engine: Arc::clone(engine),
            data,
        })
    }

    /// Table id.
    pub fn id(&self) -> u32 {
        self.data.id
    }

    /// Table schema.
    pub fn schema(&self) -> &Schema {
        &self.data.schema
    }

    /// The engine this table lives on.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Underlying storage (scans, introspection).
    pub(crate) fn data(&self) -> &Arc<TableData> {
        &self.data
    }

    // ---- modification ------------------------------------------------

    /// Insert one logical row (§ insert path).
    pub fn insert(&self, txn: &Txn, values: Vec<Value>) -> Result<RowLocation> {
        self.engine.insert_row(txn, &self.data, values)
    }

    /// Insert many rows through the same path.
    pub fn multi_insert(&self, txn: &Txn, rows: Vec<Vec<Value>>) -> Result<Vec<RowLocation>> {
        rows.into_iter().map(|row| self.insert(txn, row)).collect()
    }

    /// Speculative insertion (ON CONFLICT) is not supported.
    pub fn insert_speculative(&self, _txn: &Txn, _values: Vec<Value>) -> Result<RowLocation> {
        Err(Error::Unsupported(
            "speculative insertion into a delta-compressed table".into(),
        ))
    }

    /// In-place UPDATE is not supported: the store is append-only.
    pub fn update(&self, _txn: &Txn, _loc: RowLocation, _values: Vec<Value>) -> Result<RowLocation> {
        Err(Error::Unsupported(
            "UPDATE on a delta-compressed table; insert a new version instead".into(),
        ))
    }

    /// Delete a row, cascading to every higher sequence in its group.
    pub fn delete(&self, txn: &Txn, loc: RowLocation) -> Result<DeleteOutcome> {
        self.engine.delete_row(txn, &self.data, loc)
    }

    /// Row-level locking: share strengths delegate to a plain visibility
    /// check, update-intent strengths are rejected.
    pub fn lock_row(&self, txn: &Txn, loc: RowLocation, mode: LockMode) -> Result<()> {
        match mode {
            LockMode::Update | LockMode::NoKeyUpdate => Err(Error::Unsupported(
                "update-intent row locks on an append-only table".into(),
            )),
            LockMode::Share | LockMode::KeyShare => {
                let Some(row) = self.data.heap.read(loc) else {
                    return Err(crate::core::error::HostError::InvalidLocation {
                        block: loc.block,
                        offset: loc.offset,
                    }
                    .into());
                };
                if txn.snapshot().is_visible(&row.header, &self.engine.txns) {
                    Ok(())
                } else {
                    Err(Error::Internal("row to lock is not visible".into()))
                }
            }
        }
    }

    // ---- reads -------------------------------------------------------

    /// Begin a forward sequential scan under the transaction's snapshot.
    pub fn scan(&self, txn: &Txn) -> TableScan {
        TableScan::new(self.clone(), txn.snapshot().clone())
    }

    /// Begin a scan under an explicit snapshot (stats refresh, inspection).
    pub fn scan_with_snapshot(&self, snapshot: Snapshot) -> TableScan {
        TableScan::new(self.clone(), snapshot)
    }

    /// Fetch the row version at a location into the slot.
    pub fn fetch_row_version(&self, txn: &Txn, loc: RowLocation, slot: &mut TupleSlot) -> Result<bool> {
        fetch::fetch_row_version(self, txn.snapshot(), loc, slot)
    }

    /// Begin index fetches (with the pinned-page optimization).
    pub fn begin_index_fetch(&self, txn: &Txn) -> IndexFetch {
        IndexFetch::new(self.clone(), txn.snapshot().clone())
    }

    /// Begin a bitmap scan over a set of candidate locations.
    pub fn bitmap_scan(&self, txn: &Txn, locations: Vec<RowLocation>) -> BitmapScan {
        BitmapScan::new(self.clone(), txn.snapshot().clone(), locations)
    }

    /// Begin an analyze sampling scan: samples see reconstructed values.
    pub fn analyze_scan(&self, txn: &Txn) -> AnalyzeScan {
        AnalyzeScan::new(self.clone(), txn.snapshot().clone())
    }

    /// Scan visible rows and feed reconstructed values to an index
    /// builder callback. Returns the number of rows fed.
    pub fn index_build_range_scan(
        &self,
        txn: &Txn,
        mut callback: impl FnMut(&TupleSlot, RowLocation),
    ) -> Result<u64> {
        let mut scan = self.scan(txn);
        let mut slot = TupleSlot::default();
        let mut count = 0;
        while scan.next(&mut slot)? {
            let loc = slot
                .location
                .ok_or_else(|| Error::Internal("scan produced a slot without a location".into()))?;
            callback(&slot, loc);
            count += 1;
        }
        Ok(count)
    }

    /// Planner size estimate from page count and live tuple density.
    pub fn estimate_size(&self) -> RelationSizeEstimate {
        RelationSizeEstimate {
            pages: self.data.heap.num_pages(),
            tuples: self.data.heap.live_rows(),
        }
    }

    /// Reclaim dead rows and compact pages.
    pub fn vacuum(&self) -> Result<VacuumStats> {
        vacuum::vacuum(self)
    }

    /// Drop all rows and every cache entry for the table.
    pub fn truncate(&self, txn: &Txn) -> Result<()> {
        self.data.heap.truncate();
        self.data.toast.clear();
        self.engine.wal.append(WalRecord::Truncate { table: self.data.id });
        self.engine.invalidate_table_caches(self.data.id);
        self.engine.stats.remove_table(self.data.id);
        txn.with_stats(|stats| stats.forget_table(self.data.id));
        Ok(())
    }

    /// The table was pointed at a new physical file: same cache
    /// consequences as truncation.
    pub fn set_new_file(&self, txn: &Txn) -> Result<()> {
        self.truncate(txn)
    }

    // ---- reconstruction into slots -----------------------------------

    /// Convert a physical row to logical form in the slot.
    ///
    /// Clears the slot first, which drops any location it carried; a
    /// caller that needs the physical address must save it before this
    /// call and write it back afterwards.
    pub(crate) fn physical_to_logical(
        &self,
        row: &PhysicalRow,
        snapshot: &Snapshot,
        slot: &mut TupleSlot,
    ) -> Result<()> {
        slot.clear();
        let config = self.engine.table_config(&self.data)?;
        let group_value = Engine::group_of_row(&self.data, &config, row)?;
        let group_hash = GroupHash::of(&group_value);
        let seq = Engine::seq_of_row(&config, row)?;

        let mut values = Vec::with_capacity(row.values.len());
        for (pos, stored) in row.values.iter().enumerate() {
            if let Some(delta_idx) = config.delta_positions.iter().position(|p| *p == pos) {
                let reconstructed = self.engine.reconstruct_with_row(
                    &self.data, &config, row, group_hash, seq, delta_idx, snapshot,
                )?;
                match reconstructed {
                    Some(bytes) => values.push(Value::from_canonical_bytes(
                        self.data.schema.column(pos).ty,
                        &bytes,
                    )?),
                    None => values.push(Value::Null),
                }
            } else {
                values.push(Engine::materialize_value(&self.data, stored)?);
            }
        }
        slot.values = values;
        Ok(())
    }
}
