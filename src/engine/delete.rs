//! Cascade delete
//!
//! Deleting sequence s in a group also deletes every row with a higher
//! sequence: later rows may chain through s, and a surviving delta whose
//! base vanished would reconstruct garbage. The cascade runs under the
//! group's advisory lock, marks rows with the deleting transaction (WAL
//! paired), invalidates every cache for the table, resets the group's
//! cached max sequence and recomputes the group's stats by a bounded
//! rescan that observes the deletes.

use crate::codec;
use crate::core::config::TableConfig;
use crate::core::error::Result;
use crate::core::hash::{group_lock_id, GroupHash};
use crate::engine::{Engine, TableData, Txn};
use crate::host::txn::TxnStatus;
use crate::host::wal::WalRecord;
use crate::stats::GroupStatsRow;
use crate::system::metrics::Metrics;
use crate::types::row::RowLocation;
use crate::types::value::Value;

/// Outcome of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Target and cascade marked deleted; carries the number of rows
    Deleted(u64),
    /// Target was already deleted by this transaction
    SelfModified,
    /// Target was already deleted by a committed transaction
    AlreadyDeleted,
    /// No live row at the location
    NotFound,
}

impl Engine {
    /// Delete the row at `loc` and cascade to every higher sequence in
    /// its group.
    pub fn delete_row(&self, txn: &Txn, table: &TableData, loc: RowLocation) -> Result<DeleteOutcome> {
        let config = self.table_config(table)?;

        let Some(target) = table.heap.read(loc) else {
            return Ok(DeleteOutcome::NotFound);
        };
        if let Some(xmax) = target.header.xmax {
            if xmax == txn.id {
                return Ok(DeleteOutcome::SelfModified);
            }
            if self.txns.status(xmax) == TxnStatus::Committed {
                return Ok(DeleteOutcome::AlreadyDeleted);
            }
            // An in-progress deleter may still abort; proceed and let the
            // advisory lock serialize against its group operations.
        }

        let target_row = Self::decode_row(&target.payload)?;
        let group_value = Self::group_of_row(table, &config, &target_row)?;
        let group_hash = GroupHash::of(&group_value);

        self.locks.acquire(group_lock_id(table.id, group_hash), txn.id);
        let snapshot = txn.self_visible();

        // Derive the target's sequence: reverse lookup first, the row's
        // own sequence column as the authoritative fallback.
        let target_seq = match self.seq_caches.get_tid_seq(table.id, loc) {
            Some(seq) => seq,
            None => Self::seq_of_row(&config, &target_row)?,
        };

        tracing::debug!(
            table = table.id,
            target_seq,
            "cascade delete of sequence {target_seq} and above"
        );

        // Mark every visible row at target_seq and above, WAL paired.
        let mut deleted = 0u64;
        let mut victims = Vec::new();
        self.scan_group(table, &config, group_hash, &snapshot, |row_loc, row| {
            if Self::seq_of_row(&config, row)? >= target_seq {
                victims.push(row_loc);
            }
            Ok(true)
        })?;
        for victim in victims {
            table.heap.mark_deleted(victim, txn.id)?;
            self.wal.append(WalRecord::Delete {
                table: table.id,
                loc: victim,
                xmax: txn.id,
            });
            deleted += 1;
        }

        if deleted == 0 {
            return Ok(DeleteOutcome::NotFound);
        }

        // Dependent cache state is gone wholesale; readers fall back to
        // reconstruction against the surviving chain.
        self.invalidate_table_caches(table.id);

        self.seq_caches
            .set_max_seq(table.id, group_hash, (target_seq - 1).max(0));

        self.refresh_group_stats(txn, table, &config, group_hash, &snapshot)?;

        Metrics::global().deletes.inc();
        Metrics::global().cascade_deleted_rows.inc_by(deleted);
        Ok(DeleteOutcome::Deleted(deleted))
    }

    /// Recompute one group's stats row by rescanning its visible rows
    /// under a snapshot that observes this transaction's deletes.
    ///
    /// Deltas are decoded to recover raw sizes; the group's pending
    /// accumulator entries are superseded by the recomputed row.
    pub fn refresh_group_stats(
        &self,
        txn: &Txn,
        table: &TableData,
        config: &TableConfig,
        group_hash: GroupHash,
        snapshot: &crate::host::snapshot::Snapshot,
    ) -> Result<u64> {
        let mut row_count = 0i64;
        let mut keyframe_count = 0i64;
        let mut max_seq = 0i64;
        let mut raw_bytes = 0i64;
        let mut compressed_bytes = 0i64;
        let mut sum_avg_tag = 0.0f64;
        let mut scanned = 0u64;

        let mut rows = Vec::new();
        self.scan_group(table, config, group_hash, snapshot, |_, row| {
            rows.push(row.clone());
            Ok(true)
        })?;

        for row in &rows {
            scanned += 1;
            let seq = Self::seq_of_row(config, row)?;
            row_count += 1;
            max_seq = max_seq.max(seq);

            let mut tag_sum = 0u64;
            let mut encoded_cols = 0u64;
            let mut row_is_keyframe = false;
            for (delta_idx, pos) in config.delta_positions.iter().enumerate() {
                let blob = match Self::materialize_value(table, &row.values[*pos])? {
                    Value::Bytes(blob) => blob,
                    _ => continue,
                };
                compressed_bytes += blob.len() as i64;
                if let Ok(tag) = codec::tag_of(&blob) {
                    if tag == crate::constants::KEYFRAME_TAG {
                        row_is_keyframe = true;
                    } else {
                        tag_sum += u64::from(tag);
                    }
                    encoded_cols += 1;
                }
                if let Some(content) =
                    self.reconstruct_with_row(table, config, row, group_hash, seq, delta_idx, snapshot)?
                {
                    raw_bytes += content.len() as i64;
                }
            }
            keyframe_count += i64::from(row_is_keyframe);
            if encoded_cols > 0 {
                sum_avg_tag += tag_sum as f64 / encoded_cols as f64;
            }
        }

        // The recomputed row supersedes whatever this transaction had
        // accumulated for the group and lands in the store at commit.
        let refreshed = (row_count > 0).then_some(GroupStatsRow {
            table: table.id,
            group: group_hash,
            row_count,
            keyframe_count,
            max_seq,
            raw_bytes,
            compressed_bytes,
            sum_avg_tag,
        });
        txn.with_stats(|stats| stats.record_refresh(table.id, group_hash, refreshed));
        Ok(scanned)
    }
}
