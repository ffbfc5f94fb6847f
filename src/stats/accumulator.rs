//! Per-transaction statistics accumulator
//!
//! Owned by the transaction context. The insert path folds one increment
//! per row into an in-memory map; the delete path's group rescan records
//! an absolute replacement that supersedes earlier increments. `flush`
//! writes everything to the persistent store at pre-commit; dropping the
//! accumulator without flushing is the abort path, leaving the store
//! untouched.

use crate::core::hash::GroupHash;
use crate::stats::store::{GroupStatsRow, StatsStore};
use std::collections::HashMap;

#[derive(Debug)]
enum Update {
    /// Summed into the stored row at flush.
    Increment(GroupStatsRow),
    /// Replaces the stored row at flush; `None` removes it.
    Replace(Option<GroupStatsRow>),
}

/// Accumulated updates, keyed by (table, group-hash).
#[derive(Debug, Default)]
pub struct StatsAccumulator {
    entries: HashMap<(u32, GroupHash), Update>,
}

fn empty_row(table: u32, group: GroupHash) -> GroupStatsRow {
    GroupStatsRow {
        table,
        group,
        row_count: 0,
        keyframe_count: 0,
        max_seq: 0,
        raw_bytes: 0,
        compressed_bytes: 0,
        sum_avg_tag: 0.0,
    }
}

fn fold(row: &mut GroupStatsRow, is_keyframe: bool, seq: i64, raw: i64, compressed: i64, avg_tag: f64) {
    row.row_count += 1;
    row.keyframe_count += i64::from(is_keyframe);
    row.max_seq = row.max_seq.max(seq);
    row.raw_bytes += raw;
    row.compressed_bytes += compressed;
    row.sum_avg_tag += avg_tag;
}

impl StatsAccumulator {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one inserted row into the accumulator.
    pub fn record_insert(
        &mut self,
        table: u32,
        group: GroupHash,
        is_keyframe: bool,
        seq: i64,
        raw_bytes: i64,
        compressed_bytes: i64,
        avg_tag: f64,
    ) {
        let entry = self
            .entries
            .entry((table, group))
            .or_insert_with(|| Update::Increment(empty_row(table, group)));
        match entry {
            Update::Increment(row) => {
                fold(row, is_keyframe, seq, raw_bytes, compressed_bytes, avg_tag)
            }
            Update::Replace(row) => fold(
                row.get_or_insert_with(|| empty_row(table, group)),
                is_keyframe,
                seq,
                raw_bytes,
                compressed_bytes,
                avg_tag,
            ),
        }
    }

    /// Record an absolute recomputation of a group (delete-path rescan).
    /// Supersedes any increments this transaction accumulated for it.
    pub fn record_refresh(&mut self, table: u32, group: GroupHash, row: Option<GroupStatsRow>) {
        self.entries.insert((table, group), Update::Replace(row));
    }

    /// Forget pending updates for a table (truncate within this
    /// transaction: the store rows are dropped outright).
    pub fn forget_table(&mut self, table: u32) {
        self.entries.retain(|(t, _), _| *t != table);
    }

    /// Write everything into the persistent store. Called at pre-commit.
    pub fn flush(&mut self, store: &StatsStore) {
        for ((table, group), update) in self.entries.drain() {
            match update {
                Update::Increment(row) => store.upsert_merge(row),
                Update::Replace(Some(row)) => store.replace(row),
                Update::Replace(None) => store.remove_group(table, group),
            }
        }
    }

    /// Number of touched groups.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
