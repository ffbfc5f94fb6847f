//! Persistent per-group statistics store
//!
//! Plays the role of the stats catalog table: one row per (table,
//! group-hash) with primary key semantics and an upsert that sums the
//! incremental fields and max-merges the sequence high-water mark.

use crate::core::hash::GroupHash;
use dashmap::DashMap;

/// Persisted statistics of one group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupStatsRow {
    /// Table id
    pub table: u32,
    /// Group hash
    pub group: GroupHash,
    /// Visible rows in the group
    pub row_count: i64,
    /// Keyframes among them
    pub keyframe_count: i64,
    /// Highest sequence number
    pub max_seq: i64,
    /// Sum of raw (pre-encoding) delta column bytes
    pub raw_bytes: i64,
    /// Sum of encoded delta column bytes
    pub compressed_bytes: i64,
    /// Sum of per-row average delta tags
    pub sum_avg_tag: f64,
}

/// Aggregated statistics of one table.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TableStats {
    /// Groups with at least one row
    pub group_count: i64,
    /// Total visible rows
    pub row_count: i64,
    /// Total keyframes
    pub keyframe_count: i64,
    /// Highest sequence across groups
    pub max_seq: i64,
    /// Total raw bytes
    pub raw_bytes: i64,
    /// Total encoded bytes
    pub compressed_bytes: i64,
    /// Sum of per-row average tags
    pub sum_avg_tag: f64,
}

/// The stats table.
#[derive(Default)]
pub struct StatsStore {
    rows: DashMap<(u32, GroupHash), GroupStatsRow>,
}

impl StatsStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert one increment: sums counters, max-merges `max_seq`.
    pub fn upsert_merge(&self, delta: GroupStatsRow) {
        self.rows
            .entry((delta.table, delta.group))
            .and_modify(|row| {
                row.row_count += delta.row_count;
                row.keyframe_count += delta.keyframe_count;
                row.max_seq = row.max_seq.max(delta.max_seq);
                row.raw_bytes += delta.raw_bytes;
                row.compressed_bytes += delta.compressed_bytes;
                row.sum_avg_tag += delta.sum_avg_tag;
            })
            .or_insert(delta);
    }

    /// Replace a group's row outright (delete-path refresh).
    pub fn replace(&self, row: GroupStatsRow) {
        self.rows.insert((row.table, row.group), row);
    }

    /// Drop a group's row (group became empty).
    pub fn remove_group(&self, table: u32, group: GroupHash) {
        self.rows.remove(&(table, group));
    }

    /// Drop every row of a table (truncate, drop).
    pub fn remove_table(&self, table: u32) {
        self.rows.retain(|(t, _), _| *t != table);
    }

    /// One group's row.
    pub fn group(&self, table: u32, group: GroupHash) -> Option<GroupStatsRow> {
        self.rows.get(&(table, group)).map(|r| *r.value())
    }

    /// All rows of a table.
    pub fn groups_of(&self, table: u32) -> Vec<GroupStatsRow> {
        self.rows
            .iter()
            .filter(|e| e.key().0 == table)
            .map(|e| *e.value())
            .collect()
    }

    /// Aggregate a table's rows.
    pub fn table_stats(&self, table: u32) -> TableStats {
        let mut out = TableStats::default();
        for row in self.groups_of(table) {
            out.group_count += 1;
            out.row_count += row.row_count;
            out.keyframe_count += row.keyframe_count;
            out.max_seq = out.max_seq.max(row.max_seq);
            out.raw_bytes += row.raw_bytes;
            out.compressed_bytes += row.compressed_bytes;
            out.sum_avg_tag += row.sum_avg_tag;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(table: u32, h: u64, seq: i64, keyframe: bool) -> GroupStatsRow {
        GroupStatsRow {
            table,
            group: GroupHash { h1: h, h2: 0 },
            row_count: 1,
            keyframe_count: i64::from(keyframe),
            max_seq: seq,
            raw_bytes: 100,
            compressed_bytes: 40,
            sum_avg_tag: if keyframe { 0.0 } else { 1.0 },
        }
    }

    #[test]
    fn upsert_sums_and_max_merges() {
        let store = StatsStore::new();
        store.upsert_merge(delta(1, 7, 1, true));
        store.upsert_merge(delta(1, 7, 2, false));
        let row = store.group(1, GroupHash { h1: 7, h2: 0 }).unwrap();
        assert_eq!(row.row_count, 2);
        assert_eq!(row.keyframe_count, 1);
        assert_eq!(row.max_seq, 2);
        assert_eq!(row.raw_bytes, 200);
    }

    #[test]
    fn table_stats_aggregate_groups() {
        let store = StatsStore::new();
        store.upsert_merge(delta(1, 1, 5, true));
        store.upsert_merge(delta(1, 2, 3, true));
        store.upsert_merge(delta(2, 1, 9, true));
        let stats = store.table_stats(1);
        assert_eq!(stats.group_count, 2);
        assert_eq!(stats.row_count, 2);
        assert_eq!(stats.max_seq, 5);
    }

    #[test]
    fn remove_table_is_selective() {
        let store = StatsStore::new();
        store.upsert_merge(delta(1, 1, 1, true));
        store.upsert_merge(delta(2, 1, 1, true));
        store.remove_table(1);
        assert_eq!(store.table_stats(1).group_count, 0);
        assert_eq!(store.table_stats(2).group_count, 1);
    }
}
