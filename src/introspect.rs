//! Read-only introspection operators
//!
//! The SQL-callable surface of the engine: aggregate statistics, per-row
//! delta inspection (headers only), raw delta dumps, stats rebuild and
//! the version string.

use crate::codec;
use crate::constants::KEYFRAME_TAG;
use crate::core::error::Result;
use crate::core::hash::{group_lock_id, GroupHash};
use crate::engine::{Engine, Txn};
use crate::stats::TableStats;
use crate::tam::Table;
use crate::types::value::Value;

/// Aggregate statistics of one table, combined with live cache counters.
#[derive(Debug, Clone)]
pub struct TableStatsReport {
    /// Persisted per-group aggregates
    pub totals: TableStats,
    /// Compression ratio (compressed / raw), 1.0 when empty
    pub compression_ratio: f64,
    /// Mean of per-row average delta tags
    pub avg_tag: f64,
    /// Content cache counters
    pub content_cache: crate::cache::ContentCacheStats,
    /// Sequence cache counters
    pub seq_cache: crate::cache::SeqCacheStats,
    /// FIFO insert cache counters
    pub insert_fifo: crate::cache::InsertFifoStats,
}

/// One row of `inspect`: delta header fields, no payload.
#[derive(Debug, Clone)]
pub struct InspectRow {
    /// Group hash (hex)
    pub group: String,
    /// Order-by column value
    pub version: serde_json::Value,
    /// Sequence number
    pub seq: i64,
    /// Whether the blob is a keyframe
    pub is_keyframe: bool,
    /// Delta tag
    pub tag: u16,
    /// Delta column name
    pub column: String,
    /// Encoded blob size
    pub size: usize,
}

/// One row of `physical`: header fields plus the raw blob.
#[derive(Debug, Clone)]
pub struct PhysicalDumpRow {
    /// Header fields
    pub info: InspectRow,
    /// Raw delta blob bytes
    pub bytes: Vec<u8>,
}

/// Live counters of every shared cache.
#[derive(Debug, Clone, Copy)]
pub struct EngineCacheStats {
    /// Content cache counters
    pub content: crate::cache::ContentCacheStats,
    /// Sequence cache counters
    pub seq: crate::cache::SeqCacheStats,
    /// FIFO insert cache counters
    pub insert_fifo: crate::cache::InsertFifoStats,
}

impl Engine {
    /// Snapshot the counters of all shared caches.
    pub fn cache_stats(&self) -> EngineCacheStats {
        EngineCacheStats {
            content: self.content_cache.stats(),
            seq: self.seq_caches.stats(),
            insert_fifo: self.insert_fifo.stats(),
        }
    }
}

/// Engine and codec version string.
pub fn version() -> String {
    format!("patchstore {} ({})", env!("CARGO_PKG_VERSION"), codec::version())
}

impl Table {
    /// Aggregate statistics with live cache counters folded in.
    pub fn stats(&self) -> TableStatsReport {
        let totals = self.engine().stats.table_stats(self.id());
        let compression_ratio = if totals.raw_bytes > 0 {
            totals.compressed_bytes as f64 / totals.raw_bytes as f64
        } else {
            1.0
        };
        let avg_tag = if totals.row_count > 0 {
            totals.sum_avg_tag / totals.row_count as f64
        } else {
            0.0
        };
        TableStatsReport {
            totals,
            compression_ratio,
            avg_tag,
            content_cache: self.engine().content_cache.stats(),
            seq_cache: self.engine().seq_caches.stats(),
            insert_fifo: self.engine().insert_fifo.stats(),
        }
    }

    /// Per-row delta headers, optionally restricted to one group.
    pub fn inspect(&self, txn: &Txn, group: Option<&Value>) -> Result<Vec<InspectRow>> {
        Ok(self
            .dump_rows(txn, group, None)?
            .into_iter()
            .map(|row| row.info)
            .collect())
    }

    /// Raw delta blobs, optionally restricted to one group and a
    /// starting sequence.
    pub fn physical(
        &self,
        txn: &Txn,
        group: Option<&Value>,
        from_seq: Option<i64>,
    ) -> Result<Vec<PhysicalDumpRow>> {
        self.dump_rows(txn, group, from_seq)
    }

    fn dump_rows(
        &self,
        txn: &Txn,
        group: Option<&Value>,
        from_seq: Option<i64>,
    ) -> Result<Vec<PhysicalDumpRow>> {
        let engine = self.engine();
        let data = self.data();
        let config = engine.table_config(data)?;
        let wanted = group.map(GroupHash::of);
        let snapshot = txn.snapshot().clone();

        let mut out = Vec::new();
        for block in 0..data.heap.num_pages() {
            let Some(page) = data.heap.page(block) else { continue };
            let rows: Vec<Vec<u8>> = {
                let page = page.read();
                (0..page.max_offset())
                    .filter_map(|offset| {
                        let row = page.row(offset)?;
                        snapshot
                            .is_visible(&row.header, &engine.txns)
                            .then(|| row.payload.clone())
                    })
                    .collect()
            };
            for payload in rows {
                let row = Engine::decode_row(&payload)?;
                let group_value = Engine::group_of_row(data, &config, &row)?;
                let group_hash = GroupHash::of(&group_value);
                if wanted.is_some_and(|w| w != group_hash) {
                    continue;
                }
                let seq = Engine::seq_of_row(&config, &row)?;
                if from_seq.is_some_and(|from| seq < from) {
                    continue;
                }
                let version = Engine::materialize_value(data, &row.values[config.order_by_pos])?;
                for pos in &config.delta_positions {
                    let Value::Bytes(blob) = Engine::materialize_value(data, &row.values[*pos])?
                    else {
                        continue;
                    };
                    let tag = codec::tag_of(&blob)
                        .map_err(|e| crate::core::error::Error::DataCorrupted(e.to_string()))?;
                    out.push(PhysicalDumpRow {
                        info: InspectRow {
                            group: group_hash.to_hex(),
                            version: version.to_json(),
                            seq,
                            is_keyframe: tag == KEYFRAME_TAG,
                            tag,
                            column: data.schema.column(*pos).name.clone(),
                            size: blob.len(),
                        },
                        bytes: blob,
                    });
                }
            }
        }
        out.sort_by(|a, b| (a.info.seq, &a.info.column).cmp(&(b.info.seq, &b.info.column)));
        Ok(out)
    }

    /// Rebuild the stats rows of every group in the table by rescanning.
    /// Returns (groups refreshed, rows scanned).
    pub fn refresh_stats(&self, txn: &Txn) -> Result<(u64, u64)> {
        let engine = self.engine();
        let data = self.data();
        let config = engine.table_config(data)?;
        let snapshot = txn.self_visible();

        // Collect the distinct group hashes first.
        let mut hashes: Vec<GroupHash> = Vec::new();
        for block in 0..data.heap.num_pages() {
            let Some(page) = data.heap.page(block) else { continue };
            let payloads: Vec<Vec<u8>> = {
                let page = page.read();
                (0..page.max_offset())
                    .filter_map(|offset| {
                        let row = page.row(offset)?;
                        snapshot
                            .is_visible(&row.header, &engine.txns)
                            .then(|| row.payload.clone())
                    })
                    .collect()
            };
            for payload in payloads {
                let row = Engine::decode_row(&payload)?;
                let hash = GroupHash::of(&Engine::group_of_row(data, &config, &row)?);
                if !hashes.contains(&hash) {
                    hashes.push(hash);
                }
            }
        }

        let mut rows_scanned = 0;
        for hash in &hashes {
            // Serialize against concurrent inserts into the group.
            engine.locks.acquire(group_lock_id(data.id, *hash), txn.id);
            rows_scanned += engine.refresh_group_stats(txn, data, &config, *hash, &snapshot)?;
        }
        Ok((hashes.len() as u64, rows_scanned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_names_engine_and_codec() {
        let v = version();
        assert!(v.starts_with("patchstore "));
        assert!(v.contains(codec::version()));
    }

    #[test]
    fn cache_stats_snapshot_is_consistent() {
        let engine = Engine::with_defaults();
        let stats = engine.cache_stats();
        assert_eq!(stats.content.hits, 0);
        assert_eq!(stats.insert_fifo.slots_in_use, 0);
        assert!(stats.seq.group.capacity > 0);
    }
}
