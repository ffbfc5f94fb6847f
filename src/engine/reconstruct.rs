//! Delta chain reconstruction
//!
//! Rebuilds the full content of a delta column at (group, seq) by walking
//! the chain: content cache first, then the physical row, then a
//! recursive descent to the base the blob's tag points at. Keyframes
//! terminate the recursion wherever they sit.

use crate::cache::ContentKey;
use crate::codec;
use crate::core::config::TableConfig;
use crate::core::error::{Error, Result};
use crate::core::hash::GroupHash;
use crate::engine::{Engine, TableData};
use crate::host::snapshot::Snapshot;
use crate::types::row::PhysicalRow;
use crate::types::value::Value;

impl Engine {
    /// Reconstruct one delta column of (group, seq).
    ///
    /// Returns `Ok(None)` when the row does not exist under the snapshot
    /// (a gap from a rolled-back insert) or stored NULL in that column;
    /// chain damage below an existing row is an error.
    pub fn reconstruct(
        &self,
        table: &TableData,
        config: &TableConfig,
        group_hash: GroupHash,
        seq: i64,
        delta_idx: usize,
        snapshot: &Snapshot,
    ) -> Result<Option<Vec<u8>>> {
        let key = self.content_key(table, config, group_hash, seq, delta_idx);
        if let Some(content) = self.content_cache.get(&key) {
            return Ok(Some(content));
        }

        let Some((_, row)) = self.fetch_by_seq(table, config, group_hash, seq, snapshot)? else {
            tracing::warn!(table = table.id, seq, "row not found during reconstruction (gap in chain?)");
            return Ok(None);
        };

        self.reconstruct_with_row(table, config, &row, group_hash, seq, delta_idx, snapshot)
    }

    /// Fast-path reconstruction when the caller already holds the
    /// physical row (scans and fetches); skips the row lookup.
    pub fn reconstruct_with_row(
        &self,
        table: &TableData,
        config: &TableConfig,
        row: &PhysicalRow,
        group_hash: GroupHash,
        seq: i64,
        delta_idx: usize,
        snapshot: &Snapshot,
    ) -> Result<Option<Vec<u8>>> {
        let key = self.content_key(table, config, group_hash, seq, delta_idx);
        if let Some(content) = self.content_cache.get(&key) {
            return Ok(Some(content));
        }

        let pos = config.delta_positions[delta_idx];
        let blob = match Self::materialize_value(table, &row.values[pos])? {
            Value::Null => return Ok(None),
            Value::Bytes(blob) => blob,
            other => {
                return Err(Error::DataCorrupted(format!(
                    "delta column holds {other:?} instead of an encoded blob"
                )))
            }
        };

        let content = self.decode_chain(table, config, group_hash, seq, delta_idx, &blob, snapshot)?;
        self.content_cache.put(&key, &content);
        Ok(Some(content))
    }

    /// Decode one blob, descending recursively for its base.
    fn decode_chain(
        &self,
        table: &TableData,
        config: &TableConfig,
        group_hash: GroupHash,
        seq: i64,
        delta_idx: usize,
        blob: &[u8],
        snapshot: &Snapshot,
    ) -> Result<Vec<u8>> {
        let tag = codec::tag_of(blob).map_err(|e| Error::DataCorrupted(e.to_string()))?;
        if tag == crate::constants::KEYFRAME_TAG {
            return codec::decode(&[], blob).map_err(|e| Error::DataCorrupted(e.to_string()));
        }

        let base_seq = seq - i64::from(tag);
        if base_seq < 1 {
            return Err(Error::DataCorrupted(format!(
                "delta at seq {seq} has tag {tag}, pointing before the chain start"
            )));
        }
        let base = self
            .reconstruct(table, config, group_hash, base_seq, delta_idx, snapshot)?
            .ok_or_else(|| {
                Error::DataCorrupted(format!(
                    "delta at seq {seq} references missing base at seq {base_seq}"
                ))
            })?;
        codec::decode(&base, blob).map_err(|e| Error::DataCorrupted(e.to_string()))
    }

    /// Content cache key of one (group, seq, column) triple.
    pub(crate) fn content_key(
        &self,
        table: &TableData,
        config: &TableConfig,
        group_hash: GroupHash,
        seq: i64,
        delta_idx: usize,
    ) -> ContentKey {
        ContentKey {
            table: table.id,
            group: group_hash,
            seq,
            column: config.delta_positions[delta_idx] as u16,
        }
    }
}
