//! Insert encoding path
//!
//! Turns a logical row into a delta-compressed physical row and lands it
//! on a heap page: per-group advisory locking, sequence allocation with
//! rollback on failure, keyframe policy, FIFO-fed parallel candidate
//! encoding with smallest-wins selection, reconstruction and keyframe
//! fallbacks, TOAST hand-off, WAL emission and stats accumulation.

use crate::codec;
use crate::constants::{KEYFRAME_TAG, TOAST_THRESHOLD};
use crate::core::config::TableConfig;
use crate::core::error::{Error, HostError, Result};
use crate::core::hash::{group_lock_id, GroupHash};
use crate::encode::EncodeTask;
use crate::engine::{Engine, TableData, Txn};
use crate::host::snapshot::{RowHeader, Snapshot};
use crate::host::wal::WalRecord;
use crate::system::metrics::Metrics;
use crate::types::row::{PhysicalRow, PhysicalValue, RowLocation};
use crate::types::value::Value;
use bytes::Bytes;
use std::cmp::Ordering;

/// Result of encoding one delta column.
struct EncodedColumn {
    blob: Vec<u8>,
    tag: u16,
    raw_len: usize,
}

impl Engine {
    /// Insert one logical row. See module docs for the full path.
    ///
    /// The sequence column value selects the mode: NULL auto-allocates,
    /// a positive integer is restore mode (explicit sequence, used by
    /// bulk restoration).
    pub fn insert_row(&self, txn: &Txn, table: &TableData, values: Vec<Value>) -> Result<RowLocation> {
        let config = self.table_config(table)?;
        if values.len() != table.schema.len() {
            return Err(Error::InvalidConfig(format!(
                "row has {} values but the table has {} columns",
                values.len(),
                table.schema.len()
            )));
        }

        let group_value = match config.group_by_pos {
            Some(pos) => values[pos].clone(),
            None => Value::Null,
        };
        let group_hash = GroupHash::of(&group_value);

        // Serialize all inserts and deletes within this group for the
        // rest of the transaction.
        self.locks.acquire(group_lock_id(table.id, group_hash), txn.id);
        let snapshot = txn.self_visible();

        let user_seq = match &values[config.seq_pos] {
            Value::Int(seq) if *seq > 0 => Some(*seq),
            Value::Null | Value::Int(_) => None,
            other => {
                return Err(Error::InvalidConfig(format!(
                    "sequence column must be NULL or an integer, got {other:?}"
                )))
            }
        };

        let (new_seq, restore_mode) = match user_seq {
            Some(seq) => {
                tracing::debug!(table = table.id, seq, "restore mode insert with explicit sequence");
                let cached = self.seq_caches.get_max_seq(table.id, group_hash);
                if cached.is_none_or(|max| seq > max) {
                    self.seq_caches.set_max_seq(table.id, group_hash, seq);
                }
                (seq, true)
            }
            None => (self.allocate_seq(table, &config, group_hash, &snapshot)?, false),
        };

        let result = self.insert_allocated(
            txn,
            table,
            &config,
            values,
            group_hash,
            new_seq,
            restore_mode,
            &snapshot,
        );

        if result.is_err() && !restore_mode {
            // Keep the group gap-free for subsequent inserts. The guard
            // inside rollback_seq refuses to clobber an allocation a
            // concurrent insert raced ahead with.
            tracing::debug!(table = table.id, seq = new_seq, "insert failed, rolling back sequence");
            self.seq_caches.rollback_seq(table.id, group_hash, new_seq);
        }
        result
    }

    /// Allocate the next sequence through the cache, falling back to a
    /// table scan on the cold sentinel.
    fn allocate_seq(
        &self,
        table: &TableData,
        config: &TableConfig,
        group_hash: GroupHash,
        snapshot: &Snapshot,
    ) -> Result<i64> {
        let seq = self.seq_caches.next_seq(table.id, group_hash);
        if seq != 0 {
            return Ok(seq);
        }
        let max = self
            .scan_group_max_seq(table, config, group_hash, snapshot)
            .map_err(|e| Error::SequenceAllocFailed(e.to_string()))?;
        let seq = max + 1;
        self.seq_caches.set_max_seq(table.id, group_hash, seq);
        Ok(seq)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_allocated(
        &self,
        txn: &Txn,
        table: &TableData,
        config: &TableConfig,
        values: Vec<Value>,
        group_hash: GroupHash,
        new_seq: i64,
        restore_mode: bool,
        snapshot: &Snapshot,
    ) -> Result<RowLocation> {
        if !restore_mode && new_seq > 1 {
            self.check_version_increases(table, config, group_hash, new_seq, &values, snapshot)?;
        }

        let is_keyframe = config.is_keyframe(new_seq);
        let depth = usize::from(config.options.compress_depth);

        // FIFO slot for this group. A fresh slot before a delta row is
        // populated by reconstructing the chain tail so the encoder has
        // its candidate bases materialized.
        let fifo_slot = if !restore_mode && !config.delta_positions.is_empty() {
            let (slot, is_new) =
                self.insert_fifo
                    .acquire(table.id, group_hash, depth, config.delta_positions.len());
            if is_new && new_seq > 1 && !is_keyframe {
                self.populate_fifo(table, config, group_hash, slot, new_seq, depth, snapshot);
            }
            Some(slot)
        } else {
            None
        };

        let mut physical = Vec::with_capacity(values.len());
        let mut raw_total = 0i64;
        let mut compressed_total = 0i64;
        let mut tag_sum = 0u64;
        let mut encoded_cols = 0u64;

        for (pos, value) in values.iter().enumerate() {
            if pos == config.seq_pos {
                physical.push(PhysicalValue::Inline(Value::Int(new_seq)));
                continue;
            }
            let Some(delta_idx) = config.delta_positions.iter().position(|p| *p == pos) else {
                physical.push(self.maybe_toast(table, value)?);
                continue;
            };
            if value.is_null() {
                physical.push(PhysicalValue::Inline(Value::Null));
                continue;
            }

            let raw = value
                .canonical_bytes()
                .ok_or_else(|| Error::Internal("non-null value without canonical bytes".into()))?;
            let encoded = self.encode_delta_column(
                table, config, group_hash, new_seq, delta_idx, &raw, is_keyframe, fifo_slot, snapshot,
            )?;

            tracing::debug!(
                table = table.id,
                seq = new_seq,
                delta_idx,
                tag = encoded.tag,
                raw = encoded.raw_len,
                compressed = encoded.blob.len(),
                "encoded delta column"
            );

            raw_total += encoded.raw_len as i64;
            compressed_total += encoded.blob.len() as i64;
            if encoded.tag != KEYFRAME_TAG {
                tag_sum += u64::from(encoded.tag);
            }
            encoded_cols += 1;

            // Cache the pre-encoding content and feed the FIFO so the next
            // insert encodes against materialized bases.
            let key = self.content_key(table, config, group_hash, new_seq, delta_idx);
            self.content_cache.put(&key, &raw);
            if let Some(slot) = fifo_slot {
                self.insert_fifo
                    .push(slot, table.id, group_hash, new_seq, delta_idx, &raw);
            }

            physical.push(self.maybe_toast(table, &Value::Bytes(encoded.blob))?);
        }

        if let Some(slot) = fifo_slot {
            self.insert_fifo.commit_entry(slot, table.id, group_hash, new_seq);
        }

        let row = PhysicalRow { values: physical };
        let payload = Self::encode_row(&row)?;
        let header = RowHeader {
            xmin: txn.id,
            xmax: None,
        };
        // Page write and WAL record are paired: recovery replays the
        // insert in the host's standard record format.
        let loc = table.heap.insert(header, payload.clone());
        self.wal.append(WalRecord::Insert {
            table: table.id,
            loc,
            xmin: txn.id,
            payload,
        });

        self.seq_caches.set_tid_seq(table.id, loc, new_seq);
        self.seq_caches.set_seq_tid(table.id, group_hash, new_seq, loc);

        let avg_tag = if encoded_cols > 0 {
            tag_sum as f64 / encoded_cols as f64
        } else {
            0.0
        };
        txn.with_stats(|stats| {
            stats.record_insert(
                table.id,
                group_hash,
                is_keyframe,
                new_seq,
                raw_total,
                compressed_total,
                avg_tag,
            );
        });

        Metrics::global().inserts.inc();
        if is_keyframe {
            Metrics::global().keyframes.inc();
        }
        Ok(loc)
    }

    /// Reject a row whose order-by value does not strictly exceed the
    /// group's current maximum.
    fn check_version_increases(
        &self,
        table: &TableData,
        config: &TableConfig,
        group_hash: GroupHash,
        new_seq: i64,
        values: &[Value],
        snapshot: &Snapshot,
    ) -> Result<()> {
        let Some((_, prev)) = self.fetch_by_seq(table, config, group_hash, new_seq - 1, snapshot)? else {
            return Ok(());
        };
        let prev_version = Self::materialize_value(table, &prev.values[config.order_by_pos])?;
        let new_version = &values[config.order_by_pos];
        if new_version.compare(&prev_version)? != Ordering::Greater {
            return Err(Error::VersionNotIncreasing(format!(
                "order_by value {new_version:?} is not greater than the group's current {prev_version:?}"
            )));
        }
        Ok(())
    }

    /// Cold-start FIFO population: reconstruct the last `depth` rows and
    /// push them. Failures leave gaps the encoder simply skips.
    fn populate_fifo(
        &self,
        table: &TableData,
        config: &TableConfig,
        group_hash: GroupHash,
        slot: usize,
        new_seq: i64,
        depth: usize,
        snapshot: &Snapshot,
    ) {
        let start = (new_seq - depth as i64).max(1);
        for seq in start..new_seq {
            for delta_idx in 0..config.delta_positions.len() {
                match self.reconstruct(table, config, group_hash, seq, delta_idx, snapshot) {
                    Ok(Some(content)) => {
                        self.insert_fifo
                            .push(slot, table.id, group_hash, seq, delta_idx, &content);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!(seq, error = %e, "FIFO population skipped a row");
                    }
                }
            }
            self.insert_fifo.commit_entry(slot, table.id, group_hash, seq);
        }
    }

    /// Encode one delta column: keyframe, or smallest of the candidate
    /// deltas, with reconstruction and keyframe fallbacks.
    #[allow(clippy::too_many_arguments)]
    fn encode_delta_column(
        &self,
        table: &TableData,
        config: &TableConfig,
        group_hash: GroupHash,
        new_seq: i64,
        delta_idx: usize,
        raw: &[u8],
        is_keyframe: bool,
        fifo_slot: Option<usize>,
        snapshot: &Snapshot,
    ) -> Result<EncodedColumn> {
        let entropy = config.options.enable_entropy;
        if is_keyframe {
            let blob = codec::encode(KEYFRAME_TAG, &[], raw, entropy)
                .map_err(|e| Error::Internal(format!("keyframe encoding failed: {e}")))?;
            return Ok(EncodedColumn {
                blob,
                tag: KEYFRAME_TAG,
                raw_len: raw.len(),
            });
        }

        let mut best: Option<(Vec<u8>, u16)> = None;

        // Warm path: bases pre-materialized in the FIFO, candidates run
        // through the encode pool, smallest blob wins.
        if let Some(slot) = fifo_slot {
            let bases = self
                .insert_fifo
                .get_bases(slot, table.id, group_hash, new_seq, delta_idx);
            if !bases.is_empty() {
                let tasks: Vec<EncodeTask> = bases
                    .into_iter()
                    .map(|base| EncodeTask {
                        tag: base.tag,
                        base: base.data,
                    })
                    .collect();
                Metrics::global().encode_batches.inc();
                Metrics::global().encode_candidates.inc_by(tasks.len() as u64);
                let outcomes = self
                    .encode_pool()
                    .execute(Bytes::copy_from_slice(raw), entropy, tasks);
                for outcome in outcomes {
                    if let Some(blob) = outcome.blob {
                        if best.as_ref().is_none_or(|(b, _)| blob.len() < b.len()) {
                            best = Some((blob, outcome.tag));
                        }
                    }
                }
            }
        }

        // Cold path: FIFO empty or every candidate refused. Reconstruct
        // bases sequentially and encode inline.
        if best.is_none() {
            for tag in 1..=config.options.compress_depth {
                let base_seq = new_seq - i64::from(tag);
                if base_seq < 1 {
                    break;
                }
                let Ok(Some(base)) =
                    self.reconstruct(table, config, group_hash, base_seq, delta_idx, snapshot)
                else {
                    continue;
                };
                if let Ok(blob) = codec::encode(tag, &base, raw, entropy) {
                    if best.as_ref().is_none_or(|(b, _)| blob.len() < b.len()) {
                        best = Some((blob, tag));
                    }
                }
            }
        }

        // Self-healing fallback: no usable base anywhere, write a
        // keyframe so the chain stays reconstructable.
        match best {
            Some((blob, tag)) => Ok(EncodedColumn {
                blob,
                tag,
                raw_len: raw.len(),
            }),
            None => {
                tracing::debug!(
                    table = table.id,
                    seq = new_seq,
                    delta_idx,
                    "no valid delta base, falling back to keyframe"
                );
                let blob = codec::encode(KEYFRAME_TAG, &[], raw, entropy)
                    .map_err(|e| Error::Internal(format!("keyframe fallback failed: {e}")))?;
                Ok(EncodedColumn {
                    blob,
                    tag: KEYFRAME_TAG,
                    raw_len: raw.len(),
                })
            }
        }
    }

    /// Store a value inline or hand it to the TOAST side store when its
    /// serialized form exceeds the threshold.
    fn maybe_toast(&self, table: &TableData, value: &Value) -> Result<PhysicalValue> {
        let serialized =
            bincode::serialize(value).map_err(|e| HostError::RowSerialization(e.to_string()))?;
        if serialized.len() > TOAST_THRESHOLD {
            let size = serialized.len() as u32;
            let toast_id = table.toast.store(serialized);
            Ok(PhysicalValue::External { toast_id, size })
        } else {
            Ok(PhysicalValue::Inline(value.clone()))
        }
    }
}
