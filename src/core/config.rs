//! Configuration management for the patchstore engine
//!
//! Engine-wide tunables mirror server GUCs: fixed at engine start, with
//! performance-oriented defaults. Per-table settings come from an explicit
//! registration or are auto-detected from the schema on first use.

use crate::constants::*;
use crate::core::error::{Error, Result};
use crate::types::schema::Schema;
use serde::{Deserialize, Serialize};

/// Engine-wide configuration, fixed for the lifetime of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Content cache tuning
    pub content_cache: ContentCacheConfig,

    /// Sequence cache tuning
    pub seq_cache: SeqCacheConfig,

    /// FIFO insert cache tuning
    pub insert_cache: InsertCacheConfig,

    /// Number of encode worker threads (0 = sequential encoding)
    pub encode_threads: usize,
}

/// Shared content cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentCacheConfig {
    /// Total cache size in MiB (capped at 1 GiB)
    pub size_mb: usize,

    /// Number of independent stripes
    pub stripes: usize,

    /// Content slot size in KiB
    pub slot_kb: usize,

    /// Maximum entries across all stripes
    pub max_entries: usize,

    /// Per-entry size cap in KiB; larger content bypasses the cache
    pub max_entry_kb: usize,
}

/// Sequence cache configuration (three independent sub-caches).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeqCacheConfig {
    /// Group max-seq cache size in MiB
    pub group_mb: usize,

    /// Location-to-seq cache size in MiB
    pub tid_mb: usize,

    /// (group, seq)-to-location cache size in MiB
    pub seq_tid_mb: usize,
}

/// FIFO insert cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertCacheConfig {
    /// Number of (table, group) slots
    pub slots: usize,

    /// Maximum delta columns per table
    pub max_delta_columns: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            content_cache: ContentCacheConfig::default(),
            seq_cache: SeqCacheConfig::default(),
            insert_cache: InsertCacheConfig::default(),
            encode_threads: DEFAULT_ENCODE_THREADS,
        }
    }
}

impl Default for ContentCacheConfig {
    fn default() -> Self {
        Self {
            size_mb: DEFAULT_CACHE_SIZE_MB,
            stripes: DEFAULT_CACHE_STRIPES,
            slot_kb: DEFAULT_CACHE_SLOT_KB,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            max_entry_kb: DEFAULT_CACHE_MAX_ENTRY_KB,
        }
    }
}

impl Default for SeqCacheConfig {
    fn default() -> Self {
        Self {
            group_mb: DEFAULT_SEQ_CACHE_SIZE_MB,
            tid_mb: DEFAULT_SEQ_CACHE_SIZE_MB,
            seq_tid_mb: DEFAULT_SEQ_CACHE_SIZE_MB,
        }
    }
}

impl Default for InsertCacheConfig {
    fn default() -> Self {
        Self {
            slots: DEFAULT_INSERT_CACHE_SLOTS,
            max_delta_columns: MAX_DELTA_COLUMNS,
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional TOML file layered under
    /// `PATCHSTORE_`-prefixed environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("PATCHSTORE").separator("__"));

        let cfg: EngineConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .unwrap_or_default();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check bounds on all tunables.
    pub fn validate(&self) -> Result<()> {
        if self.content_cache.size_mb == 0 || self.content_cache.size_mb > MAX_CACHE_SIZE_MB {
            return Err(Error::InvalidConfig(format!(
                "content cache size must be 1..={MAX_CACHE_SIZE_MB} MiB"
            )));
        }
        if self.content_cache.stripes == 0 {
            return Err(Error::InvalidConfig("stripe count must be positive".into()));
        }
        if self.content_cache.slot_kb == 0 {
            return Err(Error::InvalidConfig("slot size must be positive".into()));
        }
        if self.insert_cache.slots == 0 {
            return Err(Error::InvalidConfig(
                "insert cache needs at least one slot".into(),
            ));
        }
        if self.encode_threads > MAX_ENCODE_THREADS {
            return Err(Error::InvalidConfig(format!(
                "encode_threads must be 0..={MAX_ENCODE_THREADS}"
            )));
        }
        Ok(())
    }
}

/// Per-table configuration, registered explicitly or auto-detected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableOptions {
    /// Column used for grouping (None = whole table is one group)
    pub group_by: Option<String>,

    /// Column whose value must strictly increase within a group
    pub order_by: String,

    /// Columns stored delta-compressed
    pub delta_columns: Vec<String>,

    /// Create a keyframe every N rows
    pub keyframe_every: i64,

    /// How many previous versions to try as delta bases
    pub compress_depth: u16,

    /// Enable the entropy stage on top of delta encoding
    pub enable_entropy: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            group_by: None,
            order_by: String::new(),
            delta_columns: Vec::new(),
            keyframe_every: DEFAULT_KEYFRAME_EVERY,
            compress_depth: DEFAULT_COMPRESS_DEPTH,
            enable_entropy: true,
        }
    }
}

/// Table options with column names resolved to schema positions.
///
/// Cached per table; dropped on `invalidate_config` or schema change.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Source options
    pub options: TableOptions,

    /// Resolved group-by position
    pub group_by_pos: Option<usize>,

    /// Resolved order-by position
    pub order_by_pos: usize,

    /// Resolved delta column positions
    pub delta_positions: Vec<usize>,

    /// Resolved sequence column position
    pub seq_pos: usize,
}

impl TableConfig {
    /// Resolve explicit options against a schema, validating every rule
    /// the engine depends on.
    pub fn resolve(schema: &Schema, options: TableOptions) -> Result<Self> {
        let seq_pos = schema
            .seq_position()
            .ok_or_else(|| Error::InvalidConfig(format!("table is missing the {SEQ_COLUMN} column")))?;

        let order_by_pos = schema.position_of(&options.order_by).ok_or_else(|| {
            Error::InvalidConfig(format!("order_by column {:?} not found", options.order_by))
        })?;
        if !schema.column(order_by_pos).ty.is_orderable() {
            return Err(Error::InvalidConfig(format!(
                "order_by column {:?} has no usable ordering",
                options.order_by
            )));
        }

        let group_by_pos = match &options.group_by {
            Some(name) => Some(schema.position_of(name).ok_or_else(|| {
                Error::InvalidConfig(format!("group_by column {name:?} not found"))
            })?),
            None => None,
        };

        if options.delta_columns.is_empty() {
            return Err(Error::InvalidConfig("no delta columns configured".into()));
        }
        if options.delta_columns.len() > MAX_DELTA_COLUMNS {
            return Err(Error::InvalidConfig(format!(
                "at most {MAX_DELTA_COLUMNS} delta columns are supported"
            )));
        }
        let mut delta_positions = Vec::with_capacity(options.delta_columns.len());
        for name in &options.delta_columns {
            let pos = schema
                .position_of(name)
                .ok_or_else(|| Error::InvalidConfig(format!("delta column {name:?} not found")))?;
            if !schema.column(pos).ty.supports_delta() {
                return Err(Error::InvalidConfig(format!(
                    "delta column {name:?} has unsupported type {:?}",
                    schema.column(pos).ty
                )));
            }
            if Some(pos) == group_by_pos || pos == order_by_pos || pos == seq_pos {
                return Err(Error::InvalidConfig(format!(
                    "column {name:?} cannot be both a delta column and a key column"
                )));
            }
            delta_positions.push(pos);
        }

        if options.keyframe_every < 1 {
            return Err(Error::InvalidConfig("keyframe_every must be >= 1".into()));
        }
        if options.compress_depth < 1 {
            return Err(Error::InvalidConfig("compress_depth must be >= 1".into()));
        }

        Ok(Self {
            options,
            group_by_pos,
            order_by_pos,
            delta_positions,
            seq_pos,
        })
    }

    /// Auto-detect options from a schema when none were registered.
    ///
    /// Every text/bytes column becomes a delta column; the first orderable
    /// non-delta, non-sequence column becomes order_by. There is no
    /// detected group_by: grouping is an explicit modeling decision.
    pub fn auto_detect(schema: &Schema) -> Result<Self> {
        let seq_pos = schema
            .seq_position()
            .ok_or_else(|| Error::InvalidConfig(format!("table is missing the {SEQ_COLUMN} column")))?;

        let mut delta_columns = Vec::new();
        for (pos, col) in schema.columns.iter().enumerate() {
            if pos != seq_pos && col.ty.supports_delta() {
                delta_columns.push(col.name.clone());
            }
        }

        let order_by = schema
            .columns
            .iter()
            .enumerate()
            .find(|(pos, col)| {
                *pos != seq_pos && col.ty.is_orderable() && !delta_columns.contains(&col.name)
            })
            .map(|(_, col)| col.name.clone())
            .ok_or_else(|| {
                Error::InvalidConfig("auto-detection found no usable order_by column".into())
            })?;

        Self::resolve(
            schema,
            TableOptions {
                order_by,
                delta_columns,
                ..TableOptions::default()
            },
        )
    }

    /// Keyframe decision for a sequence number.
    pub fn is_keyframe(&self, seq: i64) -> bool {
        seq == 1 || seq % self.options.keyframe_every == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::schema::ColumnDef;
    use crate::types::value::ColumnType;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("device", ColumnType::Int),
            ColumnDef::new("recorded_at", ColumnType::Int),
            ColumnDef::new("payload", ColumnType::Text),
        ])
    }

    #[test]
    fn resolve_maps_positions() {
        let cfg = TableConfig::resolve(
            &schema(),
            TableOptions {
                group_by: Some("device".into()),
                order_by: "recorded_at".into(),
                delta_columns: vec!["payload".into()],
                ..TableOptions::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.group_by_pos, Some(0));
        assert_eq!(cfg.order_by_pos, 1);
        assert_eq!(cfg.delta_positions, vec![2]);
        assert_eq!(cfg.seq_pos, 3);
    }

    #[test]
    fn auto_detect_finds_text_columns() {
        let cfg = TableConfig::auto_detect(&schema()).unwrap();
        assert_eq!(cfg.delta_positions, vec![2]);
        assert_eq!(cfg.order_by_pos, 0);
    }

    #[test]
    fn delta_column_must_support_delta() {
        let err = TableConfig::resolve(
            &schema(),
            TableOptions {
                order_by: "recorded_at".into(),
                delta_columns: vec!["device".into()],
                ..TableOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn keyframe_period() {
        let cfg = TableConfig::resolve(
            &schema(),
            TableOptions {
                order_by: "recorded_at".into(),
                delta_columns: vec!["payload".into()],
                keyframe_every: 3,
                ..TableOptions::default()
            },
        )
        .unwrap();
        let frames: Vec<bool> = (1..=7).map(|s| cfg.is_keyframe(s)).collect();
        assert_eq!(frames, [true, false, false, true, false, false, true]);
    }

    #[test]
    fn engine_defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }
}
