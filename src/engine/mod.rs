//! Delta engine
//!
//! The engine handle owns every process-global structure: the shared
//! caches, the encode pool, the stats store, the transaction manager, the
//! advisory lock table, the WAL and the table registry. Backends are
//! threads sharing one `Arc<Engine>`; attaching and detaching from host
//! shared memory maps onto cloning and dropping that handle.

/// Cascade delete
pub mod delete;
/// Insert encoding path
pub mod insert;
/// Chain reconstruction
pub mod reconstruct;

use crate::cache::{InsertFifo, SeqCaches, StripedContentCache};
use crate::constants::PAGE_SIZE;
use crate::core::config::{EngineConfig, TableConfig, TableOptions};
use crate::core::error::{Error, HostError, Result};
use crate::core::hash::GroupHash;
use crate::encode::EncodePool;
use crate::host::heap::Heap;
use crate::host::lock::AdvisoryLocks;
use crate::host::snapshot::Snapshot;
use crate::host::toast::ToastStore;
use crate::host::txn::{TxnId, TxnManager};
use crate::host::wal::WalLog;
use crate::stats::{StatsAccumulator, StatsStore};
use crate::types::row::{PhysicalRow, PhysicalValue, RowLocation};
use crate::types::schema::Schema;
use crate::types::value::Value;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Storage of one table: schema, heap pages and TOAST side store.
pub struct TableData {
    /// Table id assigned at creation
    pub id: u32,
    /// Table name
    pub name: String,
    /// Resolved schema (sequence column included)
    pub schema: Schema,
    /// Heap pages
    pub heap: Heap,
    /// TOAST side store
    pub toast: ToastStore,
}

/// One transaction context.
pub struct Txn {
    /// Transaction id
    pub id: TxnId,
    snapshot: Snapshot,
    stats: Mutex<StatsAccumulator>,
}

impl Txn {
    /// The MVCC snapshot taken when the transaction began.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// A snapshot that observes this transaction's own modifications.
    pub fn self_visible(&self) -> Snapshot {
        Snapshot::self_visible(self.id)
    }

    /// Run a closure over the transaction's stats accumulator.
    pub fn with_stats<R>(&self, f: impl FnOnce(&mut StatsAccumulator) -> R) -> R {
        f(&mut self.stats.lock())
    }
}

/// The engine handle.
pub struct Engine {
    /// Engine configuration
    pub config: EngineConfig,
    /// Shared content cache
    pub content_cache: StripedContentCache,
    /// Sequence caches
    pub seq_caches: SeqCaches,
    /// FIFO insert cache
    pub insert_fifo: InsertFifo,
    /// Persistent group stats
    pub stats: StatsStore,
    /// Transaction manager
    pub txns: TxnManager,
    /// Advisory lock table
    pub locks: AdvisoryLocks,
    /// Write-ahead log
    pub wal: WalLog,
    encode_pool: OnceCell<EncodePool>,
    tables: DashMap<u32, Arc<TableData>>,
    table_options: DashMap<u32, TableOptions>,
    table_configs: DashMap<u32, Arc<TableConfig>>,
    next_table_id: AtomicU32,
}

impl Engine {
    /// Build an engine from configuration.
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let cc = &config.content_cache;
        let content_cache =
            StripedContentCache::new(cc.size_mb, cc.stripes, cc.slot_kb, cc.max_entries, cc.max_entry_kb);
        let sc = &config.seq_cache;
        let seq_caches = SeqCaches::new(sc.group_mb, sc.tid_mb, sc.seq_tid_mb);
        let insert_fifo = InsertFifo::new(config.insert_cache.slots);
        Ok(Arc::new(Self {
            config,
            content_cache,
            seq_caches,
            insert_fifo,
            stats: StatsStore::new(),
            txns: TxnManager::new(),
            locks: AdvisoryLocks::new(),
            wal: WalLog::new(),
            encode_pool: OnceCell::new(),
            tables: DashMap::new(),
            table_options: DashMap::new(),
            table_configs: DashMap::new(),
            next_table_id: AtomicU32::new(1),
        }))
    }

    /// Engine with default configuration.
    pub fn with_defaults() -> Arc<Self> {
        Self::new(EngineConfig::default()).expect("default engine configuration is valid")
    }

    /// The encode pool, created on first use.
    pub fn encode_pool(&self) -> &EncodePool {
        self.encode_pool
            .get_or_init(|| EncodePool::new(self.config.encode_threads))
    }

    /// Create a table, optionally registering explicit delta options.
    pub fn create_table(
        &self,
        name: impl Into<String>,
        schema: Schema,
        options: Option<TableOptions>,
    ) -> Result<Arc<TableData>> {
        let id = self.next_table_id.fetch_add(1, Ordering::Relaxed);
        if let Some(options) = options {
            // Resolve eagerly so misconfiguration fails at creation, the
            // way an explicit configure() call does.
            let config = TableConfig::resolve(&schema, options.clone())?;
            self.table_options.insert(id, options);
            self.table_configs.insert(id, Arc::new(config));
        }
        let data = Arc::new(TableData {
            id,
            name: name.into(),
            schema,
            heap: Heap::new(PAGE_SIZE),
            toast: ToastStore::new(),
        });
        self.tables.insert(id, Arc::clone(&data));
        Ok(data)
    }

    /// Look up a table by id.
    pub fn table(&self, id: u32) -> Result<Arc<TableData>> {
        self.tables
            .get(&id)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| HostError::UnknownTable(id).into())
    }

    /// Resolved per-table configuration, auto-detected when none was
    /// registered, cached until invalidated.
    pub fn table_config(&self, table: &TableData) -> Result<Arc<TableConfig>> {
        if let Some(config) = self.table_configs.get(&table.id) {
            return Ok(Arc::clone(config.value()));
        }
        let config = match self.table_options.get(&table.id) {
            Some(options) => TableConfig::resolve(&table.schema, options.value().clone())?,
            None => TableConfig::auto_detect(&table.schema)?,
        };
        let config = Arc::new(config);
        self.table_configs.insert(table.id, Arc::clone(&config));
        Ok(config)
    }

    /// Drop the cached (resolved) configuration of a table.
    pub fn invalidate_config(&self, table_id: u32) {
        self.table_configs.remove(&table_id);
    }

    /// Begin a transaction with an MVCC snapshot.
    pub fn begin(&self) -> Txn {
        let id = self.txns.begin();
        Txn {
            id,
            snapshot: Snapshot::mvcc(id, &self.txns),
            stats: Mutex::new(StatsAccumulator::new()),
        }
    }

    /// Commit: flush the stats accumulator, log the outcome, release
    /// advisory locks.
    pub fn commit(&self, txn: Txn) {
        txn.stats.lock().flush(&self.stats);
        self.wal.append(crate::host::wal::WalRecord::Commit { txid: txn.id });
        self.txns.mark_committed(txn.id);
        self.locks.release_all(txn.id);
    }

    /// Abort: discard the accumulator, log the outcome, release locks.
    pub fn abort(&self, txn: Txn) {
        self.wal.append(crate::host::wal::WalRecord::Abort { txid: txn.id });
        self.txns.mark_aborted(txn.id);
        self.locks.release_all(txn.id);
    }

    // ---- physical row helpers ----------------------------------------

    /// Serialize a physical row for the heap or the WAL.
    pub fn encode_row(row: &PhysicalRow) -> Result<Vec<u8>> {
        bincode::serialize(row).map_err(|e| HostError::RowSerialization(e.to_string()).into())
    }

    /// Deserialize a physical row payload.
    pub fn decode_row(payload: &[u8]) -> Result<PhysicalRow> {
        bincode::deserialize(payload).map_err(|e| HostError::RowSerialization(e.to_string()).into())
    }

    /// Materialize one stored attribute, resolving TOAST references.
    pub fn materialize_value(table: &TableData, value: &PhysicalValue) -> Result<Value> {
        match value {
            PhysicalValue::Inline(v) => Ok(v.clone()),
            PhysicalValue::External { toast_id, .. } => {
                let bytes = table.toast.fetch(*toast_id)?;
                bincode::deserialize(&bytes)
                    .map_err(|e| HostError::RowSerialization(e.to_string()).into())
            }
        }
    }

    /// Group value of a physical row under a table config.
    pub fn group_of_row(table: &TableData, config: &TableConfig, row: &PhysicalRow) -> Result<Value> {
        match config.group_by_pos {
            Some(pos) => Self::materialize_value(table, &row.values[pos]),
            None => Ok(Value::Null),
        }
    }

    /// Sequence number stored in a physical row.
    pub fn seq_of_row(config: &TableConfig, row: &PhysicalRow) -> Result<i64> {
        match &row.values[config.seq_pos] {
            PhysicalValue::Inline(Value::Int(seq)) => Ok(*seq),
            other => Err(Error::DataCorrupted(format!(
                "sequence column holds {other:?} instead of an integer"
            ))),
        }
    }

    // ---- shared lookups ----------------------------------------------

    /// Fetch the visible physical row at (group, seq).
    ///
    /// Tries the (group, seq) location cache first; on a miss, scans the
    /// heap and batch-populates both sequence caches for every visible
    /// row of the group it passes.
    pub fn fetch_by_seq(
        &self,
        table: &TableData,
        config: &TableConfig,
        group_hash: GroupHash,
        seq: i64,
        snapshot: &Snapshot,
    ) -> Result<Option<(RowLocation, PhysicalRow)>> {
        if let Some(loc) = self.seq_caches.get_seq_tid(table.id, group_hash, seq) {
            if let Some(heap_row) = table.heap.read(loc) {
                if snapshot.is_visible(&heap_row.header, &self.txns) {
                    let row = Self::decode_row(&heap_row.payload)?;
                    if Self::seq_of_row(config, &row)? == seq {
                        let group = Self::group_of_row(table, config, &row)?;
                        if GroupHash::of(&group) == group_hash {
                            return Ok(Some((loc, row)));
                        }
                    }
                }
            }
        }

        let mut found = None;
        self.scan_group(table, config, group_hash, snapshot, |loc, row| {
            let row_seq = Self::seq_of_row(config, row)?;
            self.seq_caches.set_tid_seq(table.id, loc, row_seq);
            self.seq_caches.set_seq_tid(table.id, group_hash, row_seq, loc);
            if row_seq == seq {
                found = Some((loc, row.clone()));
            }
            Ok(true)
        })?;
        Ok(found)
    }

    /// Highest visible sequence in a group (0 when empty). Used as the
    /// slow path behind the group max-seq cache.
    pub fn scan_group_max_seq(
        &self,
        table: &TableData,
        config: &TableConfig,
        group_hash: GroupHash,
        snapshot: &Snapshot,
    ) -> Result<i64> {
        let mut max_seq = 0;
        self.scan_group(table, config, group_hash, snapshot, |_, row| {
            max_seq = max_seq.max(Self::seq_of_row(config, row)?);
            Ok(true)
        })?;
        Ok(max_seq)
    }

    /// Walk every visible row of a group in physical order. The callback
    /// returns `false` to stop early.
    pub fn scan_group(
        &self,
        table: &TableData,
        config: &TableConfig,
        group_hash: GroupHash,
        snapshot: &Snapshot,
        mut f: impl FnMut(RowLocation, &PhysicalRow) -> Result<bool>,
    ) -> Result<()> {
        for block in 0..table.heap.num_pages() {
            let Some(page) = table.heap.page(block) else { continue };
            let page = page.read();
            for offset in 0..page.max_offset() {
                let Some(heap_row) = page.row(offset) else { continue };
                if !snapshot.is_visible(&heap_row.header, &self.txns) {
                    continue;
                }
                let row = Self::decode_row(&heap_row.payload)?;
                let group = Self::group_of_row(table, config, &row)?;
                if GroupHash::of(&group) != group_hash {
                    continue;
                }
                if !f(RowLocation::new(block, offset), &row)? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Invalidate every cache holding state for a table. Called on
    /// truncate, drop and cascade delete.
    pub fn invalidate_table_caches(&self, table_id: u32) {
        self.content_cache.invalidate_table(table_id);
        self.seq_caches.invalidate_table(table_id);
        self.insert_fifo.invalidate_table(table_id);
    }
}
