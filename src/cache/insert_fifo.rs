//! Per-(table, group) FIFO cache of materialized delta bases
//!
//! Holds the last `compress_depth` reconstructed delta-column payloads for
//! each recently inserted group, so the next insert can feed the encoder
//! without walking the chain. A fixed number of slots is shared by all
//! groups; the least-active slot is reused when none matches.
//!
//! Between `acquire` and any later operation another backend may evict and
//! reuse the slot, so every operation re-verifies (table, group-hash)
//! ownership under the slot lock and degrades to the slow path on
//! mismatch (counted as an eviction miss).

use crate::core::hash::GroupHash;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// One base candidate returned from the FIFO.
#[derive(Debug, Clone)]
pub struct FifoBase {
    /// Sequence number of the base row
    pub seq: i64,
    /// Delta tag: distance from the row being inserted
    pub tag: u16,
    /// Raw column content
    pub data: Bytes,
}

#[derive(Debug, Clone)]
struct RingEntry {
    seq: i64,
    valid: bool,
    cols: Vec<Option<Bytes>>,
}

#[derive(Debug, Default)]
struct FifoSlot {
    owner: Option<(u32, GroupHash)>,
    activity: u64,
    depth: usize,
    num_cols: usize,
    ring: Vec<RingEntry>,
    /// Write position: the entry being assembled for the in-flight insert.
    head: usize,
    committed: usize,
}

/// Counter snapshot of the FIFO cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertFifoStats {
    /// Slots currently owned by a group
    pub slots_in_use: u64,
    /// Total slots
    pub total_slots: u64,
    /// Acquires that found a warm slot
    pub hits: u64,
    /// Acquires that had to start a cold slot
    pub misses: u64,
    /// Slots reused away from another group
    pub evictions: u64,
    /// Operations that found their slot reused since acquire
    pub eviction_misses: u64,
}

/// Shared FIFO insert cache.
pub struct InsertFifo {
    slots: Vec<Mutex<FifoSlot>>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    eviction_misses: AtomicU64,
}

impl InsertFifo {
    /// Build the cache with a fixed slot count.
    pub fn new(num_slots: usize) -> Self {
        Self {
            slots: (0..num_slots).map(|_| Mutex::new(FifoSlot::default())).collect(),
            clock: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            eviction_misses: AtomicU64::new(0),
        }
    }

    /// Find or claim the slot for a (table, group) pair.
    ///
    /// Returns the slot index and whether it is freshly claimed. A fresh
    /// slot is empty; the caller populates it by reconstructing the last
    /// `depth` rows and pushing them.
    pub fn acquire(&self, table: u32, group: GroupHash, depth: usize, num_cols: usize) -> (usize, bool) {
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed);

        // Fast pass: look for an owned slot.
        for (idx, slot) in self.slots.iter().enumerate() {
            let mut slot = slot.lock();
            if slot.owner == Some((table, group)) {
                slot.activity = stamp;
                if slot.depth != depth || slot.num_cols != num_cols {
                    // Depth changed (config reload): rebuild the ring.
                    slot.reset(table, group, depth, num_cols, stamp);
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return (idx, true);
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                return (idx, false);
            }
        }

        // Evict the least-active slot (empty slots have activity 0 and win).
        let mut victim = 0;
        let mut victim_activity = u64::MAX;
        for (idx, slot) in self.slots.iter().enumerate() {
            let slot = slot.lock();
            if slot.activity < victim_activity {
                victim_activity = slot.activity;
                victim = idx;
            }
        }

        let mut slot = self.slots[victim].lock();
        if slot.owner.is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        slot.reset(table, group, depth, num_cols, stamp);
        self.misses.fetch_add(1, Ordering::Relaxed);
        (victim, true)
    }

    /// Read base candidates for one column, closest first (tag 1, 2, ...).
    ///
    /// Returns an empty vector when the slot was reused since acquire or
    /// holds nothing useful yet.
    pub fn get_bases(
        &self,
        slot_idx: usize,
        table: u32,
        group: GroupHash,
        new_seq: i64,
        col_idx: usize,
    ) -> Vec<FifoBase> {
        let slot = self.slots[slot_idx].lock();
        if slot.owner != Some((table, group)) {
            self.eviction_misses.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }
        let mut bases = Vec::new();
        for entry in &slot.ring {
            if !entry.valid || entry.seq >= new_seq {
                continue;
            }
            let distance = new_seq - entry.seq;
            if distance > slot.depth as i64 || distance > i64::from(u16::MAX) {
                continue;
            }
            if let Some(Some(data)) = entry.cols.get(col_idx) {
                bases.push(FifoBase {
                    seq: entry.seq,
                    tag: distance as u16,
                    data: data.clone(),
                });
            }
        }
        bases.sort_by_key(|b| b.tag);
        bases
    }

    /// Stage content for one column of the row being inserted.
    ///
    /// The previous content at the write position is dropped first, so the
    /// slot stays self-consistent even if a later column's push fails.
    pub fn push(&self, slot_idx: usize, table: u32, group: GroupHash, seq: i64, col_idx: usize, data: &[u8]) {
        let mut slot = self.slots[slot_idx].lock();
        if slot.owner != Some((table, group)) {
            self.eviction_misses.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if slot.depth == 0 || col_idx >= slot.num_cols {
            return;
        }
        let head = slot.head;
        let entry = &mut slot.ring[head];
        if entry.seq != seq {
            // New row at this position: drop whatever the ring held here.
            entry.seq = seq;
            entry.valid = false;
            for col in entry.cols.iter_mut() {
                *col = None;
            }
        }
        entry.cols[col_idx] = Some(Bytes::copy_from_slice(data));
    }

    /// Mark the staged row complete and advance the write position.
    pub fn commit_entry(&self, slot_idx: usize, table: u32, group: GroupHash, seq: i64) {
        let mut slot = self.slots[slot_idx].lock();
        if slot.owner != Some((table, group)) {
            self.eviction_misses.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if slot.depth == 0 {
            return;
        }
        let head = slot.head;
        if slot.ring[head].seq != seq {
            return;
        }
        slot.ring[head].valid = true;
        slot.head = (head + 1) % slot.depth;
        slot.committed = (slot.committed + 1).min(slot.depth);
    }

    /// Release every slot owned by a table.
    pub fn invalidate_table(&self, table: u32) {
        for slot in &self.slots {
            let mut slot = slot.lock();
            if slot.owner.map(|(t, _)| t) == Some(table) {
                *slot = FifoSlot::default();
            }
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> InsertFifoStats {
        InsertFifoStats {
            slots_in_use: self.slots.iter().filter(|s| s.lock().owner.is_some()).count() as u64,
            total_slots: self.slots.len() as u64,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            eviction_misses: self.eviction_misses.load(Ordering::Relaxed),
        }
    }
}

impl FifoSlot {
    fn reset(&mut self, table: u32, group: GroupHash, depth: usize, num_cols: usize, stamp: u64) {
        self.owner = Some((table, group));
        self.activity = stamp;
        self.depth = depth;
        self.num_cols = num_cols;
        self.ring = (0..depth)
            .map(|_| RingEntry {
                seq: 0,
                valid: false,
                cols: vec![None; num_cols],
            })
            .collect();
        self.head = 0;
        self.committed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u64) -> GroupHash {
        GroupHash { h1: n, h2: !n }
    }

    #[test]
    fn acquire_then_reacquire_is_warm() {
        let fifo = InsertFifo::new(4);
        let (idx, is_new) = fifo.acquire(1, hash(1), 2, 1);
        assert!(is_new);
        let (idx2, is_new2) = fifo.acquire(1, hash(1), 2, 1);
        assert_eq!(idx, idx2);
        assert!(!is_new2);
        assert_eq!(fifo.stats().hits, 1);
    }

    #[test]
    fn push_commit_get_bases_orders_by_tag() {
        let fifo = InsertFifo::new(2);
        let (idx, _) = fifo.acquire(1, hash(1), 3, 1);
        for seq in 1..=3 {
            fifo.push(idx, 1, hash(1), seq, 0, format!("v{seq}").as_bytes());
            fifo.commit_entry(idx, 1, hash(1), seq);
        }
        let bases = fifo.get_bases(idx, 1, hash(1), 4, 0);
        assert_eq!(bases.len(), 3);
        assert_eq!(bases[0].tag, 1);
        assert_eq!(&bases[0].data[..], b"v3");
        assert_eq!(bases[2].tag, 3);
        assert_eq!(&bases[2].data[..], b"v1");
    }

    #[test]
    fn ring_overwrites_oldest() {
        let fifo = InsertFifo::new(2);
        let (idx, _) = fifo.acquire(1, hash(1), 2, 1);
        for seq in 1..=5 {
            fifo.push(idx, 1, hash(1), seq, 0, format!("v{seq}").as_bytes());
            fifo.commit_entry(idx, 1, hash(1), seq);
        }
        let bases = fifo.get_bases(idx, 1, hash(1), 6, 0);
        let tags: Vec<u16> = bases.iter().map(|b| b.tag).collect();
        assert_eq!(tags, vec![1, 2]);
    }

    #[test]
    fn uncommitted_entry_is_not_a_base() {
        let fifo = InsertFifo::new(2);
        let (idx, _) = fifo.acquire(1, hash(1), 2, 1);
        fifo.push(idx, 1, hash(1), 1, 0, b"staged");
        assert!(fifo.get_bases(idx, 1, hash(1), 2, 0).is_empty());
    }

    #[test]
    fn ownership_recheck_detects_reuse() {
        let fifo = InsertFifo::new(1);
        let (idx, _) = fifo.acquire(1, hash(1), 2, 1);
        fifo.push(idx, 1, hash(1), 1, 0, b"one");
        fifo.commit_entry(idx, 1, hash(1), 1);
        // Another group steals the only slot.
        let (idx2, is_new) = fifo.acquire(1, hash(2), 2, 1);
        assert_eq!(idx, idx2);
        assert!(is_new);
        assert_eq!(fifo.stats().evictions, 1);
        // The original owner's reads now degrade to the slow path.
        assert!(fifo.get_bases(idx, 1, hash(1), 2, 0).is_empty());
        assert_eq!(fifo.stats().eviction_misses, 1);
    }

    #[test]
    fn invalidate_table_releases_slots() {
        let fifo = InsertFifo::new(2);
        fifo.acquire(1, hash(1), 2, 1);
        fifo.acquire(2, hash(2), 2, 1);
        fifo.invalidate_table(1);
        let stats = fifo.stats();
        assert_eq!(stats.slots_in_use, 1);
    }
}
