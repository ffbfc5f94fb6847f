//! Shared caches for sequence number lookups
//!
//! Three independent caches, one per lookup direction:
//!
//! 1. group max-seq: (table, group-hash) -> max sequence. Drives INSERT
//!    sequence allocation, including the rollback contract that keeps
//!    groups gap-free when an insert fails after allocating.
//! 2. location-to-seq: (table, location) -> sequence. Drives reads.
//! 3. (group, seq)-to-location: reverse mapping for fetch-by-seq.
//!
//! All three share one open-addressed, tombstoned, LRU-threaded table
//! type behind a single mutex each; operations are O(1) probes so a
//! plain exclusive lock is sufficient.

use crate::cache::probe::{self, SlotState};
use crate::core::hash::GroupHash;
use crate::types::row::RowLocation;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Keys stored in a sequence cache table.
pub trait SeqKey: Copy + Eq {
    /// Fold the key to a probe start index.
    fn fold32(&self) -> u32;
    /// Table id the key belongs to (for invalidation).
    fn table(&self) -> u32;
}

fn fnv_mix(parts: &[u32]) -> u32 {
    let mut h: u32 = 2166136261;
    for p in parts {
        h ^= p;
        h = h.wrapping_mul(16777619);
    }
    h
}

/// (table, group-hash) key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupKey {
    /// Table id
    pub table: u32,
    /// Group hash
    pub group: GroupHash,
}

impl SeqKey for GroupKey {
    fn fold32(&self) -> u32 {
        fnv_mix(&[self.table, self.group.fold32()])
    }
    fn table(&self) -> u32 {
        self.table
    }
}

/// (table, location) key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TidKey {
    /// Table id
    pub table: u32,
    /// Physical row location
    pub loc: RowLocation,
}

impl SeqKey for TidKey {
    fn fold32(&self) -> u32 {
        fnv_mix(&[self.table, self.loc.block, u32::from(self.loc.offset)])
    }
    fn table(&self) -> u32 {
        self.table
    }
}

/// (table, group-hash, seq) key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSeqKey {
    /// Table id
    pub table: u32,
    /// Group hash
    pub group: GroupHash,
    /// Sequence number
    pub seq: i64,
}

impl SeqKey for GroupSeqKey {
    fn fold32(&self) -> u32 {
        fnv_mix(&[
            self.table,
            self.group.fold32(),
            self.seq as u32,
            (self.seq >> 32) as u32,
        ])
    }
    fn table(&self) -> u32 {
        self.table
    }
}

const NIL: i32 = -1;

#[derive(Clone, Copy)]
struct Slot<K: SeqKey, V: Copy> {
    key: Option<K>,
    value: Option<V>,
    tombstone: bool,
    lru_prev: i32,
    lru_next: i32,
}

impl<K: SeqKey, V: Copy> Slot<K, V> {
    fn vacant() -> Self {
        Slot {
            key: None,
            value: None,
            tombstone: false,
            lru_prev: NIL,
            lru_next: NIL,
        }
    }

    fn probe_state(&self, key: &K) -> SlotState {
        match &self.key {
            Some(k) if k == key => SlotState::Match,
            Some(_) => SlotState::Other,
            None if self.tombstone => SlotState::Tombstone,
            None => SlotState::Empty,
        }
    }
}

struct TableState<K: SeqKey, V: Copy> {
    slots: Vec<Slot<K, V>>,
    lru_head: i32,
    lru_tail: i32,
    len: usize,
}

/// One sub-cache: an open-addressed table behind a mutex plus counters.
pub struct SeqTable<K: SeqKey, V: Copy> {
    state: Mutex<TableState<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    capacity: usize,
}

/// Counter snapshot of one sub-cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeqTableStats {
    /// Live entries
    pub entries: u64,
    /// Capacity in entries
    pub capacity: u64,
    /// Hits
    pub hits: u64,
    /// Misses
    pub misses: u64,
    /// Evictions
    pub evictions: u64,
}

impl<K: SeqKey, V: Copy> SeqTable<K, V> {
    /// Build a table sized to roughly `size_mb` MiB of entries.
    pub fn with_size_mb(size_mb: usize) -> Self {
        let entry_bytes = std::mem::size_of::<Slot<K, V>>().max(16);
        let capacity = (size_mb * 1024 * 1024 / entry_bytes).max(64);
        Self {
            state: Mutex::new(TableState {
                slots: vec![Slot::vacant(); capacity],
                lru_head: NIL,
                lru_tail: NIL,
                len: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            capacity,
        }
    }

    /// Get the value for a key, touching the LRU on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();
        match state.find(key) {
            Some(idx) => {
                state.lru_unlink(idx);
                state.lru_push_front(idx);
                self.hits.fetch_add(1, Ordering::Relaxed);
                state.slots[idx].value
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Idempotent upsert; evicts the LRU tail when the table is full.
    pub fn put(&self, key: K, value: V) {
        let mut state = self.state.lock();
        self.put_locked(&mut state, key, value);
    }

    /// Read-modify-write under one lock hold.
    ///
    /// `f` maps the current value (if any) to the new value to store (or
    /// `None` to leave the table untouched) plus the result to return.
    pub fn update<R>(&self, key: K, f: impl FnOnce(Option<V>) -> (Option<V>, R)) -> R {
        let mut state = self.state.lock();
        let current = state.find(&key).and_then(|idx| state.slots[idx].value);
        let (new_value, result) = f(current);
        if let Some(v) = new_value {
            self.put_locked(&mut state, key, v);
        }
        result
    }

    fn put_locked(&self, state: &mut TableState<K, V>, key: K, value: V) {
        if let Some(idx) = state.find(&key) {
            state.slots[idx].value = Some(value);
            state.lru_unlink(idx);
            state.lru_push_front(idx);
            return;
        }
        let len = state.slots.len();
        let mut idx =
            probe::probe_for_write(len, key.fold32() % len as u32, |i| state.slots[i].probe_state(&key));
        while idx.is_none() && state.len > 0 {
            state.evict_lru(&self.evictions);
            idx = probe::probe_for_write(len, key.fold32() % len as u32, |i| {
                state.slots[i].probe_state(&key)
            });
        }
        let Some(idx) = idx else { return };
        state.slots[idx] = Slot {
            key: Some(key),
            value: Some(value),
            tombstone: false,
            lru_prev: NIL,
            lru_next: NIL,
        };
        state.lru_push_front(idx);
        state.len += 1;
    }

    /// Remove every entry belonging to a table, leaving tombstones.
    pub fn invalidate_table(&self, table: u32) {
        let mut state = self.state.lock();
        for idx in 0..state.slots.len() {
            if state.slots[idx].key.map(|k| k.table()) == Some(table) {
                state.lru_unlink(idx);
                let slot = &mut state.slots[idx];
                slot.key = None;
                slot.value = None;
                slot.tombstone = true;
                state.len -= 1;
            }
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SeqTableStats {
        SeqTableStats {
            entries: self.state.lock().len as u64,
            capacity: self.capacity as u64,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl<K: SeqKey, V: Copy> TableState<K, V> {
    fn find(&self, key: &K) -> Option<usize> {
        let len = self.slots.len();
        probe::probe_for_read(len, key.fold32() % len as u32, |i| self.slots[i].probe_state(key))
    }

    fn lru_unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].lru_prev, self.slots[idx].lru_next);
        if prev != NIL {
            self.slots[prev as usize].lru_next = next;
        } else if self.lru_head == idx as i32 {
            self.lru_head = next;
        }
        if next != NIL {
            self.slots[next as usize].lru_prev = prev;
        } else if self.lru_tail == idx as i32 {
            self.lru_tail = prev;
        }
        self.slots[idx].lru_prev = NIL;
        self.slots[idx].lru_next = NIL;
    }

    fn lru_push_front(&mut self, idx: usize) {
        self.slots[idx].lru_prev = NIL;
        self.slots[idx].lru_next = self.lru_head;
        if self.lru_head != NIL {
            self.slots[self.lru_head as usize].lru_prev = idx as i32;
        } else {
            self.lru_tail = idx as i32;
        }
        self.lru_head = idx as i32;
    }

    fn evict_lru(&mut self, evictions: &AtomicU64) {
        let victim = self.lru_tail;
        if victim == NIL {
            return;
        }
        let idx = victim as usize;
        self.lru_unlink(idx);
        let slot = &mut self.slots[idx];
        slot.key = None;
        slot.value = None;
        slot.tombstone = true;
        self.len -= 1;
        evictions.fetch_add(1, Ordering::Relaxed);
    }
}

/// The three sequence sub-caches used by the engine.
pub struct SeqCaches {
    group_max: SeqTable<GroupKey, i64>,
    tid_seq: SeqTable<TidKey, i64>,
    seq_tid: SeqTable<GroupSeqKey, RowLocation>,
}

/// Combined counter snapshot of the three sub-caches.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeqCacheStats {
    /// Group max-seq cache
    pub group: SeqTableStats,
    /// Location-to-seq cache
    pub tid: SeqTableStats,
    /// (group, seq)-to-location cache
    pub seq_tid: SeqTableStats,
}

impl SeqCaches {
    /// Build all three caches from engine tunables.
    pub fn new(group_mb: usize, tid_mb: usize, seq_tid_mb: usize) -> Self {
        Self {
            group_max: SeqTable::with_size_mb(group_mb),
            tid_seq: SeqTable::with_size_mb(tid_mb),
            seq_tid: SeqTable::with_size_mb(seq_tid_mb),
        }
    }

    /// Cached max sequence for a group, or `None` when the group is cold.
    pub fn get_max_seq(&self, table: u32, group: GroupHash) -> Option<i64> {
        self.group_max.get(&GroupKey { table, group })
    }

    /// Record the max sequence for a group.
    pub fn set_max_seq(&self, table: u32, group: GroupHash, max_seq: i64) {
        self.group_max.put(GroupKey { table, group }, max_seq);
    }

    /// Atomically increment and return the next sequence number.
    ///
    /// Returns the 0 sentinel when the group is not warm; the caller must
    /// scan the table for the true max and write it back.
    pub fn next_seq(&self, table: u32, group: GroupHash) -> i64 {
        self.group_max.update(GroupKey { table, group }, |current| match current {
            Some(v) => (Some(v + 1), v + 1),
            None => (None, 0),
        })
    }

    /// Roll back a failed allocation: decrement only if the current value
    /// still equals `expected`.
    ///
    /// The guard keeps a rollback from clobbering a concurrent insert that
    /// raced ahead after our failed one; this is what preserves the
    /// "sequences form a contiguous run" invariant across failures.
    pub fn rollback_seq(&self, table: u32, group: GroupHash, expected: i64) -> bool {
        self.group_max.update(GroupKey { table, group }, |current| match current {
            Some(v) if v == expected => (Some(expected - 1), true),
            _ => (None, false),
        })
    }

    /// Cached sequence for a physical location.
    pub fn get_tid_seq(&self, table: u32, loc: RowLocation) -> Option<i64> {
        self.tid_seq.get(&TidKey { table, loc })
    }

    /// Record the sequence for a physical location.
    pub fn set_tid_seq(&self, table: u32, loc: RowLocation, seq: i64) {
        self.tid_seq.put(TidKey { table, loc }, seq);
    }

    /// Cached location for a (group, seq) pair.
    pub fn get_seq_tid(&self, table: u32, group: GroupHash, seq: i64) -> Option<RowLocation> {
        self.seq_tid.get(&GroupSeqKey { table, group, seq })
    }

    /// Record the location for a (group, seq) pair.
    pub fn set_seq_tid(&self, table: u32, group: GroupHash, seq: i64, loc: RowLocation) {
        self.seq_tid.put(GroupSeqKey { table, group, seq }, loc);
    }

    /// Drop every entry belonging to a table from all three caches.
    pub fn invalidate_table(&self, table: u32) {
        self.group_max.invalidate_table(table);
        self.tid_seq.invalidate_table(table);
        self.seq_tid.invalidate_table(table);
    }

    /// Counter snapshot across the three caches.
    pub fn stats(&self) -> SeqCacheStats {
        SeqCacheStats {
            group: self.group_max.stats(),
            tid: self.tid_seq.stats(),
            seq_tid: self.seq_tid.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caches() -> SeqCaches {
        SeqCaches::new(1, 1, 1)
    }

    fn hash(n: u64) -> GroupHash {
        GroupHash { h1: n, h2: n ^ 0xff }
    }

    #[test]
    fn cold_group_returns_sentinel() {
        let c = caches();
        assert_eq!(c.next_seq(1, hash(1)), 0);
        assert_eq!(c.get_max_seq(1, hash(1)), None);
    }

    #[test]
    fn warm_group_increments() {
        let c = caches();
        c.set_max_seq(1, hash(1), 5);
        assert_eq!(c.next_seq(1, hash(1)), 6);
        assert_eq!(c.next_seq(1, hash(1)), 7);
        assert_eq!(c.get_max_seq(1, hash(1)), Some(7));
    }

    #[test]
    fn rollback_only_when_expected_matches() {
        let c = caches();
        c.set_max_seq(1, hash(1), 5);
        let s = c.next_seq(1, hash(1));
        assert_eq!(s, 6);
        // A concurrent insert races ahead.
        let s2 = c.next_seq(1, hash(1));
        assert_eq!(s2, 7);
        // Our failed insert must not clobber the winner's allocation.
        assert!(!c.rollback_seq(1, hash(1), s));
        assert_eq!(c.get_max_seq(1, hash(1)), Some(7));
        // The winner's own rollback still works.
        assert!(c.rollback_seq(1, hash(1), s2));
        assert_eq!(c.get_max_seq(1, hash(1)), Some(6));
    }

    #[test]
    fn tid_and_seq_tid_round_trip() {
        let c = caches();
        let loc = RowLocation::new(3, 4);
        c.set_tid_seq(1, loc, 42);
        assert_eq!(c.get_tid_seq(1, loc), Some(42));
        c.set_seq_tid(1, hash(2), 42, loc);
        assert_eq!(c.get_seq_tid(1, hash(2), 42), Some(loc));
        assert_eq!(c.get_seq_tid(2, hash(2), 42), None);
    }

    #[test]
    fn invalidate_table_clears_all_three() {
        let c = caches();
        let loc = RowLocation::new(0, 0);
        c.set_max_seq(1, hash(1), 9);
        c.set_tid_seq(1, loc, 9);
        c.set_seq_tid(1, hash(1), 9, loc);
        c.set_max_seq(2, hash(1), 3);
        c.invalidate_table(1);
        assert_eq!(c.get_max_seq(1, hash(1)), None);
        assert_eq!(c.get_tid_seq(1, loc), None);
        assert_eq!(c.get_seq_tid(1, hash(1), 9), None);
        assert_eq!(c.get_max_seq(2, hash(1)), Some(3));
    }

    #[test]
    fn eviction_under_pressure_keeps_recent_entries() {
        let table = SeqTable::<GroupKey, i64>::with_size_mb(0);
        // with_size_mb(0) clamps to the 64-entry floor; overfill it.
        for i in 0..200u64 {
            table.put(
                GroupKey {
                    table: 1,
                    group: hash(i),
                },
                i as i64,
            );
        }
        assert!(table.stats().evictions > 0);
        assert_eq!(
            table.get(&GroupKey {
                table: 1,
                group: hash(199),
            }),
            Some(199)
        );
    }
}
