//! Shared striped LRU cache for reconstructed content
//!
//! Caches the decoded bytes of delta columns so repeated reads do not walk
//! the delta chain again. The cache is partitioned into independent
//! stripes; key hash picks the stripe, and all work after dispatch is
//! stripe-local under that stripe's readers-writer lock.
//!
//! Per stripe: an open-addressed entry table with tombstones, a doubly
//! linked LRU threaded through entry indices, and a pool of fixed-size
//! content slots chained through a side table. The cache is strictly
//! advisory: every failure path returns silently and the engine falls
//! back to reconstruction.

use crate::cache::probe::{self, SlotState};
use crate::core::hash::GroupHash;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Key of one cached content entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentKey {
    /// Table id
    pub table: u32,
    /// 128-bit group hash
    pub group: GroupHash,
    /// Sequence number within the group
    pub seq: i64,
    /// Delta column position in the schema
    pub column: u16,
}

impl ContentKey {
    fn fold32(&self) -> u32 {
        let mut h: u32 = 2166136261;
        for part in [
            self.table,
            self.group.h1 as u32,
            (self.group.h1 >> 32) as u32,
            self.group.h2 as u32,
            (self.group.h2 >> 32) as u32,
            self.seq as u32,
            (self.seq >> 32) as u32,
            u32::from(self.column),
        ] {
            h ^= part;
            h = h.wrapping_mul(16777619);
        }
        h
    }
}

const NIL: i32 = -1;

#[derive(Debug, Clone, Copy)]
struct Entry {
    key: ContentKey,
    slot_index: i32,
    content_size: u32,
    lru_prev: i32,
    lru_next: i32,
    in_use: bool,
    tombstone: bool,
}

impl Entry {
    fn vacant() -> Self {
        Entry {
            key: ContentKey {
                table: 0,
                group: GroupHash::ZERO,
                seq: 0,
                column: 0,
            },
            slot_index: NIL,
            content_size: 0,
            lru_prev: NIL,
            lru_next: NIL,
            in_use: false,
            tombstone: false,
        }
    }

    fn probe_state(&self, key: &ContentKey) -> SlotState {
        if self.in_use {
            if self.key == *key {
                SlotState::Match
            } else {
                SlotState::Other
            }
        } else if self.tombstone {
            SlotState::Tombstone
        } else {
            SlotState::Empty
        }
    }
}

struct StripeState {
    entries: Vec<Entry>,
    lru_head: i32,
    lru_tail: i32,
    num_entries: usize,
    /// Content slot pool: `slot_bytes`-sized chunks of `pool`.
    pool: Vec<u8>,
    /// Next-slot chain; doubles as the free list.
    slot_next: Vec<i32>,
    free_slot_head: i32,
}

struct Stripe {
    state: RwLock<StripeState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    skips: AtomicU64,
}

/// Counters snapshot across all stripes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentCacheStats {
    /// Live entries
    pub entries: u64,
    /// Lookup hits
    pub hits: u64,
    /// Lookup misses
    pub misses: u64,
    /// LRU evictions
    pub evictions: u64,
    /// Puts rejected by the per-entry size cap
    pub skips: u64,
}

/// Shared striped LRU content cache.
pub struct StripedContentCache {
    stripes: Vec<Stripe>,
    slot_bytes: usize,
    max_entry_bytes: usize,
    oversize_warned: AtomicBool,
}

impl StripedContentCache {
    /// Build the cache from engine tunables.
    ///
    /// The byte budget is split evenly across stripes; whatever a stripe's
    /// share leaves after its entry table becomes content slots.
    pub fn new(size_mb: usize, num_stripes: usize, slot_kb: usize, max_entries: usize, max_entry_kb: usize) -> Self {
        let slot_bytes = slot_kb * 1024;
        let entries_per_stripe =
            (max_entries / num_stripes).max(crate::constants::MIN_ENTRIES_PER_STRIPE);
        let stripe_budget = size_mb * 1024 * 1024 / num_stripes;
        let entry_overhead = entries_per_stripe * std::mem::size_of::<Entry>();
        let slots_per_stripe = stripe_budget.saturating_sub(entry_overhead).max(slot_bytes) / slot_bytes;

        let stripes = (0..num_stripes)
            .map(|_| Stripe {
                state: RwLock::new(StripeState::new(entries_per_stripe, slots_per_stripe, slot_bytes)),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                skips: AtomicU64::new(0),
            })
            .collect();

        tracing::debug!(
            stripes = num_stripes,
            entries_per_stripe,
            slots_per_stripe,
            slot_bytes,
            "content cache initialized"
        );

        Self {
            stripes,
            slot_bytes,
            max_entry_bytes: max_entry_kb * 1024,
            oversize_warned: AtomicBool::new(false),
        }
    }

    fn stripe_for(&self, key: &ContentKey) -> &Stripe {
        let idx = key.fold32() as usize % self.stripes.len();
        &self.stripes[idx]
    }

    /// Look up cached content, returning a copy in caller memory.
    ///
    /// A hit also moves the entry to the LRU head. The touch needs the
    /// exclusive lock, so the shared lock is released and re-acquired
    /// exclusively; the entry identity is re-validated by full key compare
    /// before re-linking, and a lost race simply skips the touch.
    pub fn get(&self, key: &ContentKey) -> Option<Vec<u8>> {
        let stripe = self.stripe_for(key);
        let start = key.fold32();

        let (result, entry_idx) = {
            let state = stripe.state.read();
            let len = state.entries.len();
            match probe::probe_for_read(len, start % len as u32, |i| state.entries[i].probe_state(key)) {
                Some(idx) => {
                    let entry = &state.entries[idx];
                    (Some(state.copy_out(entry, self.slot_bytes)), idx)
                }
                None => (None, 0),
            }
        };

        match result {
            Some(content) => {
                stripe.hits.fetch_add(1, Ordering::Relaxed);
                let mut state = stripe.state.write();
                // Another backend may have evicted and reused the entry
                // between the two lock holds; only touch it if the key
                // still matches.
                if state.entries[entry_idx].in_use && state.entries[entry_idx].key == *key {
                    state.lru_unlink(entry_idx);
                    state.lru_push_front(entry_idx);
                }
                Some(content)
            }
            None => {
                stripe.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store content under a key.
    ///
    /// Evicts from the LRU tail until enough slots and a table position
    /// are free. Content over the per-entry cap, or content the stripe
    /// cannot fit even after evicting everything, is dropped silently.
    pub fn put(&self, key: &ContentKey, content: &[u8]) {
        if content.len() > self.max_entry_bytes {
            self.stripes[0].skips.fetch_add(1, Ordering::Relaxed);
            if !self.oversize_warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    size = content.len(),
                    limit = self.max_entry_bytes,
                    "content exceeds cache entry size cap; raising max_entry_kb would cache it"
                );
            } else {
                tracing::debug!(size = content.len(), "content cache skip (size cap)");
            }
            return;
        }

        let stripe = self.stripe_for(key);
        let start = key.fold32();
        let slots_needed = content.len().div_ceil(self.slot_bytes).max(1);

        let mut state = stripe.state.write();
        let len = state.entries.len();

        if let Some(idx) = probe::probe_for_read(len, start % len as u32, |i| state.entries[i].probe_state(key)) {
            // Already cached: just touch the LRU.
            state.lru_unlink(idx);
            state.lru_push_front(idx);
            return;
        }

        let mut first_slot = state.alloc_slots(slots_needed);
        while first_slot == NIL && state.num_entries > 0 {
            state.evict_lru(&stripe.evictions);
            first_slot = state.alloc_slots(slots_needed);
        }
        if first_slot == NIL {
            return;
        }

        let mut entry_idx =
            probe::probe_for_write(len, start % len as u32, |i| state.entries[i].probe_state(key));
        while entry_idx.is_none() && state.num_entries > 0 {
            state.evict_lru(&stripe.evictions);
            entry_idx =
                probe::probe_for_write(len, start % len as u32, |i| state.entries[i].probe_state(key));
        }
        let Some(entry_idx) = entry_idx else {
            state.free_slots(first_slot);
            return;
        };

        state.copy_in(first_slot, content, self.slot_bytes);
        let entry = &mut state.entries[entry_idx];
        entry.key = *key;
        entry.slot_index = first_slot;
        entry.content_size = content.len() as u32;
        entry.in_use = true;
        entry.tombstone = false;
        state.lru_push_front(entry_idx);
        state.num_entries += 1;
    }

    /// Drop every entry belonging to a table, leaving tombstones so probe
    /// chains through the removed entries stay intact.
    pub fn invalidate_table(&self, table: u32) {
        for stripe in &self.stripes {
            let mut state = stripe.state.write();
            for idx in 0..state.entries.len() {
                if state.entries[idx].in_use && state.entries[idx].key.table == table {
                    state.lru_unlink(idx);
                    let slot = state.entries[idx].slot_index;
                    if slot != NIL {
                        state.free_slots(slot);
                    }
                    let entry = &mut state.entries[idx];
                    entry.in_use = false;
                    entry.tombstone = true;
                    entry.slot_index = NIL;
                    entry.content_size = 0;
                    state.num_entries -= 1;
                }
            }
        }
    }

    /// Counters snapshot across all stripes.
    pub fn stats(&self) -> ContentCacheStats {
        let mut out = ContentCacheStats::default();
        for stripe in &self.stripes {
            out.entries += stripe.state.read().num_entries as u64;
            out.hits += stripe.hits.load(Ordering::Relaxed);
            out.misses += stripe.misses.load(Ordering::Relaxed);
            out.evictions += stripe.evictions.load(Ordering::Relaxed);
            out.skips += stripe.skips.load(Ordering::Relaxed);
        }
        out
    }
}

impl StripeState {
    fn new(num_entries: usize, num_slots: usize, slot_bytes: usize) -> Self {
        let mut slot_next = vec![NIL; num_slots];
        for i in 0..num_slots.saturating_sub(1) {
            slot_next[i] = (i + 1) as i32;
        }
        Self {
            entries: vec![Entry::vacant(); num_entries],
            lru_head: NIL,
            lru_tail: NIL,
            num_entries: 0,
            pool: vec![0; num_slots * slot_bytes],
            slot_next,
            free_slot_head: if num_slots > 0 { 0 } else { NIL },
        }
    }

    fn alloc_slots(&mut self, count: usize) -> i32 {
        let mut first = NIL;
        let mut prev = NIL;
        for _ in 0..count {
            let slot = self.free_slot_head;
            if slot == NIL {
                // Not enough slots: put back what we took.
                if first != NIL {
                    self.free_slots(first);
                }
                return NIL;
            }
            self.free_slot_head = self.slot_next[slot as usize];
            self.slot_next[slot as usize] = NIL;
            if first == NIL {
                first = slot;
            } else {
                self.slot_next[prev as usize] = slot;
            }
            prev = slot;
        }
        first
    }

    fn free_slots(&mut self, mut first: i32) {
        while first != NIL {
            let next = self.slot_next[first as usize];
            self.slot_next[first as usize] = self.free_slot_head;
            self.free_slot_head = first;
            first = next;
        }
    }

    fn copy_in(&mut self, mut slot: i32, content: &[u8], slot_bytes: usize) {
        let mut src = content;
        while !src.is_empty() && slot != NIL {
            let take = src.len().min(slot_bytes);
            let base = slot as usize * slot_bytes;
            self.pool[base..base + take].copy_from_slice(&src[..take]);
            src = &src[take..];
            slot = self.slot_next[slot as usize];
        }
    }

    fn copy_out(&self, entry: &Entry, slot_bytes: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(entry.content_size as usize);
        let mut remaining = entry.content_size as usize;
        let mut slot = entry.slot_index;
        while remaining > 0 && slot != NIL {
            let take = remaining.min(slot_bytes);
            let base = slot as usize * slot_bytes;
            out.extend_from_slice(&self.pool[base..base + take]);
            remaining -= take;
            slot = self.slot_next[slot as usize];
        }
        out
    }

    fn lru_unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let e = &self.entries[idx];
            (e.lru_prev, e.lru_next)
        };
        if prev != NIL {
            self.entries[prev as usize].lru_next = next;
        } else if self.lru_head == idx as i32 {
            self.lru_head = next;
        }
        if next != NIL {
            self.entries[next as usize].lru_prev = prev;
        } else if self.lru_tail == idx as i32 {
            self.lru_tail = prev;
        }
        self.entries[idx].lru_prev = NIL;
        self.entries[idx].lru_next = NIL;
    }

    fn lru_push_front(&mut self, idx: usize) {
        self.entries[idx].lru_prev = NIL;
        self.entries[idx].lru_next = self.lru_head;
        if self.lru_head != NIL {
            self.entries[self.lru_head as usize].lru_prev = idx as i32;
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
        let slot = self.entries[idx].slot_index;
        if slot != NIL {
            self.free_slots(slot);
        }
        // Tombstone, not empty: probe chains through this position must
        // keep working.
        let entry = &mut self.entries[idx];
        entry.in_use = false;
        entry.tombstone = true;
        entry.slot_index = NIL;
        entry.content_size = 0;
        self.num_entries -= 1;
        evictions.fetch_add(1, Ordering::Relaxed);
    }
}
