//! Group statistics
//!
//! Inserts accumulate per-group counters in a per-transaction map and
//! flush them into the persistent store at pre-commit; aborts discard
//! the map. Deletes cannot decrement accurately (sizes are unknown after
//! a cascade), so the delete path recomputes the affected groups by a
//! bounded rescan instead.

/// Per-transaction accumulator
pub mod accumulator;
/// Persistent per-group stats store
pub mod store;

pub use accumulator::StatsAccumulator;
pub use store::{GroupStatsRow, StatsStore, TableStats};
