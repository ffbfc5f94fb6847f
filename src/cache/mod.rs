//! Shared caches: reconstructed content, sequence lookups, insert bases
//!
//! All three caches are process-global, owned by the engine handle and
//! shared by every backend. They are advisory throughout: absence never
//! changes results, and every failure path degrades to reconstruction.

/// Striped LRU cache for reconstructed delta-column content
pub mod content;
/// Per-(table, group) FIFO of materialized delta bases
pub mod insert_fifo;
/// Linear-probe helpers shared by the open-addressed tables
pub mod probe;
/// Sequence lookup caches
pub mod seq;

pub use content::{ContentCacheStats, ContentKey, StripedContentCache};
pub use insert_fifo::{FifoBase, InsertFifo, InsertFifoStats};
pub use seq::{SeqCacheStats, SeqCaches};
