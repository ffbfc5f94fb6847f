//! Patchstore - an embedded append-only table engine with inter-row
//! delta compression
//!
//! Versioned rows store their large columns as binary patches against
//! previous versions of the same group: each insert encodes the new
//! content against one or more recent bases and keeps the smallest
//! result, with periodic keyframes bounding chain length. Readers
//! transparently reconstruct full values by walking the chain back,
//! backed by a striped content cache, sequence lookup caches and a
//! per-group FIFO of materialized bases. Encoding candidates run on a
//! lock-free worker pool.
#![warn(missing_docs)]

// Core foundational modules
pub mod constants;
pub mod core;
pub mod types;

// Engine modules
pub mod cache;
pub mod codec;
pub mod encode;
pub mod engine;
pub mod host;
pub mod introspect;
pub mod stats;
pub mod system;
pub mod tam;

// Re-export commonly used items for convenience
pub use crate::core::{EngineConfig, Error, Result, TableOptions};
pub use engine::{Engine, Txn};
pub use tam::Table;
pub use types::{ColumnDef, ColumnType, Schema, Value};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize tracing for an embedding host that has no subscriber of
/// its own. Library use does not require calling this.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    tracing::info!("Initializing {} v{}", NAME, VERSION);
}
