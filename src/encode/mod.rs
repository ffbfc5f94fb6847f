//! Parallel delta encoding

/// Lock-free encode worker pool
pub mod pool;

pub use pool::{EncodeOutcome, EncodePool, EncodeTask};
