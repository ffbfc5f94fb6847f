//! Error types and handling for patchstore
//!
//! This module defines all error types used throughout the engine,
//! optimized for zero-cost error propagation and clear diagnostics.

use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the patchstore engine
#[derive(Error, Debug)]
pub enum Error {
    /// Table configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// New row's order-by value is not strictly greater than the group max
    #[error("Version not increasing: {0}")]
    VersionNotIncreasing(String),

    /// Sequence allocation fell back to a scan and the scan failed
    #[error("Sequence allocation failed: {0}")]
    SequenceAllocFailed(String),

    /// Codec errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Stored delta chain is corrupted
    #[error("Data corrupted: {0}")]
    DataCorrupted(String),

    /// Operation not supported by an append-only store
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Host service errors (heap, WAL, transactions)
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// Internal invariant violations
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by the delta codec
#[derive(Error, Debug)]
pub enum CodecError {
    /// Encoding failed (allocation or entropy stage)
    #[error("Encode failed: {0}")]
    EncodeFailed(String),

    /// Delta payload could not be decoded against its base
    #[error("Corrupted delta: {0}")]
    CorruptedDelta(String),

    /// Delta header could not be parsed
    #[error("Corrupted header: {0}")]
    CorruptedHeader(String),

    /// Tag exceeds the supported range
    #[error("Tag {0} out of range")]
    TagOutOfRange(u64),
}

/// Errors raised by the modeled host services
#[derive(Error, Debug)]
pub enum HostError {
    /// Row location does not resolve to a live row
    #[error("Invalid row location: block {block}, offset {offset}")]
    InvalidLocation {
        /// Page number
        block: u32,
        /// Line pointer index within the page
        offset: u16,
    },

    /// Referenced table does not exist
    #[error("Unknown table: {0}")]
    UnknownTable(u32),

    /// Transaction is not active
    #[error("Transaction {0} is not active")]
    TransactionNotActive(u64),

    /// TOAST reference does not resolve
    #[error("Dangling TOAST reference: {0}")]
    DanglingToast(u64),

    /// Row payload failed to (de)serialize
    #[error("Row serialization: {0}")]
    RowSerialization(String),
}
