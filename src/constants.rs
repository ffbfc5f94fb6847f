//! Global constants used throughout the patchstore codebase
//!
//! This module contains compile-time constants that are shared across
//! multiple modules to ensure consistency and avoid magic numbers.

/// Reserved delta tag marking a keyframe (self-contained encoding).
pub const KEYFRAME_TAG: u16 = 0;

/// Maximum compression depth (delta tags 1..=65535).
///
/// Tags 0-14 fit in the 4-bit header nibble with zero overhead; larger
/// tags spill into a varint extension.
pub const MAX_COMPRESS_DEPTH: u16 = u16::MAX;

/// Default keyframe period: every K-th row in a group is self-contained.
pub const DEFAULT_KEYFRAME_EVERY: i64 = 100;

/// Default compression depth (how many previous versions to try as bases).
pub const DEFAULT_COMPRESS_DEPTH: u16 = 1;

/// Default size of the shared content cache in MiB.
pub const DEFAULT_CACHE_SIZE_MB: usize = 64;

/// Upper bound for the content cache size in MiB.
pub const MAX_CACHE_SIZE_MB: usize = 1024;

/// Default number of content cache stripes.
pub const DEFAULT_CACHE_STRIPES: usize = 32;

/// Default content slot size in KiB.
pub const DEFAULT_CACHE_SLOT_KB: usize = 4;

/// Default maximum number of content cache entries across all stripes.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 65536;

/// Default per-entry size cap in KiB; larger content bypasses the cache.
pub const DEFAULT_CACHE_MAX_ENTRY_KB: usize = 256;

/// Minimum entries per content cache stripe.
pub const MIN_ENTRIES_PER_STRIPE: usize = 64;

/// Default size of each sequence sub-cache in MiB.
pub const DEFAULT_SEQ_CACHE_SIZE_MB: usize = 8;

/// Default number of FIFO insert cache slots.
pub const DEFAULT_INSERT_CACHE_SLOTS: usize = 16;

/// Maximum delta columns per table.
pub const MAX_DELTA_COLUMNS: usize = 32;

/// Default number of encode worker threads (0 = sequential encoding).
pub const DEFAULT_ENCODE_THREADS: usize = 0;

/// Maximum number of encode worker threads.
pub const MAX_ENCODE_THREADS: usize = 64;

/// Byte budget of one heap page.
pub const PAGE_SIZE: usize = 8192;

/// Attribute values larger than this are moved to the TOAST side store.
pub const TOAST_THRESHOLD: usize = 2032;

/// Name of the hidden per-group sequence column.
pub const SEQ_COLUMN: &str = "_ps_seq";
