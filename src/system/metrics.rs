//! Metrics collection for the patchstore engine
//!
//! Prometheus counters for the hot paths, registered once per process
//! and incremented with minimal overhead. Cache-level counters live in
//! the caches themselves; this registry covers engine-level events.

use once_cell::sync::Lazy;
use prometheus::{IntCounter, Registry};

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Engine-level counters.
pub struct Metrics {
    /// Rows inserted
    pub inserts: IntCounter,
    /// Keyframe rows among them
    pub keyframes: IntCounter,
    /// Delete statements executed
    pub deletes: IntCounter,
    /// Rows removed by cascades
    pub cascade_deleted_rows: IntCounter,
    /// Candidate batches dispatched to the encode pool
    pub encode_batches: IntCounter,
    /// Candidate encodes across all batches
    pub encode_candidates: IntCounter,
}

impl Metrics {
    fn new() -> prometheus::Result<Self> {
        let inserts = IntCounter::new("ps_inserts_total", "Total rows inserted")?;
        let keyframes = IntCounter::new("ps_keyframes_total", "Total keyframe rows written")?;
        let deletes = IntCounter::new("ps_deletes_total", "Total delete statements")?;
        let cascade_deleted_rows =
            IntCounter::new("ps_cascade_deleted_rows_total", "Rows removed by cascade deletes")?;
        let encode_batches =
            IntCounter::new("ps_encode_batches_total", "Candidate batches dispatched")?;
        let encode_candidates =
            IntCounter::new("ps_encode_candidates_total", "Candidate encodes executed")?;

        for collector in [
            &inserts,
            &keyframes,
            &deletes,
            &cascade_deleted_rows,
            &encode_batches,
            &encode_candidates,
        ] {
            REGISTRY.register(Box::new(collector.clone()))?;
        }

        Ok(Self {
            inserts,
            keyframes,
            deletes,
            cascade_deleted_rows,
            encode_batches,
            encode_candidates,
        })
    }

    /// The process-global metrics instance.
    pub fn global() -> &'static Metrics {
        static INSTANCE: Lazy<Metrics> = Lazy::new(|| {
            Metrics::new().expect("Failed to initialize metrics")
        });
        &INSTANCE
    }
}

/// The registry backing the engine's metrics (for scrape endpoints).
pub fn registry() -> &'static Registry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let before = Metrics::global().inserts.get();
        Metrics::global().inserts.inc();
        assert_eq!(Metrics::global().inserts.get(), before + 1);
    }
}
