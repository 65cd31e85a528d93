//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Segment production (written, repaired, bulk retries)
//! - Segment consumption (loaded, outcomes, transactions applied)
//! - ID-resolution cache effectiveness
//! - Verification probes
//! - Continuous-driver state and backoff
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `restore_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state,
//! histograms track distributions.
//!
//! # Usage
//!
//! ```rust,no_run
//! use restore_engine::metrics;
//! use std::time::Duration;
//!
//! // In the producer after writing a segment
//! metrics::record_segment_written("my-db", 1000);
//!
//! // In the consumer after a target transaction commits
//! metrics::record_transaction_applied("my-db", Duration::from_millis(40));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a segment written by the producer, with its transaction count.
pub fn record_segment_written(db: &str, txn_count: usize) {
    counter!("restore_segments_written_total", "db" => db.to_string()).increment(1);
    counter!("restore_backup_transactions_total", "db" => db.to_string())
        .increment(txn_count as u64);
}

/// Record a segment written while repairing a gap.
pub fn record_segment_repaired(db: &str) {
    counter!("restore_segments_repaired_total", "db" => db.to_string()).increment(1);
}

/// Record a bulk-backup retry of a failed range.
pub fn record_bulk_retry(db: &str) {
    counter!("restore_bulk_retries_total", "db" => db.to_string()).increment(1);
}

/// Record a segment loaded from the store for replay.
pub fn record_segment_loaded(db: &str, duration: Duration) {
    counter!("restore_segments_loaded_total", "db" => db.to_string()).increment(1);
    histogram!("restore_segment_load_duration_seconds", "db" => db.to_string())
        .record(duration.as_secs_f64());
}

/// Record one source transaction successfully applied to the target.
pub fn record_transaction_applied(db: &str, duration: Duration) {
    counter!("restore_transactions_applied_total", "db" => db.to_string()).increment(1);
    histogram!("restore_transaction_apply_duration_seconds", "db" => db.to_string())
        .record(duration.as_secs_f64());
}

/// Record the outcome of a single-shot restore call.
pub fn record_restore_outcome(db: &str, outcome: &str) {
    counter!(
        "restore_outcomes_total",
        "db" => db.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record the restore cursor position after a successful apply.
pub fn set_restore_cursor(db: &str, t: u64) {
    gauge!("restore_last_source_t", "db" => db.to_string()).set(t as f64);
}

/// Cache hit: the mapping was in the LRU.
pub fn record_cache_hit() {
    counter!("restore_cache_hits_total").increment(1);
}

/// Cache miss: below the watermark but not in the LRU (evicted or never
/// seen by this process).
pub fn record_cache_miss() {
    counter!("restore_cache_misses_total").increment(1);
}

/// Watermark short-circuit: the EID cannot exist on the target yet, so the
/// LRU and the target index were never consulted.
pub fn record_cache_shortcut() {
    counter!("restore_cache_shortcuts_total").increment(1);
}

/// An LRU entry was evicted to make room.
pub fn record_cache_eviction() {
    counter!("restore_cache_evictions_total").increment(1);
}

/// Record a sampled verification probe against the target's original-id
/// index, and whether it upheld the monotonic assumption.
pub fn record_verification_probe(db: &str, ok: bool) {
    let result = if ok { "ok" } else { "violation" };
    counter!(
        "restore_verification_probes_total",
        "db" => db.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

/// Record current continuous-driver state.
pub fn set_driver_state(state: &str) {
    gauge!("restore_driver_state", "state" => state.to_string()).set(1.0);
}

/// Record the driver's current error backoff delay.
pub fn record_backoff_delay(db: &str, delay: Duration) {
    gauge!("restore_backoff_delay_seconds", "db" => db.to_string()).set(delay.as_secs_f64());
}

/// Record prefetch channel depth (how far ahead of the applier we are).
pub fn set_prefetch_depth(db: &str, depth: usize) {
    gauge!("restore_prefetch_depth", "db" => db.to_string()).set(depth as f64);
}
