// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single-shot segment consumer.
//!
//! Locates the resume point in the target, loads the segment covering it,
//! and applies its transactions sequentially through the replay engine.
//! One call restores at most one segment; callers loop (or use the
//! [continuous driver](crate::driver)) to catch up further.
//!
//! # Outcomes
//!
//! | Outcome | Meaning |
//! |---------|---------|
//! | `RestoredSegment` | Every pending transaction of one segment applied |
//! | `NothingNewAvailable` | The store holds nothing past the cursor |
//! | `TransactionFailed` | A target transaction failed; cursor unchanged past the last success |
//! | `PartialSegment` | No stored segment covers the resume point (gap; repair and retry) |
//!
//! Invariant violations are not outcomes: they propagate as errors and
//! terminate the pipeline.

use crate::bookkeeping;
use crate::cache::EidCache;
use crate::config::RestoreConfig;
use crate::database::TargetDatabase;
use crate::datom::idents;
use crate::error::{RestoreError, Result};
use crate::replay::{ReplayFilters, Replayer, TargetSchema};
use crate::segment::Segment;
use crate::store::{find_covering, SegmentStore};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of one `restore_segment` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// One segment fully applied.
    RestoredSegment,
    /// The store holds nothing past the target's cursor.
    NothingNewAvailable,
    /// A target transaction failed; safe to retry once the cause clears.
    TransactionFailed,
    /// No stored segment covers the resume point. Repair gaps, then retry.
    PartialSegment,
}

impl RestoreOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreOutcome::RestoredSegment => "restored_segment",
            RestoreOutcome::NothingNewAvailable => "nothing_new_available",
            RestoreOutcome::TransactionFailed => "transaction_failed",
            RestoreOutcome::PartialSegment => "partial_segment",
        }
    }
}

/// Restore the next pending segment from the store into the target.
pub async fn restore_segment(
    store: &dyn SegmentStore,
    target: &dyn TargetDatabase,
    config: &RestoreConfig,
    filters: &ReplayFilters,
) -> Result<RestoreOutcome> {
    let db = &config.db_name;

    let t_last = read_cursor(target).await?;
    let desired_start = t_last + 1;

    // Cheap tip check before any loading.
    match store.last(db).await? {
        None => {
            debug!(db = %db, "Store is empty");
            crate::metrics::record_restore_outcome(db, "nothing_new_available");
            return Ok(RestoreOutcome::NothingNewAvailable);
        }
        Some(last) if last.end_t < desired_start => {
            debug!(db = %db, desired_start, last_end = last.end_t, "Caught up with store");
            crate::metrics::record_restore_outcome(db, "nothing_new_available");
            return Ok(RestoreOutcome::NothingNewAvailable);
        }
        Some(_) => {}
    }

    let list = store.list(db).await?;
    let Some(info) = find_covering(&list, desired_start) else {
        warn!(db = %db, desired_start, "No segment covers the resume point");
        crate::metrics::record_restore_outcome(db, "partial_segment");
        return Ok(RestoreOutcome::PartialSegment);
    };

    let load_start = Instant::now();
    let segment = store.load(db, info.start_t, info.end_t).await?;
    crate::metrics::record_segment_loaded(db, load_start.elapsed());

    let outcome = apply_segment(target, &segment, config, filters).await?;
    crate::metrics::record_restore_outcome(db, outcome.as_str());
    Ok(outcome)
}

/// Apply one already-loaded segment. This is the consumer half shared with
/// the continuous driver; the cursor is re-read from the target so a stale
/// prefetch can never replay history.
pub async fn apply_segment(
    target: &dyn TargetDatabase,
    segment: &Segment,
    config: &RestoreConfig,
    filters: &ReplayFilters,
) -> Result<RestoreOutcome> {
    let db = &config.db_name;

    let t_last = read_cursor(target).await?;
    let desired_start = t_last + 1;

    // First contact with an empty target: install the bookkeeping schema
    // before anything else can be replayed.
    if desired_start < 2 {
        ensure_bookkeeping(target, config).await?;
    }

    match segment.last_t() {
        Some(last_t) if last_t >= desired_start => {}
        _ => {
            debug!(
                db = %db,
                desired_start,
                start_t = segment.start_t,
                end_t = segment.end_t,
                "Segment holds nothing at or past the resume point"
            );
            return Ok(if segment.end_t < desired_start {
                RestoreOutcome::NothingNewAvailable
            } else {
                RestoreOutcome::PartialSegment
            });
        }
    }

    // Target schema facts only change when an attribute is installed, so one
    // snapshot per segment is enough, refreshed after each install.
    let mut schema = TargetSchema::snapshot(target).await?;

    let cache = EidCache::for_database(db);
    let replayer = Replayer::new(
        db.clone(),
        cache,
        filters.clone(),
        config.verify_probability,
        config.transact_timeout_duration(),
    );

    let mut prev_t = t_last;
    let mut applied = 0usize;
    for tx in segment.transactions.iter().filter(|tx| tx.t > t_last) {
        let apply_start = Instant::now();
        match replayer.replay(target, &schema, segment, prev_t, tx).await {
            Ok(outcome) => {
                crate::metrics::record_transaction_applied(db, apply_start.elapsed());
                crate::metrics::set_restore_cursor(db, outcome.t);
                prev_t = outcome.t;
                applied += 1;
                if outcome.installed_attribute {
                    debug!(db = %db, t = outcome.t, "Attribute installed, refreshing schema caches");
                    schema = TargetSchema::snapshot(target).await?;
                }
            }
            Err(e) if is_transaction_failure(&e) => {
                warn!(
                    db = %db,
                    t = tx.t,
                    applied,
                    error = %e,
                    "Transaction failed, aborting segment"
                );
                return Ok(RestoreOutcome::TransactionFailed);
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        db = %db,
        start_t = segment.start_t,
        end_t = segment.end_t,
        applied,
        "Segment restored"
    );
    Ok(RestoreOutcome::RestoredSegment)
}

/// Failures that abort the segment with the `TransactionFailed` outcome:
/// transient target errors (clear on retry) and structural rejections
/// (clear only once the input or filters change). Invariant violations and
/// store/codec errors propagate instead.
fn is_transaction_failure(e: &RestoreError) -> bool {
    matches!(
        e,
        RestoreError::Target(_)
            | RestoreError::TransactionRejected(_)
            | RestoreError::EmptyTransaction { .. }
            | RestoreError::MissingBookkeepingSchema
    )
}

async fn read_cursor(target: &dyn TargetDatabase) -> Result<u64> {
    target
        .last_source_t()
        .await
        .map(|t| t.unwrap_or(0))
        .map_err(|e| RestoreError::Target(e.to_string()))
}

/// Install the bookkeeping schema and seed the cursor, once.
async fn ensure_bookkeeping(target: &dyn TargetDatabase, config: &RestoreConfig) -> Result<()> {
    let present = target
        .has_attribute(&idents::ORIGINAL_ID)
        .await
        .map_err(|e| RestoreError::Target(e.to_string()))?;
    if present {
        return Ok(());
    }

    info!(db = %config.db_name, "Installing restore bookkeeping schema");
    let timeout = config.transact_timeout_duration();
    target
        .transact(bookkeeping::install_ops(), timeout)
        .await
        .map_err(|e| RestoreError::Target(format!("bookkeeping install: {}", e)))?;
    target
        .transact(bookkeeping::seed_cursor_ops(), timeout)
        .await
        .map_err(|e| RestoreError::Target(format!("cursor seed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_strings() {
        assert_eq!(RestoreOutcome::RestoredSegment.as_str(), "restored_segment");
        assert_eq!(
            RestoreOutcome::NothingNewAvailable.as_str(),
            "nothing_new_available"
        );
        assert_eq!(
            RestoreOutcome::TransactionFailed.as_str(),
            "transaction_failed"
        );
        assert_eq!(RestoreOutcome::PartialSegment.as_str(), "partial_segment");
    }

    #[test]
    fn test_transaction_failure_classification() {
        assert!(is_transaction_failure(&RestoreError::Target("busy".into())));
        assert!(is_transaction_failure(&RestoreError::TransactionRejected(
            "datom conflict".into()
        )));
        assert!(is_transaction_failure(&RestoreError::EmptyTransaction {
            t: 5
        }));
        assert!(is_transaction_failure(&RestoreError::MissingBookkeepingSchema));
        assert!(!is_transaction_failure(&RestoreError::InvariantViolation(
            "x".into()
        )));
        assert!(!is_transaction_failure(&RestoreError::CasMismatch {
            expected: 1,
            actual: 2
        }));
        assert!(!is_transaction_failure(&RestoreError::Codec("bad".into())));
    }
}
