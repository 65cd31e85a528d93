//! Segment producer: slices the source transaction log into durable,
//! numbered segments.
//!
//! Three entry points expose scheduling policies over one primitive:
//!
//! 1. [`backup_segment`]: write the segment for one half-open log range.
//!    Idempotent: re-writing a range publishes an identical segment.
//! 2. [`backup_next`]: resume from the last stored segment and write one
//!    more. Safe to call from a periodic driver.
//! 3. [`backup_bulk`]: partition everything up to the source tip into
//!    equal ranges and write them, optionally fanned out over concurrent
//!    tasks with bounded retries and an all-or-nothing failure mode.
//!
//! Gap detection and [`repair`] restore the no-gaps invariant after crashes
//! or operator mistakes; overlaps are logged but never repaired
//! automatically.

use crate::config::BulkBackupConfig;
use crate::database::SourceDatabase;
use crate::error::{RestoreError, Result};
use crate::resilience::{Bulkhead, RetryConfig};
use crate::segment::{Segment, SegmentInfo};
use crate::store::SegmentStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Summary of a bulk backup run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    /// Segments written (empty ranges write nothing).
    pub segments_written: usize,
    /// Transactions across all written segments.
    pub transactions: u64,
}

/// Materialize and publish the segment for `[start_t, end_t_exclusive)`.
///
/// The stored segment is keyed by the *observed* `[first_t, last_t]`, which
/// may be narrower than the requested range when the log is sparse. Returns
/// `None` when the range holds no transactions.
pub async fn backup_segment(
    source: &dyn SourceDatabase,
    store: &dyn SegmentStore,
    start_t: u64,
    end_t_exclusive: u64,
) -> Result<Option<SegmentInfo>> {
    Ok(write_range(source, store, start_t, end_t_exclusive)
        .await?
        .map(|(info, _)| info))
}

/// Write the next segment after the last stored one, bounded by `max_txns`.
/// Returns the number of transactions written (0 at the source tip).
pub async fn backup_next(
    source: &dyn SourceDatabase,
    store: &dyn SegmentStore,
    max_txns: u64,
) -> Result<u64> {
    let db = source.db_name();
    let start = match store.last(db).await? {
        Some(last) => last.end_t + 1,
        None => 1,
    };

    match write_range(source, store, start, start + max_txns).await? {
        Some((info, count)) => {
            debug!(db = %db, start_t = info.start_t, end_t = info.end_t, count, "Incremental segment written");
            Ok(count)
        }
        None => Ok(0),
    }
}

/// Back up everything from `starting_segment × txns_per_segment` through the
/// current source tip in equal-sized ranges.
///
/// With `parallel` enabled, ranges fan out over a [`JoinSet`] bounded by
/// `max_concurrency`. Each range retries transient failures up to the
/// [`RetryConfig::bulk`] budget; exhausting it poisons the run, which
/// short-circuits the remaining fan-out and fails the whole call with the
/// offending range.
pub async fn backup_bulk(
    source: Arc<dyn SourceDatabase>,
    store: Arc<dyn SegmentStore>,
    config: &BulkBackupConfig,
) -> Result<BulkReport> {
    config.validate()?;
    let db = source.db_name().to_string();
    let size = config.txns_per_segment;

    let tip = source
        .latest_t()
        .await
        .map_err(|e| RestoreError::Source(e.to_string()))?;
    let first = config.starting_segment * size + 1;
    if first > tip {
        debug!(db = %db, tip, first, "Nothing to back up");
        return Ok(BulkReport::default());
    }

    let ranges: Vec<(u64, u64)> = (first..=tip)
        .step_by(size as usize)
        .map(|start| (start, start + size))
        .collect();

    info!(
        db = %db,
        tip,
        ranges = ranges.len(),
        parallel = config.parallel,
        "Starting bulk backup"
    );

    let retry = RetryConfig::bulk();
    let poisoned = Arc::new(AtomicBool::new(false));

    if !config.parallel {
        let mut report = BulkReport::default();
        for (start, end) in ranges {
            let (written, txns) =
                backup_range_with_retry(&*source, &*store, start, end, &retry, &poisoned).await?;
            report.segments_written += written;
            report.transactions += txns;
        }
        return Ok(report);
    }

    let bulkhead = Arc::new(Bulkhead::new(config.max_concurrency));
    let mut join_set: JoinSet<Result<(usize, u64)>> = JoinSet::new();

    for (start, end) in ranges {
        let source = Arc::clone(&source);
        let store = Arc::clone(&store);
        let retry = retry.clone();
        let poisoned = Arc::clone(&poisoned);
        let bulkhead = Arc::clone(&bulkhead);

        join_set.spawn(async move {
            let _permit = bulkhead
                .acquire()
                .await
                .map_err(|e| RestoreError::Internal(e.to_string()))?;
            backup_range_with_retry(&*source, &*store, start, end, &retry, &poisoned).await
        });
    }

    let mut report = BulkReport::default();
    let mut first_error: Option<RestoreError> = None;
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok((written, txns))) => {
                report.segments_written += written;
                report.transactions += txns;
            }
            Ok(Err(e)) => {
                // Keep draining; the poisoned flag already short-circuits
                // the tasks that have not started their range yet.
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(RestoreError::Internal(format!("task panicked: {}", e)));
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            info!(
                db = %db,
                segments = report.segments_written,
                transactions = report.transactions,
                "Bulk backup complete"
            );
            Ok(report)
        }
    }
}

/// Gap ranges in the stored segment sequence, computed from the sorted
/// listing. Overlaps are logged but not reported as repairable.
pub async fn gaps(store: &dyn SegmentStore, db: &str) -> Result<Vec<SegmentInfo>> {
    let list = store.list(db).await?;
    let mut found = Vec::new();
    for pair in list.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if next.start_t > prev.end_t + 1 {
            found.push(SegmentInfo::new(prev.end_t + 1, next.start_t - 1));
        } else if next.start_t <= prev.end_t {
            warn!(
                db = %db,
                prev_end = prev.end_t,
                next_start = next.start_t,
                "Overlapping segments in store"
            );
        }
    }
    Ok(found)
}

/// Fill every gap by re-reading the missing ranges from the source.
/// Returns the number of segments written.
pub async fn repair(source: &dyn SourceDatabase, store: &dyn SegmentStore) -> Result<usize> {
    let db = source.db_name();
    let mut written = 0;
    for gap in gaps(store, db).await? {
        info!(db = %db, start_t = gap.start_t, end_t = gap.end_t, "Repairing gap");
        if backup_segment(source, store, gap.start_t, gap.end_t + 1)
            .await?
            .is_some()
        {
            crate::metrics::record_segment_repaired(db);
            written += 1;
        }
    }
    Ok(written)
}

async fn write_range(
    source: &dyn SourceDatabase,
    store: &dyn SegmentStore,
    start_t: u64,
    end_t_exclusive: u64,
) -> Result<Option<(SegmentInfo, u64)>> {
    let db = source.db_name();

    let transactions = source
        .log_range(start_t, end_t_exclusive)
        .await
        .map_err(|e| RestoreError::Source(e.to_string()))?;
    if transactions.is_empty() {
        return Ok(None);
    }

    let refs = source
        .ref_attr_eids()
        .await
        .map_err(|e| RestoreError::Source(e.to_string()))?;
    let id_to_attr = source
        .base_attr_idents()
        .await
        .map_err(|e| RestoreError::Source(e.to_string()))?;

    // Key by what the log actually contained, not what was asked for.
    let first_t = transactions.first().expect("non-empty").t;
    let last_t = transactions.last().expect("non-empty").t;
    let count = transactions.len() as u64;

    let segment = Segment {
        start_t: first_t,
        end_t: last_t,
        refs,
        id_to_attr,
        transactions,
    };
    store.save(db, &segment).await?;
    crate::metrics::record_segment_written(db, count as usize);

    Ok(Some((segment.info(), count)))
}

async fn backup_range_with_retry(
    source: &dyn SourceDatabase,
    store: &dyn SegmentStore,
    start_t: u64,
    end_t_exclusive: u64,
    retry: &RetryConfig,
    poisoned: &AtomicBool,
) -> Result<(usize, u64)> {
    let db = source.db_name();
    let mut attempt = 0;

    loop {
        if poisoned.load(Ordering::SeqCst) {
            return Err(RestoreError::Shutdown);
        }

        attempt += 1;
        match write_range(source, store, start_t, end_t_exclusive).await {
            Ok(Some((_, count))) => return Ok((1, count)),
            Ok(None) => return Ok((0, 0)),
            Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    db = %db,
                    start_t,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Segment backup failed, retrying"
                );
                crate::metrics::record_bulk_retry(db);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                poisoned.store(true, Ordering::SeqCst);
                warn!(db = %db, start_t, attempt, error = %e, "Segment backup failed permanently");
                return Err(RestoreError::Source(format!(
                    "range [{}, {}) failed after {} attempts: {}",
                    start_t, end_t_exclusive, attempt, e
                )));
            }
        }
    }
}
