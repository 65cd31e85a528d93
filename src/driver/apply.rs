//! Applier task: drains the pipeline channel and applies segments through
//! the single-shot consumer path.
//!
//! Owns the error backoff: consecutive failures walk the
//! [`RetryConfig::daemon`] schedule (with the configured floor and ceiling)
//! and any success resets it. After each apply the `next_start_t` cursor is
//! resynced from the target's durable `restore/last-source-t`: the
//! prefetcher's optimistic advance may have overshot a partial apply.

use crate::config::RestoreConfig;
use crate::database::TargetDatabase;
use crate::driver::types::{DriverExit, Fetched};
use crate::replay::ReplayFilters;
use crate::resilience::RetryConfig;
use crate::restore::{self, RestoreOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub(super) async fn run_applier(
    target: Arc<dyn TargetDatabase>,
    config: RestoreConfig,
    filters: ReplayFilters,
    mut rx: mpsc::Receiver<Fetched>,
    next_start: Arc<AtomicU64>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> DriverExit {
    let db = config.db_name.clone();
    let poll_interval = config.poll_interval_duration();
    let retry = RetryConfig {
        initial_delay: config.initial_retry_delay_duration(),
        max_delay: config.max_retry_delay_duration(),
        ..RetryConfig::daemon()
    };
    let mut consecutive_failures: usize = 0;

    info!(db = %db, "Applier starting");

    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!(db = %db, "Applier observed shutdown");
                    return DriverExit::Cancelled;
                }
                continue;
            }
            item = rx.recv() => item,
        };

        let Some(item) = item else {
            info!(db = %db, "Pipeline channel closed");
            return DriverExit::ChannelClosed;
        };

        match item {
            Fetched::Segment(segment) => {
                let result = restore::apply_segment(&*target, &segment, &config, &filters).await;
                // Whatever happened, durable target state is the authority
                // for where the prefetcher should read next.
                resync_cursor(&*target, &db, &next_start).await;

                match result {
                    Ok(RestoreOutcome::RestoredSegment) => {
                        consecutive_failures = 0;
                    }
                    Ok(RestoreOutcome::NothingNewAvailable) => {
                        // Stale prefetch from before a resync; harmless.
                        debug!(db = %db, "Prefetched segment already applied");
                        consecutive_failures = 0;
                    }
                    Ok(outcome) => {
                        let delay = next_backoff(&retry, &mut consecutive_failures, &db);
                        warn!(
                            db = %db,
                            outcome = outcome.as_str(),
                            delay_ms = delay.as_millis() as u64,
                            "Apply did not complete, backing off"
                        );
                        if sleep_or_shutdown(&mut shutdown_rx, delay).await {
                            return DriverExit::Cancelled;
                        }
                    }
                    Err(e) if e.is_retryable() => {
                        let delay = next_backoff(&retry, &mut consecutive_failures, &db);
                        warn!(db = %db, error = %e, "Transient apply failure, backing off");
                        if sleep_or_shutdown(&mut shutdown_rx, delay).await {
                            return DriverExit::Cancelled;
                        }
                    }
                    Err(e) => {
                        error!(db = %db, error = %e, "Fatal apply failure, terminating pipeline");
                        return DriverExit::Failed(e.to_string());
                    }
                }
            }
            Fetched::CaughtUp => {
                consecutive_failures = 0;
                if sleep_or_shutdown(&mut shutdown_rx, poll_interval).await {
                    return DriverExit::Cancelled;
                }
            }
            Fetched::Error => {
                let delay = next_backoff(&retry, &mut consecutive_failures, &db);
                if sleep_or_shutdown(&mut shutdown_rx, delay).await {
                    return DriverExit::Cancelled;
                }
            }
        }
    }
}

/// Advance the failure streak and return the daemon-schedule delay for it.
fn next_backoff(retry: &RetryConfig, failures: &mut usize, db: &str) -> Duration {
    *failures += 1;
    let delay = retry.delay_for_attempt(*failures);
    crate::metrics::record_backoff_delay(db, delay);
    delay
}

/// Sleep, waking early on shutdown. Returns `true` when shutdown fired.
async fn sleep_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_rx.changed() => *shutdown_rx.borrow(),
        _ = tokio::time::sleep(delay) => false,
    }
}

async fn resync_cursor(target: &dyn TargetDatabase, db: &str, next_start: &AtomicU64) {
    match target.last_source_t().await {
        Ok(t) => {
            let next = t.unwrap_or(0) + 1;
            let previous = next_start.swap(next, Ordering::AcqRel);
            if previous != next {
                debug!(db = %db, previous, next, "Resynced prefetch cursor from target");
            }
        }
        Err(e) => {
            // The next apply re-reads the cursor anyway; stale prefetches
            // only cost a redundant load.
            warn!(db = %db, error = %e, "Failed to resync cursor from target");
        }
    }
}
