//! Prefetcher task: keeps the pipeline channel fed with loaded segments.
//!
//! Runs ahead of the applier by up to the channel capacity (backpressure:
//! `send` blocks when the applier falls behind). The `next_start_t` cursor is
//! advanced optimistically after each successful load; the applier resyncs
//! it from durable target state after every apply, so an overshoot from a
//! partially applied segment self-corrects.

use crate::driver::types::Fetched;
use crate::store::{find_covering, SegmentStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub(super) async fn run_prefetcher(
    store: Arc<dyn SegmentStore>,
    db: String,
    next_start: Arc<AtomicU64>,
    tx: mpsc::Sender<Fetched>,
    mut shutdown_rx: watch::Receiver<bool>,
    poll_interval: Duration,
) {
    info!(db = %db, "Prefetcher starting");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let next = next_start.load(Ordering::Acquire);
        let item = fetch_next(&*store, &db, next, &next_start).await;

        let sleep_after = !matches!(item, Fetched::Segment(_));
        // A blocked send is the backpressure point; shutdown still wins.
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            sent = tx.send(item) => {
                if sent.is_err() {
                    debug!(db = %db, "Applier gone, prefetcher exiting");
                    break;
                }
                crate::metrics::set_prefetch_depth(&db, tx.max_capacity() - tx.capacity());
            }
        }

        if sleep_after {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    info!(db = %db, "Prefetcher stopped");
    // Dropping `tx` closes the channel; the applier drains and exits.
}

async fn fetch_next(
    store: &dyn SegmentStore,
    db: &str,
    next: u64,
    next_start: &AtomicU64,
) -> Fetched {
    let last = match store.last(db).await {
        Ok(last) => last,
        Err(e) => {
            warn!(db = %db, error = %e, "Prefetcher failed to read store tip");
            return Fetched::Error;
        }
    };

    match last {
        Some(last) if last.end_t >= next => {}
        _ => return Fetched::CaughtUp,
    }

    // Resolve the enclosing segment, then load it.
    let info = match store.list(db).await {
        Ok(list) => match find_covering(&list, next) {
            Some(info) => info,
            None => {
                // Newer data exists but nothing covers the cursor: a gap the
                // producer has to repair. Surfaced as an error so the
                // applier backs off instead of spinning.
                warn!(db = %db, next, "No segment covers the cursor (gap in store)");
                return Fetched::Error;
            }
        },
        Err(e) => {
            warn!(db = %db, error = %e, "Prefetcher failed to list segments");
            return Fetched::Error;
        }
    };

    match store.load(db, info.start_t, info.end_t).await {
        Ok(segment) => {
            debug!(
                db = %db,
                start_t = segment.start_t,
                end_t = segment.end_t,
                "Prefetched segment"
            );
            next_start.store(segment.end_t + 1, Ordering::Release);
            Fetched::Segment(Box::new(segment))
        }
        Err(e) => {
            warn!(db = %db, start_t = info.start_t, error = %e, "Prefetcher failed to load segment");
            Fetched::Error
        }
    }
}
