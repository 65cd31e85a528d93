// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Continuous restore driver.
//!
//! Keeps a replica current with its source by running two cooperative tasks
//! over a bounded channel:
//!
//! - The **prefetcher** polls the segment store from a shared `next_start_t`
//!   cursor and pushes loaded segments (or `CaughtUp`/`Error` markers).
//! - The **applier** drains the channel, applies segments through the
//!   single-shot consumer path, resyncs the cursor from durable target
//!   state, and owns the exponential error backoff.
//!
//! ```text
//! ┌────────────┐  bounded mpsc (cap 5)  ┌────────────┐
//! │ Prefetcher │ ─────────────────────▶ │  Applier   │──▶ target
//! │ (store)    │   Segment/CaughtUp/    │ (replay)   │
//! └────────────┘   Error markers        └────────────┘
//!        ▲                                    │
//!        └──────── next_start_t resync ───────┘
//! ```
//!
//! # Shutdown
//!
//! Both tasks observe a shared `watch` flag, checked between channel
//! operations and inside every sleep. The applier exits with a final
//! [`DriverExit`]; the prefetcher closes the channel on its way out. The
//! driver never exits on its own except on cancellation, channel close, or
//! an invariant violation.

mod apply;
mod prefetch;
mod types;

pub use types::{DriverExit, DriverState, Fetched};

use crate::config::RestoreConfig;
use crate::database::TargetDatabase;
use crate::error::{RestoreError, Result};
use crate::replay::ReplayFilters;
use crate::store::SegmentStore;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// The continuous restore driver for one source database.
pub struct RestoreDriver {
    config: RestoreConfig,
    filters: ReplayFilters,
    store: Arc<dyn SegmentStore>,
    target: Arc<dyn TargetDatabase>,

    state_tx: watch::Sender<DriverState>,
    state_rx: watch::Receiver<DriverState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    prefetch_handle: Option<tokio::task::JoinHandle<()>>,
    apply_handle: Option<tokio::task::JoinHandle<DriverExit>>,
}

impl RestoreDriver {
    /// Create a driver. Validates the configuration; nothing runs until
    /// [`start()`](Self::start).
    pub fn new(
        config: RestoreConfig,
        store: Arc<dyn SegmentStore>,
        target: Arc<dyn TargetDatabase>,
        filters: ReplayFilters,
    ) -> Result<Self> {
        config.validate()?;
        let (state_tx, state_rx) = watch::channel(DriverState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config,
            filters,
            store,
            target,
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            prefetch_handle: None,
            apply_handle: None,
        })
    }

    /// Current driver state.
    pub fn state(&self) -> DriverState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<DriverState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state() == DriverState::Running
    }

    /// Start the prefetcher and applier tasks.
    ///
    /// The shared `next_start_t` cursor is seeded from the target's durable
    /// cursor, so a restarted driver resumes exactly where the replica
    /// stopped.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != DriverState::Created {
            return Err(RestoreError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        let db = self.config.db_name.clone();
        let cursor = self
            .target
            .last_source_t()
            .await
            .map_err(|e| RestoreError::Target(e.to_string()))?
            .unwrap_or(0);
        let next_start = Arc::new(AtomicU64::new(cursor + 1));

        info!(
            db = %db,
            resume_from = cursor + 1,
            prefetch_buffer = self.config.prefetch_buffer,
            "Starting continuous restore"
        );

        let (tx, rx) = mpsc::channel(self.config.prefetch_buffer);

        self.prefetch_handle = Some(tokio::spawn(prefetch::run_prefetcher(
            Arc::clone(&self.store),
            db.clone(),
            Arc::clone(&next_start),
            tx,
            self.shutdown_rx.clone(),
            self.config.poll_interval_duration(),
        )));

        self.apply_handle = Some(tokio::spawn(apply::run_applier(
            Arc::clone(&self.target),
            self.config.clone(),
            self.filters.clone(),
            rx,
            next_start,
            self.shutdown_rx.clone(),
        )));

        let _ = self.state_tx.send(DriverState::Running);
        crate::metrics::set_driver_state("Running");
        Ok(())
    }

    /// Wait for the applier to exit on its own (channel close or invariant
    /// violation). Does not signal shutdown.
    pub async fn wait(&mut self) -> DriverExit {
        let exit = match self.apply_handle.take() {
            Some(handle) => handle.await.unwrap_or(DriverExit::ChannelClosed),
            None => DriverExit::ChannelClosed,
        };
        self.finish().await;
        exit
    }

    /// Gracefully stop both tasks and return the applier's final status.
    pub async fn shutdown(&mut self) -> DriverExit {
        info!(db = %self.config.db_name, "Shutting down continuous restore");
        let _ = self.state_tx.send(DriverState::ShuttingDown);
        crate::metrics::set_driver_state("ShuttingDown");
        let _ = self.shutdown_tx.send(true);

        let exit = match self.apply_handle.take() {
            Some(handle) => match handle.await {
                Ok(exit) => exit,
                Err(e) => {
                    warn!(error = %e, "Applier panicked during shutdown");
                    DriverExit::Cancelled
                }
            },
            None => DriverExit::Cancelled,
        };

        self.finish().await;
        exit
    }

    async fn finish(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.prefetch_handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Prefetcher panicked during shutdown");
            }
        }
        let _ = self.state_tx.send(DriverState::Stopped);
        crate::metrics::set_driver_state("Stopped");
        info!(db = %self.config.db_name, "Continuous restore stopped");
    }
}
