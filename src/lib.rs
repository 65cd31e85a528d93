//! # Restore Engine
//!
//! Incremental backup and ID-remapping restore for transactional,
//! immutable-history databases.
//!
//! The source's ordered transaction log is sliced into durable segments,
//! persisted to a byte-addressed store, and replayed into an empty target
//! instance of the same database family. Replay is the hard part: the
//! target assigns its own entity IDs, so every reference in the log is
//! remapped while preserving referential integrity, history, original
//! transaction timestamps, and per-transaction bookkeeping.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                            restore-engine                             │
//! │                                                                       │
//! │  source ──▶ Producer (backup) ──▶ SegmentStore ──▶ Consumer (restore) │
//! │             bounded ranges,       fs / object /    cursor CAS,        │
//! │             gap repair            mem / live-log   replay engine      │
//! │                                                         │             │
//! │                                     ┌───────────────────┴──────────┐  │
//! │                                     │ Replayer + EidCache          │  │
//! │                                     │ (LRU + eidx watermark)       │──┼─▶ target
//! │                                     └──────────────────────────────┘  │
//! │                                                                       │
//! │  RestoreDriver: prefetcher ──(bounded channel)──▶ applier, backoff    │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use restore_engine::{RestoreConfig, RestoreDriver, ReplayFilters};
//! use restore_engine::store::FsStore;
//! use std::sync::Arc;
//!
//! # async fn run(target: Arc<dyn restore_engine::database::TargetDatabase>) {
//! let config = RestoreConfig {
//!     db_name: "accounts".into(),
//!     ..Default::default()
//! };
//! let store = Arc::new(FsStore::new("/var/lib/backups").expect("store"));
//!
//! let mut driver = RestoreDriver::new(config, store, target, ReplayFilters::default())
//!     .expect("config");
//! driver.start().await.expect("start");
//!
//! // Runs until shutdown signal
//! driver.shutdown().await;
//! # }
//! ```

pub mod backup;
pub mod bookkeeping;
pub mod cache;
pub mod config;
pub mod database;
pub mod datom;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod replay;
pub mod resilience;
pub mod restore;
pub mod segment;
pub mod store;

// Re-exports for convenience
pub use backup::{backup_bulk, backup_next, backup_segment, gaps, repair, BulkReport};
pub use cache::EidCache;
pub use config::{BulkBackupConfig, RestoreConfig};
pub use database::{SourceDatabase, TargetDatabase, TxOp, TxReport};
pub use datom::{Datom, Eid, Keyword, LogTx, Value};
pub use driver::{DriverExit, DriverState, RestoreDriver};
pub use error::{RestoreError, Result};
pub use replay::{ReplayFilters, Replayer, TargetSchema};
pub use restore::{restore_segment, RestoreOutcome};
pub use segment::{Segment, SegmentInfo};
pub use store::{FsStore, LiveLogStore, MemStore, ObjectSegmentStore, SegmentStore};
