//! Segment store contract and backends.
//!
//! A store maps a database name to an ordered, gap-free sequence of segments
//! keyed by `(start_t, end_t)`. The engine consumes a small capability set;
//! everything about the byte layout is the backend's business:
//!
//! - [`FsStore`]: one file per segment in a local directory.
//! - [`ObjectSegmentStore`]: S3-style object store with a cheap
//!   last-segment hint sidecar.
//! - [`MemStore`]: in-memory, for tests and examples.
//! - [`LiveLogStore`]: pass-through presenting a live source connection as
//!   a read-only virtual store, for restore-without-backup topologies.
//!
//! `save` publishes atomically and is idempotent per `(start_t, end_t)`;
//! `list` is sorted by `start_t`; `last` is a hint that must agree with
//! `list().last()` whenever both are available.

mod fs;
mod memory;
mod object;
mod passthrough;

pub use fs::FsStore;
pub use memory::MemStore;
pub use object::ObjectSegmentStore;
pub use passthrough::LiveLogStore;

use crate::error::Result;
use crate::segment::{Segment, SegmentInfo};
use async_trait::async_trait;

/// Capability set the engine consumes from a segment store.
#[async_trait]
pub trait SegmentStore: Send + Sync {
    /// Atomically publish one segment. Re-publishing the same
    /// `(start_t, end_t)` is idempotent.
    async fn save(&self, db: &str, segment: &Segment) -> Result<()>;

    /// All segments for a database, sorted by `start_t`.
    async fn list(&self, db: &str) -> Result<Vec<SegmentInfo>>;

    /// Cheap newest-segment hint. Must equal `list(db).last()` when both
    /// are available. The default derives it from a full listing; backends
    /// with an O(1) pointer override it.
    async fn last(&self, db: &str) -> Result<Option<SegmentInfo>> {
        Ok(self.list(db).await?.last().copied())
    }

    /// Exact-match load by start position. A start of `0` means "first".
    async fn load_start(&self, db: &str, start_t: u64) -> Result<Segment>;

    /// Exact-match load by both bounds. Fails if the pair doesn't name a
    /// stored segment.
    async fn load(&self, db: &str, start_t: u64, end_t: u64) -> Result<Segment>;
}

/// Find the segment covering `t` in a sorted listing.
pub fn find_covering(list: &[SegmentInfo], t: u64) -> Option<SegmentInfo> {
    list.iter().find(|info| info.contains(t)).copied()
}
