//! In-memory segment store, indexed by start position.
//!
//! Test-only backend. Segments still pass through the wire codec on save and
//! load, so codec breakage shows up even in pure in-memory tests.

use crate::error::{RestoreError, Result};
use crate::segment::{Segment, SegmentInfo};
use crate::store::SegmentStore;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
pub struct MemStore {
    /// db name -> start_t -> (info, encoded bytes)
    inner: RwLock<HashMap<String, BTreeMap<u64, (SegmentInfo, Bytes)>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of segments stored for a database.
    pub fn segment_count(&self, db: &str) -> usize {
        self.inner.read().get(db).map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SegmentStore for MemStore {
    async fn save(&self, db: &str, segment: &Segment) -> Result<()> {
        let bytes = segment.encode()?;
        let mut inner = self.inner.write();
        inner
            .entry(db.to_string())
            .or_default()
            .insert(segment.start_t, (segment.info(), bytes));
        Ok(())
    }

    async fn list(&self, db: &str) -> Result<Vec<SegmentInfo>> {
        let inner = self.inner.read();
        Ok(inner
            .get(db)
            .map(|m| m.values().map(|(info, _)| *info).collect())
            .unwrap_or_default())
    }

    async fn load_start(&self, db: &str, start_t: u64) -> Result<Segment> {
        let bytes = {
            let inner = self.inner.read();
            let segments = inner
                .get(db)
                .ok_or_else(|| RestoreError::store_msg("load", format!("unknown db {}", db)))?;
            let entry = if start_t == 0 {
                segments.values().next()
            } else {
                segments.get(&start_t)
            };
            entry
                .map(|(_, bytes)| bytes.clone())
                .ok_or_else(|| {
                    RestoreError::store_msg("load", format!("no segment at start {}", start_t))
                })?
        };
        Segment::decode(&bytes)
    }

    async fn load(&self, db: &str, start_t: u64, end_t: u64) -> Result<Segment> {
        let segment = self.load_start(db, start_t).await?;
        if segment.end_t != end_t {
            return Err(RestoreError::store_msg(
                "load",
                format!(
                    "segment at start {} ends at {}, not {}",
                    start_t, segment.end_t, end_t
                ),
            ));
        }
        Ok(segment)
    }
}
