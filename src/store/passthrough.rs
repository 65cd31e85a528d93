//! Live-log pass-through store.
//!
//! Presents a live source connection as a read-only virtual segment store, so
//! a consumer (or the continuous driver) can restore straight from the source
//! without a durable backup in between. The log is exposed as fixed-size
//! virtual chunks; nothing is ever written back (`save` always fails).

use crate::database::SourceDatabase;
use crate::error::{RestoreError, Result};
use crate::segment::{Segment, SegmentInfo};
use crate::store::SegmentStore;
use async_trait::async_trait;
use std::sync::Arc;

pub struct LiveLogStore {
    source: Arc<dyn SourceDatabase>,
    /// Width of each virtual segment, in log positions.
    chunk: u64,
}

impl LiveLogStore {
    pub fn new(source: Arc<dyn SourceDatabase>, chunk: u64) -> Result<Self> {
        if chunk == 0 {
            return Err(RestoreError::Config("chunk size must be > 0".to_string()));
        }
        Ok(Self { source, chunk })
    }

    fn check_db(&self, db: &str) -> Result<()> {
        if db != self.source.db_name() {
            return Err(RestoreError::store_msg(
                "live-log",
                format!(
                    "store is bound to {}, asked for {}",
                    self.source.db_name(),
                    db
                ),
            ));
        }
        Ok(())
    }

    async fn tip(&self) -> Result<u64> {
        self.source
            .latest_t()
            .await
            .map_err(|e| RestoreError::Source(e.to_string()))
    }

    /// Bounds of the virtual chunk containing `t`, clamped to the tip.
    fn chunk_bounds(&self, t: u64, tip: u64) -> SegmentInfo {
        let k = (t - 1) / self.chunk;
        SegmentInfo::new(k * self.chunk + 1, ((k + 1) * self.chunk).min(tip))
    }
}

#[async_trait]
impl SegmentStore for LiveLogStore {
    /// The pass-through is read-only.
    async fn save(&self, _db: &str, _segment: &Segment) -> Result<()> {
        Err(RestoreError::store_msg(
            "save",
            "live log store is read-only",
        ))
    }

    async fn list(&self, db: &str) -> Result<Vec<SegmentInfo>> {
        self.check_db(db)?;
        let tip = self.tip().await?;
        let mut infos = Vec::new();
        let mut start = 1;
        while start <= tip {
            infos.push(self.chunk_bounds(start, tip));
            start += self.chunk;
        }
        Ok(infos)
    }

    async fn last(&self, db: &str) -> Result<Option<SegmentInfo>> {
        self.check_db(db)?;
        let tip = self.tip().await?;
        if tip == 0 {
            return Ok(None);
        }
        Ok(Some(self.chunk_bounds(tip, tip)))
    }

    async fn load_start(&self, db: &str, start_t: u64) -> Result<Segment> {
        self.check_db(db)?;
        let tip = self.tip().await?;
        let start = if start_t == 0 { 1 } else { start_t };
        if start > tip {
            return Err(RestoreError::store_msg(
                "load",
                format!("start {} is past the log tip {}", start, tip),
            ));
        }
        let bounds = self.chunk_bounds(start, tip);
        self.load(db, start, bounds.end_t).await
    }

    async fn load(&self, db: &str, start_t: u64, end_t: u64) -> Result<Segment> {
        self.check_db(db)?;
        let transactions = self
            .source
            .log_range(start_t, end_t + 1)
            .await
            .map_err(|e| RestoreError::Source(e.to_string()))?;
        let refs = self
            .source
            .ref_attr_eids()
            .await
            .map_err(|e| RestoreError::Source(e.to_string()))?;
        let id_to_attr = self
            .source
            .base_attr_idents()
            .await
            .map_err(|e| RestoreError::Source(e.to_string()))?;

        // Virtual bounds are the requested ones, not the observed ones: the
        // consumer matches segments against its desired start position.
        Ok(Segment {
            start_t,
            end_t,
            refs,
            id_to_attr,
            transactions,
        })
    }
}
