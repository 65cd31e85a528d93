//! Filesystem segment store.
//!
//! One file per segment, basename `"{db}.{start}-{end}.seg.zst"`, all in a
//! single root directory. Listing is a directory scan filtered by filename
//! shape; publish is atomic via a temp file and rename on the same
//! filesystem.

use crate::error::{RestoreError, Result};
use crate::segment::{Segment, SegmentInfo};
use crate::store::SegmentStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SEGMENT_SUFFIX: &str = ".seg.zst";

#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Fails with a configuration error when the directory cannot be created
    /// or written.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| RestoreError::Config(format!("cannot create {}: {}", root.display(), e)))?;

        // Probe writability up front so misconfiguration fails at
        // construction, not on the first segment hours later.
        let probe = root.join(".write-probe");
        std::fs::write(&probe, b"")
            .and_then(|_| std::fs::remove_file(&probe))
            .map_err(|e| {
                RestoreError::Config(format!("directory {} not writable: {}", root.display(), e))
            })?;

        Ok(Self { root })
    }

    fn file_name(db: &str, info: SegmentInfo) -> String {
        format!("{}.{}-{}{}", db, info.start_t, info.end_t, SEGMENT_SUFFIX)
    }

    fn path_for(&self, db: &str, info: SegmentInfo) -> PathBuf {
        self.root.join(Self::file_name(db, info))
    }

    /// Parse `"{db}.{start}-{end}.seg.zst"` back into a `SegmentInfo`,
    /// filtering for one database name.
    fn parse_file_name(db: &str, name: &str) -> Option<SegmentInfo> {
        let rest = name.strip_prefix(db)?.strip_prefix('.')?;
        let range = rest.strip_suffix(SEGMENT_SUFFIX)?;
        let (start, end) = range.split_once('-')?;
        let start_t: u64 = start.parse().ok()?;
        let end_t: u64 = end.parse().ok()?;
        (start_t <= end_t).then_some(SegmentInfo::new(start_t, end_t))
    }
}

#[async_trait]
impl SegmentStore for FsStore {
    async fn save(&self, db: &str, segment: &Segment) -> Result<()> {
        let bytes = segment.encode()?;
        let path = self.path_for(db, segment.info());
        let tmp = path.with_extension("tmp");

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| RestoreError::store_msg("save", format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| RestoreError::store_msg("save", format!("{}: {}", path.display(), e)))?;

        debug!(db = %db, start_t = segment.start_t, end_t = segment.end_t, "Segment written");
        Ok(())
    }

    async fn list(&self, db: &str) -> Result<Vec<SegmentInfo>> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| RestoreError::store_msg("list", e.to_string()))?;

        let mut infos = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| RestoreError::store_msg("list", e.to_string()))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(info) = Self::parse_file_name(db, name) {
                infos.push(info);
            }
        }
        infos.sort();
        Ok(infos)
    }

    async fn load_start(&self, db: &str, start_t: u64) -> Result<Segment> {
        let list = self.list(db).await?;
        let info = if start_t == 0 {
            list.first().copied()
        } else {
            list.iter().find(|i| i.start_t == start_t).copied()
        }
        .ok_or_else(|| {
            RestoreError::store_msg("load", format!("no segment for {} at start {}", db, start_t))
        })?;

        self.load(db, info.start_t, info.end_t).await
    }

    async fn load(&self, db: &str, start_t: u64, end_t: u64) -> Result<Segment> {
        let path = self.path_for(db, SegmentInfo::new(start_t, end_t));
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            RestoreError::store_msg("load", format!("{}: {}", path.display(), e))
        })?;
        let segment = Segment::decode(&bytes)?;
        if segment.info() != SegmentInfo::new(start_t, end_t) {
            // The file name lied about its content
            warn!(db = %db, start_t, end_t, "Segment file bounds disagree with payload");
            return Err(RestoreError::Codec(format!(
                "segment {}-{} payload declares {}-{}",
                start_t, end_t, segment.start_t, segment.end_t
            )));
        }
        Ok(segment)
    }
}
