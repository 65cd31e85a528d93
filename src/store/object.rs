//! Object-store segment backend (S3 or local filesystem via `object_store`).
//!
//! Layout:
//!
//! ```text
//! {db}/{start}/{end}/transaction-group.zst    segment payload
//! {db}/last-segment.json                      newest-segment hint (advisory)
//! ```
//!
//! The sidecar makes `last()` a single GET instead of a full listing. It is
//! written after every save that advances the tip; when it is missing or
//! unparseable, `last()` self-heals from a full listing.

use crate::error::{RestoreError, Result};
use crate::segment::{Segment, SegmentInfo};
use crate::store::SegmentStore;
use async_trait::async_trait;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

const SEGMENT_OBJECT: &str = "transaction-group.zst";
const LAST_SEGMENT_HINT: &str = "last-segment.json";

/// Credentials/endpoint settings for the S3 constructor.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

pub struct ObjectSegmentStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectSegmentStore {
    /// Wrap any `object_store` implementation.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Local-filesystem object store rooted at `root` (development, tests).
    pub fn local(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)
            .map_err(|e| RestoreError::Config(format!("cannot create {}: {}", root.display(), e)))?;
        let store = LocalFileSystem::new_with_prefix(root)
            .map_err(|e| RestoreError::Config(format!("local object store: {}", e)))?;
        Ok(Self::new(Arc::new(store)))
    }

    /// S3 (or S3-compatible) object store.
    pub fn s3(config: &S3Config) -> Result<Self> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.bucket);
        if let Some(ref region) = config.region {
            builder = builder.with_region(region);
        }
        if let Some(ref endpoint) = config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(ref key) = config.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(ref secret) = config.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        let store = builder
            .build()
            .map_err(|e| RestoreError::Config(format!("s3 object store: {}", e)))?;
        Ok(Self::new(Arc::new(store)))
    }

    fn segment_path(db: &str, info: SegmentInfo) -> ObjectPath {
        ObjectPath::from(format!(
            "{}/{}/{}/{}",
            db, info.start_t, info.end_t, SEGMENT_OBJECT
        ))
    }

    fn hint_path(db: &str) -> ObjectPath {
        ObjectPath::from(format!("{}/{}", db, LAST_SEGMENT_HINT))
    }

    /// Parse `{db}/{start}/{end}/transaction-group.zst` back into bounds.
    fn parse_key(db: &str, key: &str) -> Option<SegmentInfo> {
        let rest = key.strip_prefix(db)?.strip_prefix('/')?;
        let mut parts = rest.split('/');
        let start_t: u64 = parts.next()?.parse().ok()?;
        let end_t: u64 = parts.next()?.parse().ok()?;
        (parts.next()? == SEGMENT_OBJECT && parts.next().is_none() && start_t <= end_t)
            .then_some(SegmentInfo::new(start_t, end_t))
    }

    async fn read_hint(&self, db: &str) -> Option<SegmentInfo> {
        let result = self.store.get(&Self::hint_path(db)).await.ok()?;
        let bytes = result.bytes().await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(db = %db, error = %e, "Corrupt last-segment hint, falling back to listing");
                None
            }
        }
    }

    async fn write_hint(&self, db: &str, info: SegmentInfo) -> Result<()> {
        let body = serde_json::to_vec(&info)
            .map_err(|e| RestoreError::Internal(format!("hint encode: {}", e)))?;
        self.store
            .put(&Self::hint_path(db), PutPayload::from(body))
            .await
            .map_err(|e| RestoreError::store("save-hint", e))?;
        Ok(())
    }
}

#[async_trait]
impl SegmentStore for ObjectSegmentStore {
    async fn save(&self, db: &str, segment: &Segment) -> Result<()> {
        let bytes = segment.encode()?;
        let path = Self::segment_path(db, segment.info());
        self.store
            .put(&path, PutPayload::from(bytes.to_vec()))
            .await
            .map_err(|e| RestoreError::store("save", e))?;

        // Advance the hint only forward; a backfill (gap repair) must not
        // rewind it.
        let advances = match self.read_hint(db).await {
            Some(hint) => segment.end_t > hint.end_t,
            None => true,
        };
        if advances {
            self.write_hint(db, segment.info()).await?;
        }

        debug!(db = %db, start_t = segment.start_t, end_t = segment.end_t, "Segment published");
        Ok(())
    }

    async fn list(&self, db: &str) -> Result<Vec<SegmentInfo>> {
        let prefix = ObjectPath::from(db.to_string());
        let mut stream = self.store.list(Some(&prefix));

        let mut infos = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(|e| RestoreError::store("list", e))?;
            if let Some(info) = Self::parse_key(db, meta.location.as_ref()) {
                infos.push(info);
            }
        }
        infos.sort();
        Ok(infos)
    }

    async fn last(&self, db: &str) -> Result<Option<SegmentInfo>> {
        if let Some(hint) = self.read_hint(db).await {
            return Ok(Some(hint));
        }
        Ok(self.list(db).await?.last().copied())
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
        let path = Self::segment_path(db, SegmentInfo::new(start_t, end_t));
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| RestoreError::store("load", e))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| RestoreError::store("load", e))?;
        Segment::decode(&bytes)
    }
}
