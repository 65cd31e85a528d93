//! Configuration for the restore engine.
//!
//! Configuration is constructed programmatically or deserialized from
//! YAML/JSON by the embedding daemon; connection configs and credential
//! discovery stay outside this crate.
//!
//! # Quick Start
//!
//! ```rust
//! use restore_engine::config::RestoreConfig;
//!
//! let config = RestoreConfig {
//!     db_name: "accounts".into(),
//!     segment_size: 500,
//!     ..Default::default()
//! };
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! RestoreConfig
//! ├── db_name: String              # Source database (keys segments + cache)
//! ├── segment_size: u64            # Transactions per produced segment
//! ├── poll_interval: "5s"          # Driver poll when caught up
//! ├── prefetch_buffer: usize       # Bounded channel capacity
//! ├── initial_retry_delay: "1s"    # Driver backoff floor
//! ├── max_retry_delay: "5m"        # Driver backoff ceiling
//! ├── transact_timeout: "120s"     # Per-transaction target timeout
//! ├── blacklist: Vec<String>       # Attribute idents dropped during replay
//! ├── verify_probability: f64      # Sampled original-id probe rate (0 = off)
//! └── cache_capacity: usize        # LRU entries per database
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RestoreError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// RestoreConfig: shared by the single-shot consumer and the continuous driver
// ═══════════════════════════════════════════════════════════════════════════════

/// Tunables for restoring one source database into one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Source database name. Keys segments in the store and the process-wide
    /// ID-resolution cache.
    pub db_name: String,

    /// Transactions per produced segment.
    #[serde(default = "default_segment_size")]
    pub segment_size: u64,

    /// How long the continuous driver sleeps when caught up with the store.
    /// Parsed to Duration internally.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Capacity of the prefetch channel between the driver's two tasks.
    #[serde(default = "default_prefetch_buffer")]
    pub prefetch_buffer: usize,

    /// First delay after a driver error; doubles up to `max_retry_delay`.
    #[serde(default = "default_initial_retry_delay")]
    pub initial_retry_delay: String,

    /// Backoff ceiling for the driver's error path.
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay: String,

    /// Upper bound on a single target transaction. Also the bound on
    /// in-flight work during cancellation.
    #[serde(default = "default_transact_timeout")]
    pub transact_timeout: String,

    /// Attribute idents (as `"ns/name"`) whose ops are dropped during replay.
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Probability that a "new EID" decision is verified against the
    /// target's original-id index. `0.0` disables verification.
    #[serde(default = "default_verify_probability")]
    pub verify_probability: f64,

    /// LRU capacity of the per-database ID-resolution cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_segment_size() -> u64 {
    1000
}

fn default_poll_interval() -> String {
    "5s".to_string()
}

fn default_prefetch_buffer() -> usize {
    5
}

fn default_initial_retry_delay() -> String {
    "1s".to_string()
}

fn default_max_retry_delay() -> String {
    "5m".to_string()
}

fn default_transact_timeout() -> String {
    "120s".to_string()
}

fn default_verify_probability() -> f64 {
    0.01
}

fn default_cache_capacity() -> usize {
    crate::cache::DEFAULT_CAPACITY
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            db_name: "default".to_string(),
            segment_size: default_segment_size(),
            poll_interval: default_poll_interval(),
            prefetch_buffer: default_prefetch_buffer(),
            initial_retry_delay: default_initial_retry_delay(),
            max_retry_delay: default_max_retry_delay(),
            transact_timeout: default_transact_timeout(),
            blacklist: Vec::new(),
            verify_probability: default_verify_probability(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl RestoreConfig {
    /// Minimal fast config for tests: tiny sleeps, verification on every
    /// "new" decision.
    pub fn for_testing(db_name: &str) -> Self {
        Self {
            db_name: db_name.to_string(),
            segment_size: 4,
            poll_interval: "10ms".to_string(),
            prefetch_buffer: 2,
            initial_retry_delay: "5ms".to_string(),
            max_retry_delay: "50ms".to_string(),
            transact_timeout: "5s".to_string(),
            blacklist: Vec::new(),
            verify_probability: 1.0,
            cache_capacity: 1024,
        }
    }

    /// Structural validation; call once at construction.
    pub fn validate(&self) -> Result<()> {
        if self.db_name.is_empty() {
            return Err(RestoreError::Config("db_name must not be empty".into()));
        }
        if self.segment_size == 0 {
            return Err(RestoreError::Config("segment_size must be > 0".into()));
        }
        if self.prefetch_buffer == 0 {
            return Err(RestoreError::Config("prefetch_buffer must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.verify_probability) {
            return Err(RestoreError::Config(
                "verify_probability must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Parse the poll interval, falling back to the default on a bad string.
    pub fn poll_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.poll_interval).unwrap_or(Duration::from_secs(5))
    }

    pub fn initial_retry_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.initial_retry_delay).unwrap_or(Duration::from_secs(1))
    }

    pub fn max_retry_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.max_retry_delay).unwrap_or(Duration::from_secs(300))
    }

    pub fn transact_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.transact_timeout).unwrap_or(Duration::from_secs(120))
    }

    /// Parsed blacklist keywords.
    pub fn blacklist_keywords(&self) -> Vec<crate::datom::Keyword> {
        self.blacklist
            .iter()
            .map(|s| crate::datom::Keyword::parse(s))
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BulkBackupConfig: the parallel catch-up producer
// ═══════════════════════════════════════════════════════════════════════════════

/// Tunables for [`backup_bulk`](crate::backup::backup_bulk).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkBackupConfig {
    /// Transactions per segment.
    #[serde(default = "default_segment_size")]
    pub txns_per_segment: u64,

    /// Segment number to start from (0 = from the beginning). Earlier
    /// segments are assumed present.
    #[serde(default)]
    pub starting_segment: u64,

    /// Fan ranges out over concurrent tasks.
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Concurrency cap when `parallel` is on.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrency() -> usize {
    8
}

impl Default for BulkBackupConfig {
    fn default() -> Self {
        Self {
            txns_per_segment: default_segment_size(),
            starting_segment: 0,
            parallel: true,
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl BulkBackupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.txns_per_segment == 0 {
            return Err(RestoreError::Config("txns_per_segment must be > 0".into()));
        }
        if self.max_concurrency == 0 {
            return Err(RestoreError::Config("max_concurrency must be > 0".into()));
        }
        Ok(())
    }
}
