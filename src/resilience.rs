//! Resilience utilities: retry backoff and fan-out limiting.
//!
//! - [`RetryConfig`]: exponential backoff schedules for transient failures.
//!   Bulk backup uses the bounded [`RetryConfig::bulk`] budget per segment
//!   range; the continuous driver uses the unbounded [`RetryConfig::daemon`]
//!   schedule for its error path.
//! - [`Bulkhead`]: a semaphore capping how many segment ranges the bulk
//!   producer reads concurrently, so a deep backlog cannot open an unbounded
//!   number of simultaneous log scans against the source.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), restore_engine::resilience::BulkheadFull> {
//! use restore_engine::resilience::{Bulkhead, RetryConfig};
//!
//! let retry = RetryConfig::bulk();
//! let delay = retry.delay_for_attempt(3); // after the 3rd transient failure
//!
//! let bulkhead = Bulkhead::new(8);
//! let _permit = bulkhead.acquire().await?; // released on drop
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// An exponential backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts before the failure is surfaced. `usize::MAX` retries forever.
    pub max_attempts: usize,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Ceiling for the exponential growth.
    pub max_delay: Duration,
    /// Growth factor per attempt (2.0 doubles every retry).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Bounded budget for one bulk-backup segment range.
    ///
    /// A range that still fails after five attempts poisons the whole bulk
    /// run; retrying longer would only hide a broken source or store behind
    /// hours of sleep.
    pub fn bulk() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }

    /// Unbounded schedule for the continuous driver: 1s doubling up to a
    /// 5 minute ceiling, forever. The driver only exits on cancellation or
    /// channel close, so a long store outage resolves without operator
    /// intervention.
    pub fn daemon() -> Self {
        Self {
            max_attempts: usize::MAX,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_factor: 2.0,
        }
    }

    /// Millisecond-scale schedule so tests fail fast.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        }
    }

    /// Delay to sleep after the `attempt`-th failure (1-indexed).
    /// Attempt 0 is treated like attempt 1.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        // powi overflows to inf long before Duration does; the ceiling
        // handles both.
        if scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

/// Error returned when a closed bulkhead cannot hand out permits.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bulkhead full: max {max_concurrent} concurrent operations")]
pub struct BulkheadFull {
    pub max_concurrent: usize,
}

/// Concurrency limiter over a fixed pool of permits.
///
/// Dropping the returned permit releases the slot. Unlike a raw semaphore
/// the bulkhead remembers its configured width, which makes saturation
/// visible to logs and assertions.
#[derive(Debug)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Bulkhead {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, BulkheadFull> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| BulkheadFull {
                max_concurrent: self.max_concurrent,
            })
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).try_acquire_owned().ok()
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn is_full(&self) -> bool {
        self.available() == 0
    }
}
