// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the restore engine.
//!
//! Errors are categorized by their source (segment store, source log, target
//! transactor, etc.) and include context to help with debugging.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Store` | Yes | Segment store I/O failures (network, throttling) |
//! | `Source` | Yes | Source log read failures |
//! | `Target` | Yes | Target transactor temporarily unavailable |
//! | `TransactionRejected` | No | Target rejected the transaction outright |
//! | `CasMismatch` | No | Cursor compare-and-swap rejected (duplicate apply) |
//! | `InvariantViolation` | No | Mapping invariant broken (needs investigation) |
//! | `MissingBookkeepingSchema` | No | Target lacks the bookkeeping attributes |
//! | `EmptyTransaction` | No | Filtering left nothing to submit |
//! | `Codec` | No | Segment corruption (decode failed) |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Engine state machine violation |
//! | `Shutdown` | No | Driver is shutting down |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Use [`RestoreError::is_retryable()`] to determine if an operation should be
//! retried with backoff. Retryable errors indicate transient network or
//! availability issues; non-retryable errors indicate bugs, configuration
//! problems, or data corruption. Invariant violations never advance the
//! restore cursor.

use thiserror::Error;

/// Result type alias for restore operations.
pub type Result<T> = std::result::Result<T, RestoreError>;

/// Errors that can occur during backup or restore.
#[derive(Error, Debug)]
pub enum RestoreError {
    /// Segment store I/O error.
    ///
    /// Occurs reading or writing segments. Typically retryable (remote
    /// throttling, network blips).
    #[error("Segment store error ({operation}): {message}")]
    Store {
        operation: String,
        message: String,
        #[source]
        source: Option<object_store::Error>,
    },

    /// Source transaction-log read failure. Retryable with backoff.
    #[error("Source log error: {0}")]
    Source(String),

    /// Target transactor failure (timeout, overload, anomaly).
    /// Retryable; the leading cursor CAS makes duplicate applies impossible.
    #[error("Target transaction error: {0}")]
    Target(String),

    /// The target rejected the transaction outright (datom conflict, schema
    /// violation). Retrying submits the same ops and gets the same answer;
    /// the segment aborts with `transaction_failed`.
    #[error("Target rejected transaction: {0}")]
    TransactionRejected(String),

    /// The cursor compare-and-swap was rejected.
    ///
    /// Another consumer already applied this `t`, or a retry raced a
    /// previously successful apply. Not retryable for the same `t`.
    #[error("Cursor CAS mismatch: expected last-source-t {expected}, target reports {actual}")]
    CasMismatch { expected: u64, actual: u64 },

    /// A mapping invariant was broken (e.g. a "new" source EID already has an
    /// original-id on the target). Fatal to the segment; does not advance the
    /// cursor.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The target database lacks the bookkeeping schema and the consumer is
    /// past the point where it would install it.
    #[error("Target is missing the restore bookkeeping schema")]
    MissingBookkeepingSchema,

    /// Every data op of a transaction was filtered or pruned away.
    /// Reported as `transaction_failed`; the segment aborts.
    #[error("Transaction {t} became empty after filtering")]
    EmptyTransaction { t: u64 },

    /// Segment payload failed to decode.
    ///
    /// The stored bytes are corrupt or were written by an incompatible
    /// version. Not retryable.
    #[error("Segment codec error: {0}")]
    Codec(String),

    /// Invalid or missing configuration. Fix the configuration and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine state machine violation (e.g. starting an already-running
    /// driver). Indicates a bug in the caller.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error. Indicates a bug that needs investigation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RestoreError {
    /// Create a store error from an `object_store::Error`.
    pub fn store(operation: impl Into<String>, source: object_store::Error) -> Self {
        Self::Store {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a store error without an underlying source.
    pub fn store_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store { .. } => true,
            Self::Source(_) => true,
            Self::Target(_) => true,
            Self::TransactionRejected(_) => false,
            Self::CasMismatch { .. } => false,
            Self::InvariantViolation(_) => false,
            Self::MissingBookkeepingSchema => false,
            Self::EmptyTransaction { .. } => false,
            Self::Codec(_) => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }
}

impl From<object_store::Error> for RestoreError {
    fn from(e: object_store::Error) -> Self {
        Self::store("unknown", e)
    }
}
