// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Source/target database integration traits.
//!
//! The restore engine never speaks a wire protocol itself: it consumes the
//! source's transaction log and submits rewritten transactions to the target
//! through these traits. The daemon embedding this crate provides the real
//! client implementations; tests provide simulated ones.
//!
//! # Transaction Op Model
//!
//! A rewritten transaction is a list of [`TxOp`]s. Entities are referenced by
//! resolved target EID, by tempid string (placeholders the target resolves on
//! commit, returned in [`TxReport::tempids`]), or by ident keyword. The
//! `Cas` op asserts compare-and-swap semantics: on mismatch the entire
//! transaction is rejected, which is what makes the restore cursor a hard
//! barrier against duplicate applies.

use crate::datom::{Eid, Keyword, LogTx, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Result type for database client operations.
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = DbResult<T>> + Send + 'a>>;

/// Error surfaced by a database client.
///
/// The engine needs only three distinctions: transient (retry with backoff),
/// CAS rejection (duplicate apply, never retry the same `t`), and everything
/// else (fails the segment).
#[derive(Debug, Clone)]
pub enum DbError {
    /// Timeouts, throttling, connection loss. Retryable.
    Transient(String),
    /// A `Cas` op found a different current value.
    CasMismatch { expected: u64, actual: u64 },
    /// Anything else: datom conflicts, schema violations, anomalies.
    Fatal(String),
}

impl DbError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Transient(_))
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Transient(msg) => write!(f, "transient: {}", msg),
            DbError::CasMismatch { expected, actual } => {
                write!(f, "cas mismatch: expected {}, found {}", expected, actual)
            }
            DbError::Fatal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for DbError {}

/// Reference to an entity in a transaction op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// A concrete EID on the target.
    Eid(Eid),
    /// A placeholder string resolved by the target on commit.
    TempId(String),
    /// A stable ident keyword.
    Ident(Keyword),
}

impl EntityRef {
    pub fn tempid(s: impl Into<String>) -> Self {
        EntityRef::TempId(s.into())
    }

    pub fn as_tempid(&self) -> Option<&str> {
        match self {
            EntityRef::TempId(s) => Some(s),
            _ => None,
        }
    }
}

/// Value position of a transaction op: a scalar carried verbatim, or a
/// reference that participates in tempid resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum TxValue {
    Scalar(Value),
    Ref(EntityRef),
}

impl TxValue {
    pub fn as_ref_tempid(&self) -> Option<&str> {
        match self {
            TxValue::Ref(r) => r.as_tempid(),
            _ => None,
        }
    }
}

/// One operation of a rewritten transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TxOp {
    Add {
        e: EntityRef,
        a: EntityRef,
        v: TxValue,
    },
    Retract {
        e: EntityRef,
        a: EntityRef,
        v: TxValue,
    },
    /// Compare-and-swap: `expected == None` asserts the attribute is unset.
    Cas {
        e: EntityRef,
        a: EntityRef,
        expected: Option<Value>,
        new: Value,
    },
}

impl TxOp {
    pub fn add(e: EntityRef, a: EntityRef, v: TxValue) -> Self {
        TxOp::Add { e, a, v }
    }

    pub fn retract(e: EntityRef, a: EntityRef, v: TxValue) -> Self {
        TxOp::Retract { e, a, v }
    }

    pub fn is_add(&self) -> bool {
        matches!(self, TxOp::Add { .. })
    }

    pub fn is_retract(&self) -> bool {
        matches!(self, TxOp::Retract { .. })
    }

    /// The attribute position, when it is an ident keyword.
    pub fn attr_ident(&self) -> Option<&Keyword> {
        let a = match self {
            TxOp::Add { a, .. } | TxOp::Retract { a, .. } | TxOp::Cas { a, .. } => a,
        };
        match a {
            EntityRef::Ident(k) => Some(k),
            _ => None,
        }
    }

    pub fn entity(&self) -> &EntityRef {
        match self {
            TxOp::Add { e, .. } | TxOp::Retract { e, .. } | TxOp::Cas { e, .. } => e,
        }
    }
}

/// Result of a committed target transaction.
#[derive(Debug, Clone, Default)]
pub struct TxReport {
    /// Tempid string -> EID the target assigned for it.
    pub tempids: HashMap<String, Eid>,
}

/// What the engine needs from the source database.
///
/// The log is consumed as opaque ordered entries; the two snapshot methods
/// feed the segment side-tables.
pub trait SourceDatabase: Send + Sync + 'static {
    /// Name of the source database (keys segments and the resolution cache).
    fn db_name(&self) -> &str;

    /// The current log tip (`t` of the newest transaction).
    fn latest_t(&self) -> BoxFuture<'_, u64>;

    /// Read log entries in the half-open range `[start_t, end_t_exclusive)`.
    /// Sparse ranges return only the entries that exist.
    fn log_range(&self, start_t: u64, end_t_exclusive: u64) -> BoxFuture<'_, Vec<LogTx>>;

    /// Source EIDs of reference-typed attributes, as of now.
    fn ref_attr_eids(&self) -> BoxFuture<'_, BTreeSet<Eid>>;

    /// Source `EID -> ident` for base-schema attributes, as of a time before
    /// any user schema existed.
    fn base_attr_idents(&self) -> BoxFuture<'_, BTreeMap<Eid, Keyword>>;
}

/// What the engine needs from the target database.
pub trait TargetDatabase: Send + Sync + 'static {
    /// Submit one rewritten transaction. The timeout is the upper bound on
    /// in-flight work during cancellation.
    fn transact(&self, ops: Vec<TxOp>, timeout: Duration) -> BoxFuture<'_, TxReport>;

    /// Read the durable restore cursor (`restore/last-source-t`), if the
    /// bookkeeping schema is installed and seeded.
    fn last_source_t(&self) -> BoxFuture<'_, Option<u64>>;

    /// Whether an attribute with this ident exists.
    fn has_attribute(&self, ident: &Keyword) -> BoxFuture<'_, bool>;

    /// Probe the unique `restore/original-id` index.
    fn lookup_original_id(&self, source_eid: Eid) -> BoxFuture<'_, Option<Eid>>;

    /// Idents of reference-typed attributes currently installed.
    fn ref_attrs(&self) -> BoxFuture<'_, HashSet<Keyword>>;

    /// Idents of cardinality-one attributes currently installed.
    fn cardinality_one_attrs(&self) -> BoxFuture<'_, HashSet<Keyword>>;

    /// Idents of composite tuple attributes (values regenerated by the
    /// target, never asserted directly).
    fn composite_tuple_attrs(&self) -> BoxFuture<'_, HashSet<Keyword>>;
}
