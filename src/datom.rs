//! Core transaction-log types.
//!
//! The source database exposes its history as an ordered log of transactions,
//! each a list of raw datoms `{e, a, v, tx, added}`. Everything in this crate
//! operates on these types: the producer serializes them into segments, the
//! replay engine rewrites them into target transactions.
//!
//! # EID Structure
//!
//! An EID is a 64-bit integer partitioned as `partition_bits || entity_index`,
//! where the entity index occupies the low 42 bits and is globally monotonic
//! across the source's history. The ID-resolution cache exploits this: an EID
//! whose index exceeds the highest index ever mapped cannot exist on the
//! target yet (see [`crate::cache`]).

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity identifier on the source or target database.
pub type Eid = u64;

/// Number of low bits holding the globally monotonic entity index.
pub const ENTITY_INDEX_BITS: u32 = 42;

/// Mask selecting the entity-index portion of an EID.
pub const ENTITY_INDEX_MASK: u64 = (1 << ENTITY_INDEX_BITS) - 1;

/// Extract the monotonic entity index (low 42 bits) from an EID.
#[inline]
pub fn entity_index(eid: Eid) -> u64 {
    eid & ENTITY_INDEX_MASK
}

/// Extract the partition bits (high 22 bits) from an EID.
#[inline]
pub fn partition(eid: Eid) -> u64 {
    eid >> ENTITY_INDEX_BITS
}

/// Instants older than this (2000-01-01T00:00:00Z, epoch-ms) mark a
/// transaction as pre-epoch database preamble rather than user data.
pub const PRE_EPOCH_THRESHOLD_MS: i64 = 946_684_800_000;

const MS_PER_DAY: i64 = 86_400_000;

/// Synthetic instant assigned to replayed empty/pre-epoch transactions:
/// `epoch + 1 day + t` milliseconds. Keeps replayed tx-instants monotonic
/// in `t` while staying far in the past of any real user transaction.
#[inline]
pub fn synthetic_instant(t: u64) -> i64 {
    MS_PER_DAY + t as i64
}

/// A namespaced keyword identifier, e.g. `person/name` or `db/ident`.
///
/// What the source renders as `namespace/name` symbols. Plain value equality;
/// keywords flow through replay unchanged unless they are values of a
/// reference attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Keyword {
    pub namespace: String,
    pub name: String,
}

impl Keyword {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse from `"ns/name"` form. Without a slash the namespace is empty.
    pub fn parse(s: &str) -> Self {
        match s.split_once('/') {
            Some((ns, name)) => Self::new(ns, name),
            None => Self::new("", s),
        }
    }

    /// True for attributes in the base-schema `db` namespace family
    /// (`db`, `db.install`, `db.type`, ...).
    pub fn is_base_namespace(&self) -> bool {
        self.namespace == "db" || self.namespace.starts_with("db.")
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// A typed datom value.
///
/// The log carries heterogeneous values; every variant must survive a segment
/// encode/decode round-trip unchanged. Instants are epoch-milliseconds;
/// `Tuple` also covers the homogeneous-vector case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Long(i64),
    Str(String),
    Bool(bool),
    /// Instant as epoch-milliseconds.
    Inst(i64),
    Uuid(uuid::Uuid),
    Keyword(Keyword),
    Double(f64),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
}

impl Value {
    /// Integral view of this value, if it has one.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&Keyword> {
        match self {
            Value::Keyword(k) => Some(k),
            _ => None,
        }
    }

    pub fn is_inst(&self) -> bool {
        matches!(self, Value::Inst(_))
    }

    /// Interpret an instant value as a chrono timestamp.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Inst(ms) => Utc.timestamp_millis_opt(*ms).single(),
            _ => None,
        }
    }
}

/// A single fact: entity, attribute, value, transaction, assertion flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datom {
    pub e: Eid,
    pub a: Eid,
    pub v: Value,
    pub tx: Eid,
    pub added: bool,
}

impl Datom {
    pub fn new(e: Eid, a: Eid, v: Value, tx: Eid, added: bool) -> Self {
        Self { e, a, v, tx, added }
    }
}

/// One transaction-log entry: a monotonic log position `t` and its datoms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogTx {
    /// Monotonic log position.
    pub t: u64,
    /// Raw datoms, in log order.
    pub data: Vec<Datom>,
}

impl LogTx {
    pub fn new(t: u64, data: Vec<Datom>) -> Self {
        Self { t, data }
    }

    /// The transaction entity's EID. All datoms of one entry share `tx`;
    /// `None` only for a completely empty entry.
    pub fn tx_eid(&self) -> Option<Eid> {
        self.data.first().map(|d| d.tx)
    }

    /// Extract the transaction entity's instant: the datom where `e` is the
    /// tx entity itself and the value is an instant.
    pub fn tx_instant(&self) -> Option<i64> {
        let tx = self.tx_eid()?;
        self.data.iter().find_map(|d| match (&d.v, d.e == tx) {
            (Value::Inst(ms), true) => Some(*ms),
            _ => None,
        })
    }
}

/// Well-known idents of the database family, plus this crate's bookkeeping
/// attributes. These are wire-level constants of the source/target engine,
/// not configuration.
pub mod idents {
    use super::Keyword;
    use once_cell::sync::Lazy;

    /// Reserved tempid naming the current transaction entity.
    pub const TX_TEMPID: &str = "datomic.tx";

    pub static DB_IDENT: Lazy<Keyword> = Lazy::new(|| Keyword::new("db", "ident"));
    pub static DB_TX_INSTANT: Lazy<Keyword> = Lazy::new(|| Keyword::new("db", "txInstant"));
    pub static DB_CARDINALITY: Lazy<Keyword> = Lazy::new(|| Keyword::new("db", "cardinality"));
    pub static DB_VALUE_TYPE: Lazy<Keyword> = Lazy::new(|| Keyword::new("db", "valueType"));
    pub static DB_UNIQUE: Lazy<Keyword> = Lazy::new(|| Keyword::new("db", "unique"));
    pub static DB_NO_HISTORY: Lazy<Keyword> = Lazy::new(|| Keyword::new("db", "noHistory"));
    pub static DB_TUPLE_ATTRS: Lazy<Keyword> = Lazy::new(|| Keyword::new("db", "tupleAttrs"));
    pub static DB_INSTALL_ATTRIBUTE: Lazy<Keyword> =
        Lazy::new(|| Keyword::new("db.install", "attribute"));

    /// Bookkeeping: the source EID stamped on every restored entity.
    pub static ORIGINAL_ID: Lazy<Keyword> = Lazy::new(|| Keyword::new("restore", "original-id"));
    /// Bookkeeping: the durable restore cursor (last applied source `t`).
    pub static LAST_SOURCE_T: Lazy<Keyword> =
        Lazy::new(|| Keyword::new("restore", "last-source-t"));
}
