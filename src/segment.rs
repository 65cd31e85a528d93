// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Segment payload and its wire codec.
//!
//! A segment is a durable, contiguous slice of the source transaction log
//! together with the side-tables the consumer needs to replay it:
//!
//! - `refs`: source EIDs naming reference-typed attributes, so the consumer
//!   can tell a reference value from a scalar without asking the source.
//! - `id_to_attr`: source `EID -> ident` for base-schema attributes,
//!   snapshotted before any user schema so schema-evolution idents resolve
//!   when replaying early history.
//! - `transactions`: the ordered log entries themselves.
//!
//! # Wire Format
//!
//! ```text
//! ┌───────────┬─────────┬──────────────────────┬──────────────────────┐
//! │ magic     │ version │ uncompressed_len u64 │ zstd(bincode(body))  │
//! │ "SGRP"    │ 0x01    │ little-endian        │                      │
//! └───────────┴─────────┴──────────────────────┴──────────────────────┘
//! ```
//!
//! The body is the `serde` encoding of [`Segment`] under bincode's standard
//! configuration. The uncompressed length is checked after decompression;
//! a mismatch means corruption and fails the decode. Every datom value
//! variant round-trips losslessly.

use crate::datom::{Eid, Keyword, LogTx};
use crate::error::{RestoreError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Magic bytes at the head of every encoded segment.
const SEGMENT_MAGIC: [u8; 4] = *b"SGRP";

/// Current wire version.
const SEGMENT_VERSION: u8 = 1;

/// Header length: magic + version + uncompressed length.
const HEADER_LEN: usize = 4 + 1 + 8;

/// zstd level for segment payloads. Log entries are highly repetitive
/// (shared attribute EIDs, monotonic tx EIDs), so a mid-level dictionary-less
/// compress already gets a large win.
const ZSTD_LEVEL: i32 = 3;

/// Identifying key of a stored segment: its inclusive `t` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub start_t: u64,
    pub end_t: u64,
}

impl SegmentInfo {
    pub fn new(start_t: u64, end_t: u64) -> Self {
        Self { start_t, end_t }
    }

    /// Range test, both bounds inclusive.
    pub fn contains(&self, t: u64) -> bool {
        self.start_t <= t && t <= self.end_t
    }
}

/// A persisted chunk of the source transaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// First contained log position, inclusive. A real observed `t`.
    pub start_t: u64,
    /// Last contained log position, inclusive. A real observed `t`.
    pub end_t: u64,
    /// Source EIDs of reference-typed attributes.
    pub refs: BTreeSet<Eid>,
    /// Source EID -> ident for base-schema attributes, snapshotted before
    /// user schema existed.
    pub id_to_attr: BTreeMap<Eid, Keyword>,
    /// Ordered source log entries.
    pub transactions: Vec<LogTx>,
}

impl Segment {
    pub fn info(&self) -> SegmentInfo {
        SegmentInfo::new(self.start_t, self.end_t)
    }

    pub fn contains(&self, t: u64) -> bool {
        self.info().contains(t)
    }

    /// The greatest `t` actually present among the contained transactions.
    pub fn last_t(&self) -> Option<u64> {
        self.transactions.iter().map(|tx| tx.t).max()
    }

    /// Serialize to the wire format.
    pub fn encode(&self) -> Result<Bytes> {
        let body = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| RestoreError::Codec(format!("encode failed: {}", e)))?;

        let compressed = zstd::encode_all(body.as_slice(), ZSTD_LEVEL)
            .map_err(|e| RestoreError::Codec(format!("compress failed: {}", e)))?;

        let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
        out.extend_from_slice(&SEGMENT_MAGIC);
        out.push(SEGMENT_VERSION);
        out.extend_from_slice(&(body.len() as u64).to_le_bytes());
        out.extend_from_slice(&compressed);
        Ok(Bytes::from(out))
    }

    /// Deserialize from the wire format.
    ///
    /// Rejects bad magic, unknown versions, truncated input, and payloads
    /// whose decompressed length disagrees with the header.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(RestoreError::Codec(format!(
                "truncated header: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0..4] != SEGMENT_MAGIC {
            return Err(RestoreError::Codec("bad magic".to_string()));
        }
        let version = bytes[4];
        if version != SEGMENT_VERSION {
            return Err(RestoreError::Codec(format!(
                "unsupported segment version {}",
                version
            )));
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[5..13]);
        let expected_len = u64::from_le_bytes(len_bytes) as usize;

        let body = zstd::decode_all(&bytes[HEADER_LEN..])
            .map_err(|e| RestoreError::Codec(format!("decompress failed: {}", e)))?;

        if body.len() != expected_len {
            return Err(RestoreError::Codec(format!(
                "length mismatch: header says {}, payload is {}",
                expected_len,
                body.len()
            )));
        }

        let (segment, consumed) =
            bincode::serde::decode_from_slice::<Segment, _>(&body, bincode::config::standard())
                .map_err(|e| RestoreError::Codec(format!("decode failed: {}", e)))?;

        if consumed != body.len() {
            return Err(RestoreError::Codec(format!(
                "trailing garbage: {} of {} bytes consumed",
                consumed,
                body.len()
            )));
        }

        Ok(segment)
    }
}
