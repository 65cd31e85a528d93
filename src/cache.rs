//! Per-database ID-resolution cache.
//!
//! Replaying history means rewriting every source EID to the EID the target
//! assigned for it. The durable mapping lives on the target itself (the
//! `restore/original-id` index); this cache is the process-local associative
//! memory in front of it. Losing the cache only costs index probes.
//!
//! # Monotonic Fast Path
//!
//! Source entity indexes (the low 42 bits of an EID) are dense and globally
//! monotonic with time. `max_seen_eidx` only rises when a source EID is
//! durably mapped, so any EID whose index exceeds the watermark cannot have
//! been restored before. [`EidCache::lookup`] returns `None` for such EIDs
//! without touching the LRU, and [`EidCache::is_new`] is the same test.
//! This is what lets the replay engine mint tempids without probing the
//! target for every entity it has never seen.
//!
//! # Lifecycle
//!
//! Caches are process-wide, created lazily by database name at first use
//! ([`EidCache::for_database`]), reset on demand ([`reset`], tests), and
//! rebuilt opportunistically from target index probes on miss. No
//! cross-database sharing.

use crate::datom::{entity_index, Eid};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default LRU capacity: one million mappings, roughly 48 B/entry.
pub const DEFAULT_CAPACITY: usize = 1 << 20;

/// Bounded least-recently-used map `old_eid -> new_eid`.
///
/// Recency is tracked with stamped queue entries: every touch pushes a fresh
/// `(key, stamp)` pair and invalidates the old one, eviction pops from the
/// front skipping stale pairs. The queue is compacted once it grows past
/// twice the live size.
struct Lru {
    capacity: usize,
    map: HashMap<Eid, Slot>,
    order: VecDeque<(Eid, u64)>,
    next_stamp: u64,
}

struct Slot {
    value: Eid,
    stamp: u64,
}

impl Lru {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
            next_stamp: 0,
        }
    }

    fn touch(&mut self, key: Eid) -> u64 {
        self.next_stamp += 1;
        self.order.push_back((key, self.next_stamp));
        self.next_stamp
    }

    fn get(&mut self, key: Eid) -> Option<Eid> {
        let stamp = self.map.contains_key(&key).then(|| self.touch(key))?;
        let slot = self.map.get_mut(&key).expect("checked above");
        slot.stamp = stamp;
        let value = slot.value;
        self.maybe_compact();
        Some(value)
    }

    fn insert(&mut self, key: Eid, value: Eid) {
        let stamp = self.touch(key);
        self.map.insert(key, Slot { value, stamp });
        while self.map.len() > self.capacity {
            match self.order.pop_front() {
                Some((k, s)) => {
                    let live = self.map.get(&k).map(|slot| slot.stamp == s).unwrap_or(false);
                    if live {
                        self.map.remove(&k);
                        crate::metrics::record_cache_eviction();
                    }
                }
                None => break,
            }
        }
        self.maybe_compact();
    }

    fn maybe_compact(&mut self) {
        if self.order.len() <= self.map.len().saturating_mul(2).max(16) {
            return;
        }
        let map = &self.map;
        self.order
            .retain(|(k, s)| map.get(k).map(|slot| slot.stamp == *s).unwrap_or(false));
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// The resolution cache for one source database.
pub struct EidCache {
    lru: Mutex<Lru>,
    /// Highest entity index ever durably mapped. Monotonically nondecreasing.
    max_seen_eidx: AtomicU64,
}

impl EidCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            lru: Mutex::new(Lru::new(capacity)),
            max_seen_eidx: AtomicU64::new(0),
        }
    }

    /// Get (or lazily create) the process-wide cache for a database name.
    pub fn for_database(db_name: &str) -> Arc<EidCache> {
        let mut registry = REGISTRY.lock();
        Arc::clone(
            registry
                .entry(db_name.to_string())
                .or_insert_with(|| Arc::new(EidCache::new(DEFAULT_CAPACITY))),
        )
    }

    /// Look up a source EID's target mapping.
    ///
    /// EIDs above the watermark short-circuit to `None` without touching the
    /// LRU: they cannot have been restored before.
    pub fn lookup(&self, old: Eid) -> Option<Eid> {
        if self.is_new(old) {
            crate::metrics::record_cache_shortcut();
            return None;
        }
        let hit = self.lru.lock().get(old);
        match hit {
            Some(new) => {
                crate::metrics::record_cache_hit();
                Some(new)
            }
            None => {
                crate::metrics::record_cache_miss();
                None
            }
        }
    }

    /// Record a durable mapping, raising the watermark when the EID's index
    /// exceeds it.
    pub fn store(&self, old: Eid, new: Eid) {
        self.lru.lock().insert(old, new);
        self.max_seen_eidx
            .fetch_max(entity_index(old), Ordering::AcqRel);
    }

    /// True when this source EID cannot have been restored before.
    pub fn is_new(&self, old: Eid) -> bool {
        entity_index(old) > self.max_seen_eidx.load(Ordering::Acquire)
    }

    /// Current watermark (highest durably mapped entity index).
    pub fn watermark(&self) -> u64 {
        self.max_seen_eidx.load(Ordering::Acquire)
    }

    /// Number of live mappings.
    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static REGISTRY: Lazy<Mutex<HashMap<String, Arc<EidCache>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Drop the cache for a database name (tests, or forcing a rebuild).
/// Existing handles keep their instance; the next `for_database` call gets
/// a fresh one.
pub fn reset(db_name: &str) {
    REGISTRY.lock().remove(db_name);
}
