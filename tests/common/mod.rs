// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Simulated transactional database for integration tests.
//!
//! [`SimDb`] is a small immutable-history engine that plays both roles:
//! as a **source** it exposes an ordered transaction log with the same shape
//! the real engine writes (raw datoms, monotonic EIDs partitioned as
//! `partition || entity-index`, pre-epoch bootstrap preamble); as a
//! **target** it transacts op lists, allocates its own EIDs, resolves
//! tempids, enforces CAS and datom-conflict semantics, and maintains the
//! unique original-id index.
//!
//! One instance can be restored into and then backed up from, which is what
//! the chained-restore scenario needs.

// Each integration binary compiles its own view of this fixture; not every
// binary exercises every helper.
#![allow(dead_code)]

use parking_lot::Mutex;
use restore_engine::database::{
    BoxFuture, DbError, EntityRef, SourceDatabase, TargetDatabase, TxOp, TxReport, TxValue,
};
use restore_engine::datom::{idents, Datom, Eid, Keyword, LogTx, Value, ENTITY_INDEX_BITS};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const PART_DB: u64 = 0;
const PART_TX: u64 = 3;
const PART_USER: u64 = 4;

/// Deterministic "wall clock" for user transactions: well past 2000-01-01.
const USER_EPOCH_MS: i64 = 1_700_000_000_000;

#[derive(Debug, Clone, Default)]
struct AttrSchema {
    is_ref: bool,
    cardinality_one: bool,
    tuple_attrs: bool,
    value_type: Option<Keyword>,
}

#[derive(Default)]
struct Inner {
    next_t: u64,
    next_idx: u64,
    log: Vec<LogTx>,
    /// Current asserted datoms (latest state, not history).
    current: Vec<Datom>,
    idents: HashMap<Keyword, Eid>,
    eid_idents: HashMap<Eid, Keyword>,
    schema: HashMap<Eid, AttrSchema>,
    /// Unique index over `restore/original-id`.
    original_ids: HashMap<i64, Eid>,
    /// Bootstrap snapshot: every base entity's ident, frozen before user schema.
    base_attrs: BTreeMap<Eid, Keyword>,
}

pub struct SimDb {
    name: String,
    inner: Mutex<Inner>,
    /// Transact calls to let through before failing.
    fail_skip: AtomicUsize,
    /// Remaining injected transient transact failures.
    fail_budget: AtomicUsize,
}

impl SimDb {
    /// A fresh database with the five-transaction bootstrap preamble
    /// (t = 1..=5), mirroring the engine's internal setup transactions.
    pub fn new(name: &str) -> Self {
        let db = Self {
            name: name.to_string(),
            inner: Mutex::new(Inner::default()),
            fail_skip: AtomicUsize::new(0),
            fail_budget: AtomicUsize::new(0),
        };
        db.bootstrap();
        db
    }

    /// The next `n` transact calls fail with a transient error.
    pub fn inject_transient_failures(&self, n: usize) {
        self.inject_transient_failures_after(0, n);
    }

    /// Let `skip` transact calls through, then fail the next `n`.
    pub fn inject_transient_failures_after(&self, skip: usize, n: usize) {
        self.fail_skip.store(skip, Ordering::SeqCst);
        self.fail_budget.store(n, Ordering::SeqCst);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn latest(&self) -> u64 {
        self.inner.lock().next_t - 1
    }

    // =========================================================================
    // Bootstrap
    // =========================================================================

    fn bootstrap(&self) {
        let mut inner = self.inner.lock();
        inner.next_t = 1;
        inner.next_idx = 10;

        // (ident, is_attr, schema)
        let base: Vec<(&str, Option<AttrSchema>)> = vec![
            ("db/ident", Some(attr(false, true, "db.type/keyword"))),
            ("db/valueType", Some(attr(true, true, "db.type/ref"))),
            ("db/cardinality", Some(attr(true, true, "db.type/ref"))),
            ("db/unique", Some(attr(true, true, "db.type/ref"))),
            ("db/noHistory", Some(attr(false, true, "db.type/boolean"))),
            ("db/tupleAttrs", Some(attr(true, true, "db.type/tuple"))),
            ("db/doc", Some(attr(false, true, "db.type/string"))),
            ("db.install/attribute", Some(attr(true, false, "db.type/ref"))),
            ("db/txInstant", Some(attr(false, true, "db.type/instant"))),
            ("db.type/string", None),
            ("db.type/long", None),
            ("db.type/ref", None),
            ("db.type/keyword", None),
            ("db.type/boolean", None),
            ("db.type/instant", None),
            ("db.type/uuid", None),
            ("db.type/double", None),
            ("db.type/bytes", None),
            ("db.type/tuple", None),
            ("db.cardinality/one", None),
            ("db.cardinality/many", None),
            ("db.unique/identity", None),
            ("db.unique/value", None),
            ("db.part/db", None),
            ("db.part/tx", None),
            ("db.part/user", None),
        ];

        // Allocate every base entity first so bootstrap datoms can refer to
        // attributes being defined in the same preamble.
        let mut eids: HashMap<String, Eid> = HashMap::new();
        for (ident, _) in &base {
            let idx = inner.next_idx;
            inner.next_idx += 1;
            let eid = (PART_DB << ENTITY_INDEX_BITS) | idx;
            eids.insert(ident.to_string(), eid);
            let kw = Keyword::parse(ident);
            inner.idents.insert(kw.clone(), eid);
            inner.eid_idents.insert(eid, kw);
        }
        for (ident, schema) in &base {
            if let Some(s) = schema {
                let eid = eids[*ident];
                inner.schema.insert(eid, s.clone());
            }
        }

        let ident_attr = eids["db/ident"];
        let vt_attr = eids["db/valueType"];
        let card_attr = eids["db/cardinality"];
        let instant_attr = eids["db/txInstant"];
        let card_one = eids["db.cardinality/one"];

        // Spread the preamble over five pre-epoch transactions.
        let chunks: Vec<Vec<&(&str, Option<AttrSchema>)>> = {
            let per = base.len().div_ceil(5);
            base.iter().collect::<Vec<_>>().chunks(per).map(|c| c.to_vec()).collect()
        };

        for chunk in chunks.into_iter() {
            let t = inner.next_t;
            inner.next_t += 1;
            let tx_idx = inner.next_idx;
            inner.next_idx += 1;
            let tx_eid = (PART_TX << ENTITY_INDEX_BITS) | tx_idx;

            let mut data = Vec::new();
            for (ident, schema) in chunk {
                let e = eids[*ident];
                data.push(Datom::new(
                    e,
                    ident_attr,
                    Value::Keyword(Keyword::parse(ident)),
                    tx_eid,
                    true,
                ));
                if let Some(s) = schema {
                    if let Some(vt) = &s.value_type {
                        data.push(Datom::new(
                            e,
                            vt_attr,
                            Value::Long(eids[vt.to_string().as_str()] as i64),
                            tx_eid,
                            true,
                        ));
                    }
                    if s.cardinality_one {
                        data.push(Datom::new(
                            e,
                            card_attr,
                            Value::Long(card_one as i64),
                            tx_eid,
                            true,
                        ));
                    }
                }
            }
            // Pre-epoch instant marks this as engine preamble.
            data.push(Datom::new(tx_eid, instant_attr, Value::Inst(t as i64), tx_eid, true));

            for d in &data {
                inner.current.push(d.clone());
            }
            inner.log.push(LogTx::new(t, data));
        }

        // Freeze the base-attribute snapshot before any user schema.
        inner.base_attrs = inner
            .eid_idents
            .iter()
            .map(|(e, k)| (*e, k.clone()))
            .collect();
    }

    // =========================================================================
    // Transacting (shared by the target trait and source-side helpers)
    // =========================================================================

    fn apply_ops(&self, ops: Vec<TxOp>, auto_instant: bool) -> Result<TxReport, DbError> {
        let skip = self.fail_skip.load(Ordering::SeqCst);
        if skip > 0 {
            self.fail_skip.store(skip - 1, Ordering::SeqCst);
        } else {
            let budget = self.fail_budget.load(Ordering::SeqCst);
            if budget > 0 {
                self.fail_budget.store(budget - 1, Ordering::SeqCst);
                return Err(DbError::Transient("injected failure".to_string()));
            }
        }

        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let t = inner.next_t;
        let tx_idx = inner.next_idx;
        let tx_eid = (PART_TX << ENTITY_INDEX_BITS) | (tx_idx);
        let mut allocated_idx = 1; // tx entity consumed one slot

        // Pass 1: resolve tempids and collect idents asserted in this tx so
        // keyword references to them resolve (forward references).
        let mut tempids: HashMap<String, Eid> = HashMap::new();
        tempids.insert(idents::TX_TEMPID.to_string(), tx_eid);

        let resolve_tempid =
            |s: &str, tempids: &mut HashMap<String, Eid>, allocated_idx: &mut u64| -> Eid {
                if let Some(e) = tempids.get(s) {
                    return *e;
                }
                let eid = (PART_USER << ENTITY_INDEX_BITS) | (tx_idx + *allocated_idx);
                *allocated_idx += 1;
                tempids.insert(s.to_string(), eid);
                eid
            };

        let mut tx_idents: HashMap<Keyword, Eid> = HashMap::new();
        for op in &ops {
            if let TxOp::Add { e, a, v } = op {
                if let (EntityRef::Ident(k), TxValue::Scalar(Value::Keyword(new_ident))) = (a, v) {
                    if *k == *idents::DB_IDENT {
                        let eid = match e {
                            EntityRef::TempId(s) => {
                                resolve_tempid(s, &mut tempids, &mut allocated_idx)
                            }
                            EntityRef::Eid(n) => *n,
                            EntityRef::Ident(k) => match inner.idents.get(k) {
                                Some(e) => *e,
                                None => {
                                    return Err(DbError::Fatal(format!("unknown ident {}", k)))
                                }
                            },
                        };
                        tx_idents.insert(new_ident.clone(), eid);
                    }
                }
            }
        }

        let resolve_entity = |r: &EntityRef,
                              tempids: &mut HashMap<String, Eid>,
                              allocated_idx: &mut u64,
                              inner: &Inner|
         -> Result<Eid, DbError> {
            match r {
                EntityRef::Eid(n) => Ok(*n),
                EntityRef::TempId(s) => {
                    if let Some(e) = tempids.get(s) {
                        return Ok(*e);
                    }
                    let eid = (PART_USER << ENTITY_INDEX_BITS) | (tx_idx + *allocated_idx);
                    *allocated_idx += 1;
                    tempids.insert(s.clone(), eid);
                    Ok(eid)
                }
                EntityRef::Ident(k) => inner
                    .idents
                    .get(k)
                    .copied()
                    .or_else(|| tx_idents.get(k).copied())
                    .ok_or_else(|| DbError::Fatal(format!("unknown ident {}", k))),
            }
        };

        // Pass 2: build datoms.
        let mut adds: Vec<Datom> = Vec::new();
        let mut retracts: Vec<Datom> = Vec::new();
        let mut has_instant = false;

        for op in &ops {
            match op {
                TxOp::Cas {
                    e,
                    a,
                    expected,
                    new,
                } => {
                    let e = resolve_entity(e, &mut tempids, &mut allocated_idx, inner)?;
                    let a = resolve_entity(a, &mut tempids, &mut allocated_idx, inner)?;
                    let actual = inner
                        .current
                        .iter()
                        .find(|d| d.e == e && d.a == a)
                        .map(|d| d.v.clone());
                    let matches = match (expected, &actual) {
                        (None, None) => true,
                        (Some(exp), Some(act)) => exp == act,
                        _ => false,
                    };
                    if !matches {
                        let to_u64 = |v: &Option<Value>| match v {
                            Some(Value::Long(n)) => *n as u64,
                            _ => 0,
                        };
                        return Err(DbError::CasMismatch {
                            expected: to_u64(expected),
                            actual: to_u64(&actual),
                        });
                    }
                    if let Some(old) = actual {
                        retracts.push(Datom::new(e, a, old, tx_eid, false));
                    }
                    adds.push(Datom::new(e, a, new.clone(), tx_eid, true));
                }
                TxOp::Add { e, a, v } | TxOp::Retract { e, a, v } => {
                    let added = op.is_add();
                    let e = resolve_entity(e, &mut tempids, &mut allocated_idx, inner)?;
                    let a = resolve_entity(a, &mut tempids, &mut allocated_idx, inner)?;
                    let attr_schema = inner.schema.get(&a).cloned().unwrap_or_default();

                    let v = normalize_value(
                        v,
                        &attr_schema,
                        inner,
                        &tx_idents,
                        &mut tempids,
                        &mut allocated_idx,
                        tx_idx,
                    )?;

                    if a == inner.idents[&*idents::DB_TX_INSTANT] && e == tx_eid {
                        has_instant = true;
                    }

                    if added {
                        adds.push(Datom::new(e, a, v, tx_eid, true));
                    } else {
                        retracts.push(Datom::new(e, a, v, tx_eid, false));
                    }
                }
            }
        }

        // Datom conflict: the same (e, a, v) both asserted and retracted.
        for add in &adds {
            if retracts
                .iter()
                .any(|r| r.e == add.e && r.a == add.a && r.v == add.v)
            {
                return Err(DbError::Fatal(format!(
                    "datom conflict on ({}, {})",
                    add.e, add.a
                )));
            }
        }

        // Cardinality-one: two different asserts on one (e, a) conflict;
        // a single assert auto-retracts the previous value.
        let mut seen_ea: HashMap<(Eid, Eid), Value> = HashMap::new();
        for add in &adds {
            let card_one = inner
                .schema
                .get(&add.a)
                .map(|s| s.cardinality_one)
                .unwrap_or(false);
            if !card_one {
                continue;
            }
            if let Some(prev) = seen_ea.get(&(add.e, add.a)) {
                if *prev != add.v {
                    return Err(DbError::Fatal(format!(
                        "cardinality-one conflict on ({}, {})",
                        add.e, add.a
                    )));
                }
            }
            seen_ea.insert((add.e, add.a), add.v.clone());

            if let Some(old) = inner
                .current
                .iter()
                .find(|d| d.e == add.e && d.a == add.a && d.v != add.v)
                .map(|d| d.v.clone())
            {
                if !retracts
                    .iter()
                    .any(|r| r.e == add.e && r.a == add.a && r.v == old)
                {
                    retracts.push(Datom::new(add.e, add.a, old, tx_eid, false));
                }
            }
        }

        // Unique original-id index.
        if let Some(orig_attr) = inner.idents.get(&*idents::ORIGINAL_ID).copied() {
            for add in &adds {
                if add.a == orig_attr {
                    if let Value::Long(src) = add.v {
                        if let Some(existing) = inner.original_ids.get(&src) {
                            if *existing != add.e {
                                return Err(DbError::Fatal(format!(
                                    "original-id {} already claimed by {}",
                                    src, existing
                                )));
                            }
                        }
                    }
                }
            }
        }

        // Append the tx instant when the caller did not supply one
        // (source-side user transactions).
        if auto_instant && !has_instant {
            let instant_attr = inner.idents[&*idents::DB_TX_INSTANT];
            adds.push(Datom::new(
                tx_eid,
                instant_attr,
                Value::Inst(USER_EPOCH_MS + (t as i64) * 1000),
                tx_eid,
                true,
            ));
        }

        // Commit: advance allocators, apply to current state, register
        // schema/idents/original-ids, append to the log.
        inner.next_t += 1;
        inner.next_idx = tx_idx + allocated_idx;

        for r in &retracts {
            inner
                .current
                .retain(|d| !(d.e == r.e && d.a == r.a && d.v == r.v));
        }
        for add in &adds {
            inner.current.push(add.clone());
        }

        self.register_schema(inner, &adds);

        let mut data = adds;
        data.extend(retracts);
        inner.log.push(LogTx::new(t, data));

        Ok(TxReport { tempids })
    }

    fn register_schema(&self, inner: &mut Inner, adds: &[Datom]) {
        let ident_attr = inner.idents[&*idents::DB_IDENT];
        let vt_attr = inner.idents[&*idents::DB_VALUE_TYPE];
        let card_attr = inner.idents[&*idents::DB_CARDINALITY];
        let tuple_attr = inner.idents[&*idents::DB_TUPLE_ATTRS];
        let ref_type = inner.idents[&Keyword::parse("db.type/ref")];
        let card_one = inner.idents[&Keyword::parse("db.cardinality/one")];

        for d in adds {
            if d.a == ident_attr {
                if let Value::Keyword(k) = &d.v {
                    inner.idents.insert(k.clone(), d.e);
                    inner.eid_idents.insert(d.e, k.clone());
                }
            }
        }
        for d in adds {
            if d.a == vt_attr {
                let entry = inner.schema.entry(d.e).or_default();
                if d.v == Value::Long(ref_type as i64) {
                    entry.is_ref = true;
                }
            } else if d.a == card_attr {
                let entry = inner.schema.entry(d.e).or_default();
                if d.v == Value::Long(card_one as i64) {
                    entry.cardinality_one = true;
                }
            } else if d.a == tuple_attr {
                inner.schema.entry(d.e).or_default().tuple_attrs = true;
            }
        }

        if let Some(orig_attr) = inner.idents.get(&*idents::ORIGINAL_ID).copied() {
            for d in adds {
                if d.a == orig_attr {
                    if let Value::Long(src) = d.v {
                        inner.original_ids.insert(src, d.e);
                    }
                }
            }
        }
    }

    // =========================================================================
    // Source-side helpers (building history to back up)
    // =========================================================================

    /// Transact user ops, auto-stamping a post-epoch tx instant.
    pub fn transact_user(&self, ops: Vec<TxOp>) -> TxReport {
        self.apply_ops(ops, true).expect("user transaction")
    }

    /// Install a user attribute, returning its EID.
    pub fn install_attribute(
        &self,
        ident: &str,
        value_type: &str,
        cardinality_one: bool,
    ) -> Eid {
        self.install_attribute_ops(ident, value_type, cardinality_one, None)
    }

    /// Install a composite tuple attribute over existing component idents.
    pub fn install_tuple_attribute(&self, ident: &str, components: &[&str]) -> Eid {
        self.install_attribute_ops("", "", true, Some((ident, components)))
    }

    fn install_attribute_ops(
        &self,
        ident: &str,
        value_type: &str,
        cardinality_one: bool,
        tuple: Option<(&str, &[&str])>,
    ) -> Eid {
        let tempid = "new-attr";
        let e = || EntityRef::tempid(tempid);
        let scalar_kw = |s: &str| TxValue::Scalar(Value::Keyword(Keyword::parse(s)));

        let mut ops = Vec::new();
        match tuple {
            None => {
                ops.push(TxOp::add(
                    e(),
                    EntityRef::Ident(idents::DB_IDENT.clone()),
                    scalar_kw(ident),
                ));
                ops.push(TxOp::add(
                    e(),
                    EntityRef::Ident(idents::DB_VALUE_TYPE.clone()),
                    TxValue::Ref(EntityRef::Ident(Keyword::parse(value_type))),
                ));
            }
            Some((tuple_ident, components)) => {
                ops.push(TxOp::add(
                    e(),
                    EntityRef::Ident(idents::DB_IDENT.clone()),
                    scalar_kw(tuple_ident),
                ));
                ops.push(TxOp::add(
                    e(),
                    EntityRef::Ident(idents::DB_VALUE_TYPE.clone()),
                    TxValue::Ref(EntityRef::Ident(Keyword::parse("db.type/tuple"))),
                ));
                ops.push(TxOp::add(
                    e(),
                    EntityRef::Ident(idents::DB_TUPLE_ATTRS.clone()),
                    TxValue::Scalar(Value::Tuple(
                        components
                            .iter()
                            .map(|c| Value::Keyword(Keyword::parse(c)))
                            .collect(),
                    )),
                ));
            }
        }
        if cardinality_one {
            ops.push(TxOp::add(
                e(),
                EntityRef::Ident(idents::DB_CARDINALITY.clone()),
                TxValue::Ref(EntityRef::Ident(Keyword::parse("db.cardinality/one"))),
            ));
        }
        ops.push(TxOp::add(
            EntityRef::Ident(Keyword::parse("db.part/db")),
            EntityRef::Ident(idents::DB_INSTALL_ATTRIBUTE.clone()),
            TxValue::Ref(e()),
        ));

        let report = self.transact_user(ops);
        report.tempids[tempid]
    }

    // =========================================================================
    // Query helpers for assertions
    // =========================================================================

    pub fn eid_of(&self, ident: &str) -> Option<Eid> {
        self.inner.lock().idents.get(&Keyword::parse(ident)).copied()
    }

    /// Current values of (entity, attribute-ident).
    pub fn values(&self, e: Eid, ident: &str) -> Vec<Value> {
        let inner = self.inner.lock();
        let Some(a) = inner.idents.get(&Keyword::parse(ident)).copied() else {
            return Vec::new();
        };
        inner
            .current
            .iter()
            .filter(|d| d.e == e && d.a == a)
            .map(|d| d.v.clone())
            .collect()
    }

    pub fn value(&self, e: Eid, ident: &str) -> Option<Value> {
        self.values(e, ident).into_iter().next()
    }

    /// Entities currently asserting `ident = value`.
    pub fn find_by_value(&self, ident: &str, value: &Value) -> Vec<Eid> {
        let inner = self.inner.lock();
        let Some(a) = inner.idents.get(&Keyword::parse(ident)).copied() else {
            return Vec::new();
        };
        let mut eids: Vec<Eid> = inner
            .current
            .iter()
            .filter(|d| d.a == a && d.v == *value)
            .map(|d| d.e)
            .collect();
        eids.sort_unstable();
        eids.dedup();
        eids
    }

    /// All entities carrying an attribute.
    pub fn entities_with(&self, ident: &str) -> Vec<Eid> {
        let inner = self.inner.lock();
        let Some(a) = inner.idents.get(&Keyword::parse(ident)).copied() else {
            return Vec::new();
        };
        let mut eids: Vec<Eid> = inner
            .current
            .iter()
            .filter(|d| d.a == a)
            .map(|d| d.e)
            .collect();
        eids.sort_unstable();
        eids.dedup();
        eids
    }

    pub fn original_id_of(&self, e: Eid) -> Option<i64> {
        self.value(e, "restore/original-id").and_then(|v| v.as_long())
    }

    pub fn cursor(&self) -> Option<u64> {
        let e = self.eid_of("restore/last-source-t")?;
        match self.value(e, "restore/last-source-t") {
            Some(Value::Long(n)) => Some(n as u64),
            _ => None,
        }
    }
}

fn attr(is_ref: bool, cardinality_one: bool, value_type: &str) -> AttrSchema {
    AttrSchema {
        is_ref,
        cardinality_one,
        tuple_attrs: false,
        value_type: Some(Keyword::parse(value_type)),
    }
}

#[allow(clippy::too_many_arguments)]
fn normalize_value(
    v: &TxValue,
    attr_schema: &AttrSchema,
    inner: &Inner,
    tx_idents: &HashMap<Keyword, Eid>,
    tempids: &mut HashMap<String, Eid>,
    allocated_idx: &mut u64,
    tx_idx: u64,
) -> Result<Value, DbError> {
    let resolve_kw = |k: &Keyword| -> Result<Eid, DbError> {
        inner
            .idents
            .get(k)
            .copied()
            .or_else(|| tx_idents.get(k).copied())
            .ok_or_else(|| DbError::Fatal(format!("unknown ident {} in value", k)))
    };

    match v {
        TxValue::Ref(r) => {
            let eid = match r {
                EntityRef::Eid(n) => *n,
                EntityRef::Ident(k) => resolve_kw(k)?,
                EntityRef::TempId(s) => {
                    if let Some(e) = tempids.get(s) {
                        *e
                    } else {
                        let eid = (PART_USER << ENTITY_INDEX_BITS) | (tx_idx + *allocated_idx);
                        *allocated_idx += 1;
                        tempids.insert(s.clone(), eid);
                        eid
                    }
                }
            };
            Ok(Value::Long(eid as i64))
        }
        TxValue::Scalar(Value::Keyword(k)) if attr_schema.is_ref => {
            Ok(Value::Long(resolve_kw(k)? as i64))
        }
        TxValue::Scalar(Value::Tuple(elements)) if attr_schema.is_ref => {
            let mut out = Vec::with_capacity(elements.len());
            for el in elements {
                match el {
                    Value::Keyword(k) => out.push(Value::Long(resolve_kw(k)? as i64)),
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::Tuple(out))
        }
        TxValue::Scalar(other) => Ok(other.clone()),
    }
}

// =============================================================================
// Trait implementations
// =============================================================================

impl SourceDatabase for SimDb {
    fn db_name(&self) -> &str {
        &self.name
    }

    fn latest_t(&self) -> BoxFuture<'_, u64> {
        let t = self.latest();
        Box::pin(async move { Ok(t) })
    }

    fn log_range(&self, start_t: u64, end_t_exclusive: u64) -> BoxFuture<'_, Vec<LogTx>> {
        let entries: Vec<LogTx> = self
            .inner
            .lock()
            .log
            .iter()
            .filter(|tx| tx.t >= start_t && tx.t < end_t_exclusive)
            .cloned()
            .collect();
        Box::pin(async move { Ok(entries) })
    }

    fn ref_attr_eids(&self) -> BoxFuture<'_, BTreeSet<Eid>> {
        let refs: BTreeSet<Eid> = self
            .inner
            .lock()
            .schema
            .iter()
            .filter(|(_, s)| s.is_ref)
            .map(|(e, _)| *e)
            .collect();
        Box::pin(async move { Ok(refs) })
    }

    fn base_attr_idents(&self) -> BoxFuture<'_, BTreeMap<Eid, Keyword>> {
        let snapshot = self.inner.lock().base_attrs.clone();
        Box::pin(async move { Ok(snapshot) })
    }
}

impl TargetDatabase for SimDb {
    fn transact(&self, ops: Vec<TxOp>, _timeout: Duration) -> BoxFuture<'_, TxReport> {
        let result = self.apply_ops(ops, false);
        Box::pin(async move { result })
    }

    fn last_source_t(&self) -> BoxFuture<'_, Option<u64>> {
        let cursor = self.cursor().filter(|t| *t > 0);
        Box::pin(async move { Ok(cursor) })
    }

    fn has_attribute(&self, ident: &Keyword) -> BoxFuture<'_, bool> {
        let present = self.inner.lock().idents.contains_key(ident);
        Box::pin(async move { Ok(present) })
    }

    fn lookup_original_id(&self, source_eid: Eid) -> BoxFuture<'_, Option<Eid>> {
        let hit = self
            .inner
            .lock()
            .original_ids
            .get(&(source_eid as i64))
            .copied();
        Box::pin(async move { Ok(hit) })
    }

    fn ref_attrs(&self) -> BoxFuture<'_, HashSet<Keyword>> {
        let inner = self.inner.lock();
        let set: HashSet<Keyword> = inner
            .schema
            .iter()
            .filter(|(_, s)| s.is_ref)
            .filter_map(|(e, _)| inner.eid_idents.get(e).cloned())
            .collect();
        drop(inner);
        Box::pin(async move { Ok(set) })
    }

    fn cardinality_one_attrs(&self) -> BoxFuture<'_, HashSet<Keyword>> {
        let inner = self.inner.lock();
        let set: HashSet<Keyword> = inner
            .schema
            .iter()
            .filter(|(_, s)| s.cardinality_one)
            .filter_map(|(e, _)| inner.eid_idents.get(e).cloned())
            .collect();
        drop(inner);
        Box::pin(async move { Ok(set) })
    }

    fn composite_tuple_attrs(&self) -> BoxFuture<'_, HashSet<Keyword>> {
        let inner = self.inner.lock();
        let set: HashSet<Keyword> = inner
            .schema
            .iter()
            .filter(|(_, s)| s.tuple_attrs)
            .filter_map(|(e, _)| inner.eid_idents.get(e).cloned())
            .collect();
        drop(inner);
        Box::pin(async move { Ok(set) })
    }
}
