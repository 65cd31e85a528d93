//! Target bookkeeping schema.
//!
//! Two attributes make the restore crash-consistent with the data:
//!
//! - `restore/original-id`: stamped on every restored non-transaction entity
//!   with its source EID. The unique index over it is the durable
//!   `source EID -> target EID` mapping; the in-process cache is only a
//!   front for it.
//! - `restore/last-source-t`: a distinguished entity whose only datom is
//!   `(self, self, t_last)`, cardinality one, no history. This is the
//!   authoritative restore cursor; every replayed transaction leads with a
//!   CAS advancing it, so duplicate applies fail loudly instead of silently
//!   doubling datoms.
//!
//! Install happens exactly once, then a follow-up transaction seeds the
//! cursor to `0` so the first real transaction can CAS `0 -> t`.

use crate::datom::{idents, Keyword, Value};
use crate::database::{EntityRef, TxOp, TxValue};

/// Tempid used while installing the original-id attribute.
const ORIGINAL_ID_TEMPID: &str = "restore.install.original-id";
/// Tempid used while installing the cursor attribute.
const LAST_SOURCE_T_TEMPID: &str = "restore.install.last-source-t";

fn kw(s: &str) -> Value {
    Value::Keyword(Keyword::parse(s))
}

fn schema_attr(tempid: &str, ident: &Keyword, no_history: bool) -> Vec<TxOp> {
    let e = EntityRef::tempid(tempid);
    let mut ops = vec![
        TxOp::add(
            e.clone(),
            EntityRef::Ident(idents::DB_IDENT.clone()),
            TxValue::Scalar(Value::Keyword(ident.clone())),
        ),
        TxOp::add(
            e.clone(),
            EntityRef::Ident(idents::DB_VALUE_TYPE.clone()),
            TxValue::Scalar(kw("db.type/long")),
        ),
        TxOp::add(
            e.clone(),
            EntityRef::Ident(idents::DB_CARDINALITY.clone()),
            TxValue::Scalar(kw("db.cardinality/one")),
        ),
    ];
    if no_history {
        ops.push(TxOp::add(
            e.clone(),
            EntityRef::Ident(idents::DB_NO_HISTORY.clone()),
            TxValue::Scalar(Value::Bool(true)),
        ));
    }
    ops.push(TxOp::add(
        EntityRef::Ident(Keyword::new("db.part", "db")),
        EntityRef::Ident(idents::DB_INSTALL_ATTRIBUTE.clone()),
        TxValue::Ref(e),
    ));
    ops
}

/// Ops installing both bookkeeping attributes in one transaction.
pub fn install_ops() -> Vec<TxOp> {
    let mut ops = schema_attr(ORIGINAL_ID_TEMPID, &idents::ORIGINAL_ID, false);
    ops.extend(schema_attr(
        LAST_SOURCE_T_TEMPID,
        &idents::LAST_SOURCE_T,
        true,
    ));
    ops
}

/// Follow-up transaction seeding the cursor to `0`.
pub fn seed_cursor_ops() -> Vec<TxOp> {
    vec![TxOp::add(
        EntityRef::Ident(idents::LAST_SOURCE_T.clone()),
        EntityRef::Ident(idents::LAST_SOURCE_T.clone()),
        TxValue::Scalar(Value::Long(0)),
    )]
}

/// The leading CAS of every replayed transaction: advance the cursor from
/// `prev_t` to `t`. The first transaction advances `0 -> t`.
pub fn cursor_cas(prev_t: u64, t: u64) -> TxOp {
    TxOp::Cas {
        e: EntityRef::Ident(idents::LAST_SOURCE_T.clone()),
        a: EntityRef::Ident(idents::LAST_SOURCE_T.clone()),
        expected: Some(Value::Long(prev_t as i64)),
        new: Value::Long(t as i64),
    }
}
