//! Filter expressions, predicate evaluation, and index-assisted planning.
//!
//! A filter is either `All`, a conjunctive map of field criteria, or a
//! legacy predicate closure (which always full-scans). Criteria are literal
//! equality or `$`-tagged operator maps; several operators on one field are
//! conjunctive, as are several fields.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{DbError, Result};
use crate::index::IndexManager;
use crate::value::{FieldValue, Record};

/// Comparison operator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Nin,
}

impl Op {
    pub fn tag(&self) -> &'static str {
        match self {
            Op::Eq => "$eq",
            Op::Ne => "$ne",
            Op::Lt => "$lt",
            Op::Lte => "$lte",
            Op::Gt => "$gt",
            Op::Gte => "$gte",
            Op::In => "$in",
            Op::Nin => "$nin",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Some(match tag {
            "$eq" => Op::Eq,
            "$ne" => Op::Ne,
            "$lt" => Op::Lt,
            "$lte" => Op::Lte,
            "$gt" => Op::Gt,
            "$gte" => Op::Gte,
            "$in" => Op::In,
            "$nin" => Op::Nin,
            _ => return None,
        })
    }
}

/// Right-hand side of an operator.
#[derive(Debug, Clone)]
pub enum Operand {
    One(FieldValue),
    Many(Vec<FieldValue>),
}

/// Constraint on a single field.
#[derive(Debug, Clone)]
pub enum Criterion {
    /// Bare literal: equality
    Value(FieldValue),
    /// Operator map, conjunctive
    Ops(Vec<(Op, Operand)>),
}

/// Legacy predicate form; always evaluated by full scan.
pub type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Filter {
    All,
    Where(BTreeMap<String, Criterion>),
    Predicate(Predicate),
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => write!(f, "Filter::All"),
            Filter::Where(map) => f.debug_tuple("Filter::Where").field(map).finish(),
            Filter::Predicate(_) => write!(f, "Filter::Predicate(..)"),
        }
    }
}

impl Filter {
    pub fn all() -> Self {
        Filter::All
    }

    pub fn predicate(f: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        Filter::Predicate(Arc::new(f))
    }

    /// Parses the JSON filter surface, e.g.
    /// `{"department": "dept_5", "salary": {"$gte": 80000, "$lte": 100000}}`.
    /// `null` selects everything.
    pub fn parse(value: &Value) -> Result<Self> {
        let object = match value {
            Value::Null => return Ok(Filter::All),
            Value::Object(object) => object,
            other => {
                return Err(DbError::Serialization(format!(
                    "filter must be an object or null, got {other}"
                )))
            }
        };

        let mut map = BTreeMap::new();
        for (field, criterion) in object {
            map.insert(field.clone(), parse_criterion(criterion)?);
        }
        Ok(Filter::Where(map))
    }

    /// Whether `record` satisfies this filter.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::All => true,
            Filter::Where(map) => matches_map(map, record),
            Filter::Predicate(predicate) => predicate(record),
        }
    }
}

fn parse_criterion(value: &Value) -> Result<Criterion> {
    match value {
        Value::Object(object) => {
            let mut ops = Vec::with_capacity(object.len());
            for (tag, operand) in object {
                let op = Op::parse(tag).ok_or_else(|| {
                    DbError::Serialization(format!("unknown filter operator '{tag}'"))
                })?;
                ops.push((op, parse_operand(op, operand)?));
            }
            Ok(Criterion::Ops(ops))
        }
        literal => Ok(Criterion::Value(parse_plain(literal)?)),
    }
}

fn parse_operand(op: Op, value: &Value) -> Result<Operand> {
    match (op, value) {
        (Op::In | Op::Nin, Value::Array(items)) => Ok(Operand::Many(
            items.iter().map(parse_plain).collect::<Result<_>>()?,
        )),
        (Op::In | Op::Nin, other) => Err(DbError::Serialization(format!(
            "{} requires an array operand, got {other}",
            op.tag()
        ))),
        (_, other) => Ok(Operand::One(parse_plain(other)?)),
    }
}

/// Filter operands are primitives; composites cannot appear in a filter.
fn parse_plain(value: &Value) -> Result<FieldValue> {
    Ok(match value {
        Value::Null => FieldValue::Null,
        Value::Bool(v) => FieldValue::Bool(*v),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                FieldValue::Int(i)
            } else if let Some(f) = n.as_f64() {
                FieldValue::Float(f)
            } else {
                return Err(DbError::Serialization(format!("unrepresentable number {n}")));
            }
        }
        Value::String(s) => FieldValue::Str(s.clone()),
        other => {
            return Err(DbError::Serialization(format!(
                "filter operands must be primitive, got {other}"
            )))
        }
    })
}

/// Conjunction over every field criterion; absent fields read as null.
pub fn matches_map(map: &BTreeMap<String, Criterion>, record: &Record) -> bool {
    map.iter().all(|(field, criterion)| {
        let value = record.field_or_null(field);
        criterion_matches(criterion, &value)
    })
}

fn criterion_matches(criterion: &Criterion, value: &FieldValue) -> bool {
    match criterion {
        Criterion::Value(expected) => value == expected,
        Criterion::Ops(ops) => ops.iter().all(|(op, operand)| op_matches(*op, operand, value)),
    }
}

fn op_matches(op: Op, operand: &Operand, value: &FieldValue) -> bool {
    match op {
        Op::Eq => matches!(operand, Operand::One(expected) if value == expected),
        Op::Ne => matches!(operand, Operand::One(expected) if value != expected),
        Op::Lt => ordered(value, operand, |ord| ord == Ordering::Less),
        Op::Lte => ordered(value, operand, |ord| ord != Ordering::Greater),
        Op::Gt => ordered(value, operand, |ord| ord == Ordering::Greater),
        Op::Gte => ordered(value, operand, |ord| ord != Ordering::Less),
        Op::In => matches!(operand, Operand::Many(options) if options.contains(value)),
        Op::Nin => !matches!(operand, Operand::Many(options) if options.contains(value)),
    }
}

fn ordered(value: &FieldValue, operand: &Operand, accept: impl Fn(Ordering) -> bool) -> bool {
    match operand {
        Operand::One(bound) => compare(value, bound).is_some_and(accept),
        Operand::Many(_) => false,
    }
}

/// Total order within ints, within floats, and lexically within strings.
/// Mixed types are incomparable and every range operator yields false.
pub fn compare(a: &FieldValue, b: &FieldValue) -> Option<Ordering> {
    match (a, b) {
        (FieldValue::Int(a), FieldValue::Int(b)) => Some(a.cmp(b)),
        (FieldValue::Float(a), FieldValue::Float(b)) => a.partial_cmp(b),
        (FieldValue::Str(a), FieldValue::Str(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Primary-key candidates from indexed equality criteria.
///
/// Returns `Some` (the intersection of the matching index buckets) when at
/// least one indexed equality participates, `None` when the filter cannot
/// use any index and the caller must scan.
pub fn index_candidates(
    map: &BTreeMap<String, Criterion>,
    indexes: &IndexManager,
) -> Option<HashSet<FieldValue>> {
    let mut candidates: Option<HashSet<FieldValue>> = None;
    for (field, criterion) in map {
        if !indexes.covers(field) {
            continue;
        }
        let Some(value) = equality_operand(criterion) else {
            continue;
        };
        let bucket = indexes.lookup(field, value).cloned().unwrap_or_default();
        candidates = Some(match candidates {
            None => bucket,
            Some(previous) => previous.intersection(&bucket).cloned().collect(),
        });
    }
    candidates
}

fn equality_operand(criterion: &Criterion) -> Option<&FieldValue> {
    match criterion {
        Criterion::Value(value) => Some(value),
        Criterion::Ops(ops) => ops.iter().find_map(|(op, operand)| match (op, operand) {
            (Op::Eq, Operand::One(value)) => Some(value),
            _ => None,
        }),
    }
}
