//! Record values and stable shard routing.
//!
//! Every stored record is a [`Record`]: a class tag, a version tag, and a
//! map of field name to [`FieldValue`]. Values double as hash-map keys
//! (shard maps, index buckets), so equality and hashing are total: floats
//! compare and hash by bit pattern.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use fxhash::FxHasher;

/// Field contents of a composite record, keyed by field name.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A single field value: primitive or nested composite.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Null,
    Composite(Record),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Human-readable type name, used in error messages.
    pub fn type_name(&self) -> String {
        match self {
            FieldValue::Int(_) => "int".to_string(),
            FieldValue::Float(_) => "float".to_string(),
            FieldValue::Bool(_) => "bool".to_string(),
            FieldValue::Str(_) => "str".to_string(),
            FieldValue::Null => "null".to_string(),
            FieldValue::Composite(record) => record.class.clone(),
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Int(a), FieldValue::Int(b)) => a == b,
            // Bit equality keeps Eq/Hash consistent for NaN and -0.0
            (FieldValue::Float(a), FieldValue::Float(b)) => a.to_bits() == b.to_bits(),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
            (FieldValue::Str(a), FieldValue::Str(b)) => a == b,
            (FieldValue::Null, FieldValue::Null) => true,
            (FieldValue::Composite(a), FieldValue::Composite(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl Hash for FieldValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            FieldValue::Int(v) => {
                state.write_u8(0);
                v.hash(state);
            }
            FieldValue::Float(v) => {
                state.write_u8(1);
                state.write_u64(v.to_bits());
            }
            FieldValue::Bool(v) => {
                state.write_u8(2);
                v.hash(state);
            }
            FieldValue::Str(v) => {
                state.write_u8(3);
                v.hash(state);
            }
            FieldValue::Null => state.write_u8(4),
            FieldValue::Composite(record) => {
                state.write_u8(5);
                record.hash(state);
            }
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Str(v) => write!(f, "\"{v}\""),
            FieldValue::Null => write!(f, "null"),
            FieldValue::Composite(record) => write!(f, "<{}>", record.class),
        }
    }
}

/// A class-tagged, versioned composite value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Class tag identifying the registered constructor
    pub class: String,
    /// Version tag; 1 when absent on disk
    pub version: u32,
    /// Field name to value mapping
    pub fields: FieldMap,
}

impl Record {
    /// Creates a version-1 record. Prefer
    /// [`TypeRegistry::instantiate`](crate::registry::TypeRegistry::instantiate),
    /// which stamps the registered latest version.
    pub fn new(class: impl Into<String>, fields: FieldMap) -> Self {
        Self::with_version(class, 1, fields)
    }

    pub fn with_version(class: impl Into<String>, version: u32, fields: FieldMap) -> Self {
        Self {
            class: class.into(),
            version,
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Field value, with absent fields reading as null.
    pub fn field_or_null(&self, field: &str) -> FieldValue {
        self.fields.get(field).cloned().unwrap_or(FieldValue::Null)
    }
}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class.hash(state);
        self.version.hash(state);
        for (name, value) in &self.fields {
            name.hash(state);
            value.hash(state);
        }
    }
}

/// Stable shard index for a primary-key value.
///
/// FxHasher is seed-free, so the same key maps to the same shard across
/// process restarts. The host default hasher is randomized and must not be
/// used here.
pub fn shard_of(key: &FieldValue, shard_count: usize) -> usize {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    (hasher.finish() % shard_count as u64) as usize
}
