//! One-line JSON codec for log entries and record values.
//!
//! Wire grammar, one entry per line:
//!
//! ```text
//! {"op":"INSERT","data":<rec>}
//! {"op":"UPDATE","pk":<prim>,"data":<fieldmap>}
//! {"op":"DELETE","pk":<prim>}
//! <rec> := {"__class__":"<name>","__version__":<int>,"__data__":<fieldmap>} | <primitive>
//! ```
//!
//! `__version__` is optional on read (absent means 1); writers always emit
//! it. Decoding consults the [`TypeRegistry`]: a composite written below the
//! registered latest version runs its upgrade chain over the raw field map
//! before the registered constructor rebuilds the record.

use serde_json::{json, Map, Number, Value};

use crate::error::{DbError, Result};
use crate::registry::TypeRegistry;
use crate::value::{FieldMap, FieldValue, Record};

pub const CLASS_TAG: &str = "__class__";
pub const VERSION_TAG: &str = "__version__";
pub const DATA_TAG: &str = "__data__";

/// A decoded log entry.
#[derive(Debug, Clone)]
pub enum LogOp {
    Insert { data: Record },
    Update { pk: FieldValue, data: FieldMap },
    Delete { pk: FieldValue },
}

pub fn encode_insert(record: &Record, registry: &TypeRegistry) -> Result<String> {
    let data = encode_record(record, registry)?;
    Ok(json!({"op": "INSERT", "data": data}).to_string())
}

pub fn encode_update(pk: &FieldValue, diff: &FieldMap, registry: &TypeRegistry) -> Result<String> {
    let pk = encode_value(pk, registry)?;
    let data = encode_field_map(diff, registry)?;
    Ok(json!({"op": "UPDATE", "pk": pk, "data": data}).to_string())
}

pub fn encode_delete(pk: &FieldValue, registry: &TypeRegistry) -> Result<String> {
    let pk = encode_value(pk, registry)?;
    Ok(json!({"op": "DELETE", "pk": pk}).to_string())
}

pub fn encode_value(value: &FieldValue, registry: &TypeRegistry) -> Result<Value> {
    Ok(match value {
        FieldValue::Int(v) => Value::from(*v),
        FieldValue::Float(v) => Value::Number(Number::from_f64(*v).ok_or_else(|| {
            DbError::Serialization(format!("non-finite float {v} is not storable"))
        })?),
        FieldValue::Bool(v) => Value::from(*v),
        FieldValue::Str(v) => Value::from(v.clone()),
        FieldValue::Null => Value::Null,
        FieldValue::Composite(record) => encode_record(record, registry)?,
    })
}

fn encode_record(record: &Record, registry: &TypeRegistry) -> Result<Value> {
    let fields = registry.decompose(record)?;
    let mut object = Map::new();
    object.insert(CLASS_TAG.to_string(), Value::from(record.class.clone()));
    object.insert(VERSION_TAG.to_string(), Value::from(record.version));
    object.insert(DATA_TAG.to_string(), encode_field_map(&fields, registry)?);
    Ok(Value::Object(object))
}

fn encode_field_map(fields: &FieldMap, registry: &TypeRegistry) -> Result<Value> {
    let mut object = Map::new();
    for (name, value) in fields {
        object.insert(name.clone(), encode_value(value, registry)?);
    }
    Ok(Value::Object(object))
}

/// Decodes one log line. Grammar violations come back as
/// [`DbError::Serialization`]; the replay loop rewraps those with file and
/// line context. Registry failures (`UnknownClass`, `MissingUpgrader`,
/// upgrader errors) pass through unchanged.
pub fn decode_op(line: &str, registry: &TypeRegistry) -> Result<LogOp> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| DbError::Serialization(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| DbError::Serialization("log entry must be a JSON object".to_string()))?;
    let op = object
        .get("op")
        .and_then(Value::as_str)
        .ok_or_else(|| DbError::Serialization("log entry is missing 'op'".to_string()))?;

    match op {
        "INSERT" => {
            let data = required(object, "data")?;
            match decode_value(data, registry)? {
                FieldValue::Composite(record) => Ok(LogOp::Insert { data: record }),
                other => Err(DbError::Serialization(format!(
                    "INSERT data must be a composite, got {}",
                    other.type_name()
                ))),
            }
        }
        "UPDATE" => {
            let pk = decode_value(required(object, "pk")?, registry)?;
            let data = required(object, "data")?
                .as_object()
                .ok_or_else(|| DbError::Serialization("UPDATE data must be an object".to_string()))?;
            Ok(LogOp::Update {
                pk,
                data: decode_field_map(data, registry)?,
            })
        }
        "DELETE" => {
            let pk = decode_value(required(object, "pk")?, registry)?;
            Ok(LogOp::Delete { pk })
        }
        other => Err(DbError::Serialization(format!("unknown op tag '{other}'"))),
    }
}

fn required<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a Value> {
    object
        .get(key)
        .ok_or_else(|| DbError::Serialization(format!("log entry is missing '{key}'")))
}

pub fn decode_value(value: &Value, registry: &TypeRegistry) -> Result<FieldValue> {
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
        Value::Object(object) => FieldValue::Composite(decode_record(object, registry)?),
        Value::Array(_) => {
            return Err(DbError::Serialization(
                "arrays are not storable values".to_string(),
            ))
        }
    })
}

fn decode_record(object: &Map<String, Value>, registry: &TypeRegistry) -> Result<Record> {
    let class = object
        .get(CLASS_TAG)
        .and_then(Value::as_str)
        .ok_or_else(|| DbError::Serialization(format!("object without {CLASS_TAG} tag")))?;
    let version = match object.get(VERSION_TAG) {
        None => 1,
        Some(v) => v.as_u64().and_then(|v| u32::try_from(v).ok()).ok_or_else(|| {
            DbError::Serialization(format!("{VERSION_TAG} must be a positive integer"))
        })?,
    };
    let data = object
        .get(DATA_TAG)
        .and_then(Value::as_object)
        .ok_or_else(|| DbError::Serialization(format!("composite without {DATA_TAG} map")))?;
    let fields = decode_field_map(data, registry)?;
    registry.construct(class, version, fields)
}

fn decode_field_map(object: &Map<String, Value>, registry: &TypeRegistry) -> Result<FieldMap> {
    let mut fields = FieldMap::new();
    for (name, value) in object {
        fields.insert(name.clone(), decode_value(value, registry)?);
    }
    Ok(fields)
}
