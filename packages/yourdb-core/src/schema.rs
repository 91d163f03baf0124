//! Entity schemas and the `schema.json` wire form.
//!
//! A schema is stored flat: the reserved keys `primary_key` and `indexes`
//! sit alongside one key per declared field, each mapping to a type
//! descriptor string (`int`, `float`, `bool`, `str`, or a registered class
//! name).

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DbError, Result};
use crate::registry::TypeRegistry;
use crate::value::{FieldValue, Record};

/// Declared type of a schema field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Float,
    Bool,
    Str,
    /// A registered composite class, by class tag
    Class(String),
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Str => "str",
            FieldType::Class(name) => name,
        }
    }

    pub fn parse(descriptor: &str) -> Self {
        match descriptor {
            "int" => FieldType::Int,
            "float" => FieldType::Float,
            "bool" => FieldType::Bool,
            "str" => FieldType::Str,
            other => FieldType::Class(other.to_string()),
        }
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, FieldType::Class(_))
    }

    fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (FieldType::Int, FieldValue::Int(_))
                | (FieldType::Float, FieldValue::Float(_))
                | (FieldType::Bool, FieldValue::Bool(_))
                | (FieldType::Str, FieldValue::Str(_))
        )
    }
}

/// Schema of one entity: field types, primary key, indexed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    pub primary_key: String,
    pub fields: BTreeMap<String, FieldType>,
    pub indexes: Vec<String>,
}

impl EntitySchema {
    pub fn new(primary_key: impl Into<String>, fields: BTreeMap<String, FieldType>) -> Self {
        Self {
            primary_key: primary_key.into(),
            fields,
            indexes: Vec::new(),
        }
    }

    pub fn with_indexes(mut self, indexes: Vec<String>) -> Self {
        self.indexes = indexes;
        self
    }

    /// Structural validation, run once at entity creation.
    pub fn validate(&self, entity: &str) -> Result<()> {
        let invalid = |reason: String| DbError::InvalidSchema {
            entity: entity.to_string(),
            reason,
        };

        if self.fields.is_empty() {
            return Err(invalid("schema declares no fields".to_string()));
        }
        for reserved in ["primary_key", "indexes"] {
            if self.fields.contains_key(reserved) {
                return Err(invalid(format!("'{reserved}' is a reserved key")));
            }
        }
        let pk_type = self
            .fields
            .get(&self.primary_key)
            .ok_or_else(|| invalid(format!("primary key '{}' is not a declared field", self.primary_key)))?;
        if !pk_type.is_primitive() {
            return Err(invalid(format!(
                "primary key '{}' must have a primitive type",
                self.primary_key
            )));
        }
        for indexed in &self.indexes {
            if !self.fields.contains_key(indexed) {
                return Err(invalid(format!("indexed field '{indexed}' is not declared")));
            }
        }
        Ok(())
    }

    /// Validates a record against this schema: no undeclared fields, every
    /// declared field present, non-null values of the declared type,
    /// class-tagged fields carrying a matching registered composite.
    pub fn check_record(&self, record: &Record, registry: &TypeRegistry) -> Result<()> {
        if !registry.contains(&record.class) {
            return Err(DbError::UnknownClass(record.class.clone()));
        }
        for field in record.fields.keys() {
            if !self.fields.contains_key(field) {
                return Err(DbError::UnknownField {
                    field: field.clone(),
                });
            }
        }
        for (field, declared) in &self.fields {
            let value = record.get(field).ok_or_else(|| DbError::TypeMismatch {
                field: field.clone(),
                expected: declared.as_str().to_string(),
                got: "missing".to_string(),
            })?;
            if value.is_null() {
                if field == &self.primary_key {
                    return Err(DbError::NullPrimaryKey {
                        field: field.clone(),
                    });
                }
                continue;
            }
            match declared {
                FieldType::Class(class) => {
                    if !registry.contains(class) {
                        return Err(DbError::UnknownClass(class.clone()));
                    }
                    match value {
                        FieldValue::Composite(nested) if &nested.class == class => {}
                        other => {
                            return Err(DbError::TypeMismatch {
                                field: field.clone(),
                                expected: class.clone(),
                                got: other.type_name(),
                            })
                        }
                    }
                }
                primitive => {
                    if !primitive.accepts(value) {
                        return Err(DbError::TypeMismatch {
                            field: field.clone(),
                            expected: primitive.as_str().to_string(),
                            got: value.type_name(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes the schema file atomically: temp sibling, sync, rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        let temp = path.with_extension("json.tmp");
        let mut file = File::create(&temp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp, path)?;
        Ok(())
    }

    pub fn load(path: &Path, entity: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| DbError::InvalidSchema {
            entity: entity.to_string(),
            reason: e.to_string(),
        })
    }
}

impl Serialize for EntitySchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let entries = 1 + self.fields.len() + usize::from(!self.indexes.is_empty());
        let mut map = serializer.serialize_map(Some(entries))?;
        map.serialize_entry("primary_key", &self.primary_key)?;
        for (field, ty) in &self.fields {
            map.serialize_entry(field, ty.as_str())?;
        }
        if !self.indexes.is_empty() {
            map.serialize_entry("indexes", &self.indexes)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EntitySchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let object = value
            .as_object()
            .ok_or_else(|| D::Error::custom("schema must be a JSON object"))?;

        let primary_key = object
            .get("primary_key")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| D::Error::custom("schema is missing 'primary_key'"))?
            .to_string();

        let indexes = match object.get("indexes") {
            None => Vec::new(),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| D::Error::custom("'indexes' entries must be strings"))
                })
                .collect::<std::result::Result<_, _>>()?,
            Some(_) => return Err(D::Error::custom("'indexes' must be an array")),
        };

        let mut fields = BTreeMap::new();
        for (key, descriptor) in object {
            if key == "primary_key" || key == "indexes" {
                continue;
            }
            let descriptor = descriptor
                .as_str()
                .ok_or_else(|| D::Error::custom(format!("field '{key}' must map to a type string")))?;
            fields.insert(key.clone(), FieldType::parse(descriptor));
        }

        Ok(EntitySchema {
            primary_key,
            fields,
            indexes,
        })
    }
}
