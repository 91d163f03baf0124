//! Shared fixtures for the integration suite.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use yourdb_core::{
    DbConfig, EntitySchema, FieldMap, FieldType, FieldValue, Record, TypeRegistry, YourDb,
};

/// Opens a database rooted inside a temp directory.
pub fn open_db(root: &Path, name: &str, registry: Arc<TypeRegistry>) -> YourDb {
    let config = DbConfig {
        root_dir: root.to_path_buf(),
        ..Default::default()
    };
    YourDb::open_with_config(name, registry, config).unwrap()
}

pub fn employee_registry() -> Arc<TypeRegistry> {
    let registry = TypeRegistry::new();
    registry.register("Employee", 1);
    Arc::new(registry)
}

pub fn employee_schema() -> EntitySchema {
    let mut fields = BTreeMap::new();
    fields.insert("emp_id".to_string(), FieldType::Int);
    fields.insert("name".to_string(), FieldType::Str);
    fields.insert("department".to_string(), FieldType::Str);
    fields.insert("salary".to_string(), FieldType::Int);
    EntitySchema::new("emp_id", fields)
}

pub fn employee(id: i64, name: &str, dept: &str, salary: i64) -> Record {
    let mut fields = FieldMap::new();
    fields.insert("emp_id".into(), FieldValue::Int(id));
    fields.insert("name".into(), FieldValue::Str(name.into()));
    fields.insert("department".into(), FieldValue::Str(dept.into()));
    fields.insert("salary".into(), FieldValue::Int(salary));
    Record::new("Employee", fields)
}

/// The seven-employee fixture used by the range-operator scenarios.
pub fn range_fixture() -> Vec<Record> {
    vec![
        employee(101, "Alice", "Engineering", 90_000),
        employee(102, "Bob", "Sales", 75_000),
        employee(103, "Charlie", "Engineering", 110_000),
        employee(104, "Diana", "Sales", 82_000),
        employee(105, "Eve", "HR", 95_000),
        employee(106, "Frank", "Engineering", 70_000),
        employee(107, "Grace", "HR", 120_000),
    ]
}

pub fn ids_of(records: &[Arc<Record>]) -> Vec<i64> {
    let mut ids: Vec<i64> = records
        .iter()
        .map(|record| match record.get("emp_id") {
            Some(FieldValue::Int(id)) => *id,
            other => panic!("unexpected emp_id {other:?}"),
        })
        .collect();
    ids.sort_unstable();
    ids
}
