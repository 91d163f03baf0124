//! Replay and reopen behavior.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;

use serde_json::json;
use tempfile::tempdir;

use yourdb_core::{DbError, FieldValue, Filter, Record};

use crate::helpers::{employee, employee_registry, employee_schema, open_db};

#[test]
fn reopen_reproduces_the_state_at_close() {
    let dir = tempdir().unwrap();
    let registry = employee_registry();

    let before: BTreeMap<i64, Record> = {
        let db = open_db(dir.path(), "company", registry.clone());
        db.create_entity("employees", employee_schema()).unwrap();
        for record in crate::helpers::range_fixture() {
            db.insert_into("employees", record).unwrap();
        }
        db.update_entity(
            "employees",
            &Filter::parse(&json!({"department": "HR"})).unwrap(),
            |record| {
                let mut new = record.clone();
                new.fields
                    .insert("department".into(), FieldValue::Str("People".into()));
                new
            },
        )
        .unwrap();
        db.delete_from("employees", &Filter::parse(&json!({"emp_id": 102})).unwrap())
            .unwrap();

        db.select_from("employees", &Filter::All)
            .unwrap()
            .into_iter()
            .map(|record| {
                let id = match record.get("emp_id") {
                    Some(FieldValue::Int(id)) => *id,
                    other => panic!("unexpected emp_id {other:?}"),
                };
                (id, (*record).clone())
            })
            .collect()
    };

    let db = open_db(dir.path(), "company", registry);
    assert_eq!(db.list_entities(), vec!["employees".to_string()]);

    let after: BTreeMap<i64, Record> = db
        .select_from("employees", &Filter::All)
        .unwrap()
        .into_iter()
        .map(|record| {
            let id = match record.get("emp_id") {
                Some(FieldValue::Int(id)) => *id,
                other => panic!("unexpected emp_id {other:?}"),
            };
            (id, (*record).clone())
        })
        .collect();

    assert_eq!(before, after);
}

#[test]
fn indexes_are_rebuilt_on_reopen() {
    let dir = tempdir().unwrap();
    let registry = employee_registry();

    {
        let db = open_db(dir.path(), "company", registry.clone());
        let schema = employee_schema().with_indexes(vec!["department".to_string()]);
        db.create_entity("employees", schema).unwrap();
        for record in crate::helpers::range_fixture() {
            db.insert_into("employees", record).unwrap();
        }
    }

    let db = open_db(dir.path(), "company", registry);
    let found = db
        .select_from(
            "employees",
            &Filter::parse(&json!({"department": "Engineering"})).unwrap(),
        )
        .unwrap();
    assert_eq!(found.len(), 3);
}

#[test]
fn every_key_lives_in_exactly_one_shard() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "company", employee_registry());
    db.create_entity("employees", employee_schema()).unwrap();
    for i in 0..500 {
        db.insert_into("employees", employee(i, &format!("e{i}"), "Ops", i * 10))
            .unwrap();
    }

    // The union of per-shard contents equals the key set: selecting all
    // must yield each key exactly once.
    let all = db.select_from("employees", &Filter::All).unwrap();
    let keys: HashSet<i64> = all
        .iter()
        .map(|record| match record.get("emp_id") {
            Some(FieldValue::Int(id)) => *id,
            other => panic!("unexpected emp_id {other:?}"),
        })
        .collect();
    assert_eq!(all.len(), 500);
    assert_eq!(keys.len(), 500);
    assert_eq!(db.entity_count("employees").unwrap(), 500);
}

#[test]
fn malformed_log_line_fails_the_entity_open() {
    let dir = tempdir().unwrap();
    let registry = employee_registry();

    {
        let db = open_db(dir.path(), "company", registry.clone());
        db.create_entity("employees", employee_schema()).unwrap();
        db.insert_into("employees", employee(1, "Ada", "Eng", 1))
            .unwrap();
    }

    // Scribble over one shard log
    let shard = yourdb_core::value::shard_of(&FieldValue::Int(1), 10);
    let path = dir
        .path()
        .join("company.yourdb")
        .join("employees")
        .join(format!("employees_shard_{shard}.log"));
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    writeln!(file, "{{not json").unwrap();

    let config = yourdb_core::DbConfig {
        root_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    assert!(matches!(
        yourdb_core::YourDb::open_with_config("company", registry, config),
        Err(DbError::CorruptLog { .. })
    ));
}

#[test]
fn unregistered_class_fails_the_entity_open() {
    let dir = tempdir().unwrap();
    {
        let db = open_db(dir.path(), "company", employee_registry());
        db.create_entity("employees", employee_schema()).unwrap();
        db.insert_into("employees", employee(1, "Ada", "Eng", 1))
            .unwrap();
    }

    let empty = std::sync::Arc::new(yourdb_core::TypeRegistry::new());
    let config = yourdb_core::DbConfig {
        root_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    assert!(matches!(
        yourdb_core::YourDb::open_with_config("company", empty, config),
        Err(DbError::UnknownClass(_))
    ));
}

#[test]
fn entity_lifecycle_errors() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), "company", employee_registry());

    assert!(matches!(
        db.create_entity("2fast", employee_schema()),
        Err(DbError::InvalidName(_))
    ));

    db.create_entity("employees", employee_schema()).unwrap();
    assert!(matches!(
        db.create_entity("employees", employee_schema()),
        Err(DbError::EntityExists(_))
    ));

    assert!(matches!(
        db.insert_into("ghosts", employee(1, "x", "y", 1)),
        Err(DbError::EntityMissing(_))
    ));
    assert!(matches!(
        db.drop_entity("ghosts"),
        Err(DbError::EntityMissing(_))
    ));

    db.drop_entity("employees").unwrap();
    assert!(!dir.path().join("company.yourdb").join("employees").exists());

    // The name is free again
    db.create_entity("employees", employee_schema()).unwrap();
    assert_eq!(db.entity_count("employees").unwrap(), 0);
}

#[test]
fn custom_shard_count_survives_reopen_with_default_config() {
    let dir = tempdir().unwrap();
    let registry = employee_registry();

    {
        let config = yourdb_core::DbConfig {
            root_dir: dir.path().to_path_buf(),
            shard_count: 3,
        };
        let db =
            yourdb_core::YourDb::open_with_config("company", registry.clone(), config).unwrap();
        db.create_entity("employees", employee_schema()).unwrap();
        for i in 0..50 {
            db.insert_into("employees", employee(i, &format!("e{i}"), "Ops", i))
                .unwrap();
        }
    }

    // Default config (10 shards) must still route lookups into the three
    // existing logs discovered on disk.
    let db = open_db(dir.path(), "company", registry);
    assert_eq!(db.entity_count("employees").unwrap(), 50);
    let found = db
        .select_from("employees", &Filter::parse(&json!({"emp_id": 17})).unwrap())
        .unwrap();
    assert_eq!(found.len(), 1);
}
