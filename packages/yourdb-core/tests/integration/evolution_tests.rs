//! Lazy chained upgrades and eager compaction.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use yourdb_core::value::shard_of;
use yourdb_core::{
    EntitySchema, FieldMap, FieldType, FieldValue, Filter, Record, TypeRegistry,
};

use crate::helpers::open_db;

/// User history: v1 carries a full `name`; v2 adds `middle_name`; v3 splits
/// `name` into `first_name`/`last_name`.
fn user_registry() -> Arc<TypeRegistry> {
    let registry = TypeRegistry::new();
    registry.register("User", 3);
    registry
        .register_upgrade("User", 1, 2, |mut fields| {
            fields.insert("middle_name".into(), FieldValue::Null);
            Ok(fields)
        })
        .unwrap();
    registry
        .register_upgrade("User", 2, 3, |mut fields| {
            let full = match fields.remove("name") {
                Some(FieldValue::Str(name)) => name,
                _ => String::new(),
            };
            let (first, last) = match full.split_once(' ') {
                Some((first, last)) => (first.to_string(), last.to_string()),
                None => (full, String::new()),
            };
            fields.insert("first_name".into(), FieldValue::Str(first));
            fields.insert("last_name".into(), FieldValue::Str(last));
            Ok(fields)
        })
        .unwrap();
    Arc::new(registry)
}

fn user_schema() -> EntitySchema {
    let mut fields = BTreeMap::new();
    fields.insert("user_id".to_string(), FieldType::Int);
    fields.insert("first_name".to_string(), FieldType::Str);
    fields.insert("last_name".to_string(), FieldType::Str);
    fields.insert("middle_name".to_string(), FieldType::Str);
    EntitySchema::new("user_id", fields)
}

/// Appends raw legacy lines to the shard log their primary key routes to.
fn inject_legacy_users(db_root: &std::path::Path) {
    let v1 = json!({"op": "INSERT", "data": {
        "__class__": "User",
        "__data__": {"user_id": 101, "name": "Charlie Brown"}
    }});
    let v2 = json!({"op": "INSERT", "data": {
        "__class__": "User", "__version__": 2,
        "__data__": {"user_id": 201, "name": "Bob Johnson", "middle_name": "Jay"}
    }});

    for (id, line) in [(101, v1), (201, v2)] {
        let shard = shard_of(&FieldValue::Int(id), 10);
        let path = db_root
            .join("testdb.yourdb")
            .join("users")
            .join(format!("users_shard_{shard}.log"));
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        writeln!(file, "{line}").unwrap();
    }
}

fn find_user(users: &[Arc<Record>], id: i64) -> &Record {
    users
        .iter()
        .find(|u| u.get("user_id") == Some(&FieldValue::Int(id)))
        .unwrap_or_else(|| panic!("user {id} not found"))
}

#[test]
fn legacy_records_upgrade_through_the_chain_on_read() {
    let dir = tempdir().unwrap();
    let registry = user_registry();

    {
        let db = open_db(dir.path(), "testdb", Arc::clone(&registry));
        db.create_entity("users", user_schema()).unwrap();

        let mut fields = FieldMap::new();
        fields.insert("user_id".into(), FieldValue::Int(301));
        fields.insert("first_name".into(), FieldValue::Str("Alice".into()));
        fields.insert("last_name".into(), FieldValue::Str("Williams".into()));
        fields.insert("middle_name".into(), FieldValue::Str("Marie".into()));
        let alice = registry.instantiate("User", fields).unwrap();
        db.insert_into("users", alice).unwrap();
    }

    inject_legacy_users(dir.path());

    let db = open_db(dir.path(), "testdb", Arc::clone(&registry));
    let users = db.select_from("users", &Filter::All).unwrap();
    assert_eq!(users.len(), 3);

    // v1: upgraded twice (middle_name added, then name split)
    let charlie = find_user(&users, 101);
    assert_eq!(charlie.version, 3);
    assert_eq!(charlie.get("first_name"), Some(&FieldValue::Str("Charlie".into())));
    assert_eq!(charlie.get("last_name"), Some(&FieldValue::Str("Brown".into())));
    assert_eq!(charlie.get("middle_name"), Some(&FieldValue::Null));

    // v2: upgraded once, middle name preserved
    let bob = find_user(&users, 201);
    assert_eq!(bob.get("first_name"), Some(&FieldValue::Str("Bob".into())));
    assert_eq!(bob.get("last_name"), Some(&FieldValue::Str("Johnson".into())));
    assert_eq!(bob.get("middle_name"), Some(&FieldValue::Str("Jay".into())));

    // v3: untouched
    let alice = find_user(&users, 301);
    assert_eq!(alice.get("first_name"), Some(&FieldValue::Str("Alice".into())));
    assert_eq!(alice.get("middle_name"), Some(&FieldValue::Str("Marie".into())));
}

#[test]
fn compaction_rewrites_everything_at_the_latest_version() {
    let dir = tempdir().unwrap();
    let registry = user_registry();

    {
        let db = open_db(dir.path(), "testdb", Arc::clone(&registry));
        db.create_entity("users", user_schema()).unwrap();

        let mut fields = FieldMap::new();
        fields.insert("user_id".into(), FieldValue::Int(301));
        fields.insert("first_name".into(), FieldValue::Str("Alice".into()));
        fields.insert("last_name".into(), FieldValue::Str("Williams".into()));
        fields.insert("middle_name".into(), FieldValue::Str("Marie".into()));
        db.insert_into("users", registry.instantiate("User", fields).unwrap())
            .unwrap();
    }
    inject_legacy_users(dir.path());

    let db = open_db(dir.path(), "testdb", Arc::clone(&registry));
    let before = db.select_from("users", &Filter::All).unwrap();
    db.optimize_entity("users").unwrap();

    // On disk: exactly three INSERT lines, all at version 3
    let users_dir = dir.path().join("testdb.yourdb").join("users");
    let mut insert_lines = 0;
    for entry in std::fs::read_dir(&users_dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            assert!(line.contains(r#""op":"INSERT""#), "unexpected op in {line}");
            assert!(line.contains(r#""__version__":3"#), "stale version in {line}");
            insert_lines += 1;
        }
    }
    assert_eq!(insert_lines, 3);

    // Replaying the compacted logs reproduces the same state
    drop(db);
    let db = open_db(dir.path(), "testdb", registry);
    let after = db.select_from("users", &Filter::All).unwrap();
    assert_eq!(after.len(), 3);
    for record in &before {
        let id = match record.get("user_id") {
            Some(FieldValue::Int(id)) => *id,
            other => panic!("unexpected user_id {other:?}"),
        };
        assert_eq!(find_user(&after, id), &**record);
    }
}

#[test]
fn gap_in_the_upgrade_chain_aborts_open() {
    let dir = tempdir().unwrap();

    // Full chain to write a legacy v1 record
    {
        let db = open_db(dir.path(), "testdb", user_registry());
        db.create_entity("users", user_schema()).unwrap();
    }
    inject_legacy_users(dir.path());

    // Reopen with v1 -> v2 missing
    let partial = TypeRegistry::new();
    partial.register("User", 3);
    partial
        .register_upgrade("User", 2, 3, |fields| Ok(fields))
        .unwrap();

    let config = yourdb_core::DbConfig {
        root_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    match yourdb_core::YourDb::open_with_config("testdb", Arc::new(partial), config) {
        Err(yourdb_core::DbError::MissingUpgrader { class, from }) => {
            assert_eq!(class, "User");
            assert_eq!(from, 1);
        }
        other => panic!("expected MissingUpgrader, got {other:?}"),
    }
}
