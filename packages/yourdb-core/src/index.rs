//! In-memory secondary indexes.
//!
//! One index per configured field: field value -> set of primary keys.
//! Indexes are never persisted; they are rebuilt from the materialized
//! shard maps when an entity opens.

use std::collections::{HashMap, HashSet};

use crate::value::{FieldValue, Record};

#[derive(Debug, Default)]
pub struct IndexManager {
    indexes: HashMap<String, HashMap<FieldValue, HashSet<FieldValue>>>,
}

impl IndexManager {
    pub fn new(fields: &[String]) -> Self {
        Self {
            indexes: fields
                .iter()
                .map(|field| (field.clone(), HashMap::new()))
                .collect(),
        }
    }

    /// Whether `field` is indexed.
    pub fn covers(&self, field: &str) -> bool {
        self.indexes.contains_key(field)
    }

    pub fn lookup(&self, field: &str, value: &FieldValue) -> Option<&HashSet<FieldValue>> {
        self.indexes.get(field)?.get(value)
    }

    pub fn insert(&mut self, pk: &FieldValue, record: &Record) {
        for (field, buckets) in &mut self.indexes {
            let value = record.field_or_null(field);
            buckets.entry(value).or_default().insert(pk.clone());
        }
    }

    pub fn remove(&mut self, pk: &FieldValue, record: &Record) {
        for (field, buckets) in &mut self.indexes {
            let value = record.field_or_null(field);
            if let Some(bucket) = buckets.get_mut(&value) {
                bucket.remove(pk);
                if bucket.is_empty() {
                    buckets.remove(&value);
                }
            }
        }
    }

    /// Moves `pk` between buckets for every indexed field whose value
    /// changed between `old` and `new`.
    pub fn update(&mut self, pk: &FieldValue, old: &Record, new: &Record) {
        for (field, buckets) in &mut self.indexes {
            let old_value = old.field_or_null(field);
            let new_value = new.field_or_null(field);
            if old_value == new_value {
                continue;
            }
            if let Some(bucket) = buckets.get_mut(&old_value) {
                bucket.remove(pk);
                if bucket.is_empty() {
                    buckets.remove(&old_value);
                }
            }
            buckets.entry(new_value).or_default().insert(pk.clone());
        }
    }

    pub fn rebuild<'a>(&mut self, records: impl Iterator<Item = (&'a FieldValue, &'a Record)>) {
        for buckets in self.indexes.values_mut() {
            buckets.clear();
        }
        for (pk, record) in records {
            self.insert(pk, record);
        }
    }
}
