//! Entity operations: insert, select, update, delete, optimize.
//!
//! Every mutation appends to the owning shard's log before touching the
//! in-memory state, so a failed append leaves memory (and the indexes)
//! exactly as they were.

use std::sync::Arc;

use crate::error::{DbError, Result};
use crate::query::{self, Filter};
use crate::value::{FieldMap, Record};

use super::Entity;

impl Entity {
    /// Validates and inserts one record.
    pub fn insert(&mut self, mut record: Record) -> Result<()> {
        self.schema.check_record(&record, &self.registry)?;
        // Writers always emit the registered latest version
        if let Some(latest) = self.registry.latest_version(&record.class) {
            record.version = latest;
        }

        let pk = record
            .get(&self.schema.primary_key)
            .cloned()
            .filter(|value| !value.is_null())
            .ok_or_else(|| DbError::NullPrimaryKey {
                field: self.schema.primary_key.clone(),
            })?;
        if self.primary_keys.contains(&pk) {
            return Err(DbError::DuplicatePrimaryKey {
                key: pk.to_string(),
            });
        }

        let shard_index = self.shard_index(&pk);
        let (shards, primary_keys, indexes) = self.parts_mut();
        let shard = &mut shards[shard_index];
        shard.append_insert(&record)?;

        let record = Arc::new(record);
        indexes.insert(&pk, &record);
        shard.records.insert(pk.clone(), record);
        primary_keys.insert(pk);
        Ok(())
    }

    /// Records matching `filter`, in traversal order (not contractual).
    pub fn select(&self, filter: &Filter) -> Vec<Arc<Record>> {
        match filter {
            Filter::All => self.iter_records().map(|(_, record)| Arc::clone(record)).collect(),
            Filter::Predicate(predicate) => self
                .iter_records()
                .filter(|(_, record)| predicate(record))
                .map(|(_, record)| Arc::clone(record))
                .collect(),
            Filter::Where(map) => match query::index_candidates(map, self.indexes()) {
                Some(candidates) => candidates
                    .iter()
                    .filter_map(|pk| self.record_for(pk))
                    .filter(|record| query::matches_map(map, record))
                    .map(Arc::clone)
                    .collect(),
                None => self
                    .iter_records()
                    .filter(|(_, record)| query::matches_map(map, record))
                    .map(|(_, record)| Arc::clone(record))
                    .collect(),
            },
        }
    }

    /// Applies a pure mutator to every record matching `filter`. The diff
    /// against the pre-image is logged; empty diffs are skipped entirely.
    /// Returns the number of records that actually changed.
    ///
    /// All post-images are validated before anything is applied, so a
    /// misbehaving mutator cannot leave a partially-updated selection.
    pub fn update(&mut self, filter: &Filter, mutator: &dyn Fn(&Record) -> Record) -> Result<usize> {
        let matched = self.select(filter);
        let pk_field = self.schema.primary_key.clone();

        let mut staged = Vec::new();
        for old in matched {
            let mut new = mutator(&old);
            let pk = old.field_or_null(&pk_field);
            if new.field_or_null(&pk_field) != pk {
                return Err(DbError::PrimaryKeyChanged { key: pk.to_string() });
            }
            if new.class != old.class {
                return Err(DbError::TypeMismatch {
                    field: "__class__".to_string(),
                    expected: old.class.clone(),
                    got: new.class.clone(),
                });
            }
            self.schema.check_record(&new, &self.registry)?;
            new.version = old.version;

            let diff = field_diff(&old, &new);
            if !diff.is_empty() {
                staged.push((pk, old, new, diff));
            }
        }

        let changed = staged.len();
        for (pk, old, new, diff) in staged {
            let shard_index = self.shard_index(&pk);
            let (shards, _, indexes) = self.parts_mut();
            let shard = &mut shards[shard_index];
            shard.append_update(&pk, &diff)?;

            let new = Arc::new(new);
            indexes.update(&pk, &old, &new);
            shard.records.insert(pk, new);
        }
        Ok(changed)
    }

    /// Deletes every record matching `filter`; returns how many went away.
    pub fn delete(&mut self, filter: &Filter) -> Result<usize> {
        let matched = self.select(filter);
        let pk_field = self.schema.primary_key.clone();
        let mut removed = 0;

        for record in matched {
            let pk = record.field_or_null(&pk_field);
            let shard_index = self.shard_index(&pk);
            let (shards, primary_keys, indexes) = self.parts_mut();
            let shard = &mut shards[shard_index];
            shard.append_delete(&pk)?;

            shard.records.remove(&pk);
            primary_keys.remove(&pk);
            indexes.remove(&pk, &record);
            removed += 1;
        }
        Ok(removed)
    }

    /// Eager compaction: rewrites every shard log as one INSERT per live
    /// record at the current version.
    pub fn optimize(&mut self) -> Result<()> {
        let (shards, _, _) = self.parts_mut();
        for shard in shards.iter_mut() {
            shard.rewrite()?;
        }
        tracing::info!(entity = %self.name(), records = self.len(), "optimized entity");
        Ok(())
    }
}

/// Fields whose value differs between the pre- and post-image. Schema
/// validation guarantees both carry the same field set, so a value diff is
/// the whole story and replay's merge reproduces the post-image.
fn field_diff(old: &Record, new: &Record) -> FieldMap {
    new.fields
        .iter()
        .filter(|&(name, value)| old.get(name) != Some(value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
