//! Entity store: a schema-bound record collection over N shard logs.
//!
//! An entity owns its shard logs, the global primary-key set, and the
//! secondary indexes. Shard assignment is `hash(pk) mod P` with a stable
//! hash, so a record always replays into the shard that logged it.

mod ops;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::Result;
use crate::index::IndexManager;
use crate::registry::TypeRegistry;
use crate::schema::EntitySchema;
use crate::shard::Shard;
use crate::value::{shard_of, FieldValue, Record};

pub const SCHEMA_FILE: &str = "schema.json";

pub struct Entity {
    name: String,
    schema: EntitySchema,
    shards: Vec<Shard>,
    primary_keys: HashSet<FieldValue>,
    indexes: IndexManager,
    registry: Arc<TypeRegistry>,
}

impl Entity {
    /// Creates a new entity: validates the schema, persists it, and touches
    /// the full set of empty shard logs so reopen discovery sees them.
    pub fn create(
        path: PathBuf,
        name: &str,
        schema: EntitySchema,
        registry: Arc<TypeRegistry>,
        shard_count: usize,
    ) -> Result<Self> {
        schema.validate(name)?;
        fs::create_dir_all(&path)?;
        schema.save(&path.join(SCHEMA_FILE))?;

        let mut shards = Vec::with_capacity(shard_count);
        for index in 0..shard_count {
            shards.push(Shard::open(
                shard_path(&path, name, index),
                &schema.primary_key,
                Arc::clone(&registry),
            )?);
        }

        let indexes = IndexManager::new(&schema.indexes);
        tracing::debug!(entity = name, shards = shard_count, "created entity");
        Ok(Self {
            name: name.to_string(),
            schema,
            shards,
            primary_keys: HashSet::new(),
            indexes,
            registry,
        })
    }

    /// Reopens an existing entity: loads the schema, replays every shard
    /// log in parallel, then rebuilds the primary-key set and indexes.
    pub fn open(
        path: PathBuf,
        name: &str,
        registry: Arc<TypeRegistry>,
        fallback_shard_count: usize,
    ) -> Result<Self> {
        let schema = EntitySchema::load(&path.join(SCHEMA_FILE), name)?;
        schema.validate(name)?;

        let shard_count = discover_shard_count(&path, name)?.unwrap_or(fallback_shard_count);
        let shards: Vec<Shard> = (0..shard_count)
            .into_par_iter()
            .map(|index| {
                Shard::open(
                    shard_path(&path, name, index),
                    &schema.primary_key,
                    Arc::clone(&registry),
                )
            })
            .collect::<Result<_>>()?;

        let mut primary_keys = HashSet::new();
        for shard in &shards {
            primary_keys.extend(shard.records.keys().cloned());
        }
        let mut indexes = IndexManager::new(&schema.indexes);
        indexes.rebuild(
            shards
                .iter()
                .flat_map(|shard| shard.records.iter().map(|(pk, rec)| (pk, &**rec))),
        );

        tracing::info!(
            entity = name,
            shards = shard_count,
            records = primary_keys.len(),
            "replayed entity"
        );
        Ok(Self {
            name: name.to_string(),
            schema,
            shards,
            primary_keys,
            indexes,
            registry,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Number of live records across all shards.
    pub fn len(&self) -> usize {
        self.primary_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary_keys.is_empty()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub(crate) fn shard_index(&self, pk: &FieldValue) -> usize {
        shard_of(pk, self.shards.len())
    }

    pub(crate) fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub(crate) fn record_for(&self, pk: &FieldValue) -> Option<&Arc<Record>> {
        self.shards[self.shard_index(pk)].get(pk)
    }

    pub(crate) fn iter_records(&self) -> impl Iterator<Item = (&FieldValue, &Arc<Record>)> {
        self.shards.iter().flat_map(|shard| shard.records.iter())
    }

    // split borrows for ops that mutate a shard and the indexes together
    pub(crate) fn parts_mut(&mut self) -> (&mut Vec<Shard>, &mut HashSet<FieldValue>, &mut IndexManager) {
        (&mut self.shards, &mut self.primary_keys, &mut self.indexes)
    }

    pub(crate) fn indexes(&self) -> &IndexManager {
        &self.indexes
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.name)
            .field("shards", &self.shards.len())
            .field("records", &self.primary_keys.len())
            .finish()
    }
}

pub(crate) fn shard_path(entity_path: &Path, name: &str, index: usize) -> PathBuf {
    entity_path.join(format!("{name}_shard_{index}.log"))
}

/// Shard count from the log files present on disk, so entities created
/// with a non-default count reopen correctly. `None` when no logs exist.
fn discover_shard_count(entity_path: &Path, name: &str) -> Result<Option<usize>> {
    let prefix = format!("{name}_shard_");
    let mut highest: Option<usize> = None;
    for entry in fs::read_dir(entity_path)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(index) = file_name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".log"))
            .and_then(|digits| digits.parse::<usize>().ok())
        else {
            continue;
        };
        highest = Some(highest.map_or(index, |h| h.max(index)));
    }
    Ok(highest.map(|h| h + 1))
}
