//! Database container: entity discovery, locking, and the public API.
//!
//! One reader-writer lock per entity: selects take the read side, every
//! mutation and the eager compaction take the write side. The entity map
//! itself sits behind its own lock; handles are cloned out so no caller
//! holds the map lock across an operation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rayon::prelude::*;

use crate::config::DbConfig;
use crate::entity::{Entity, SCHEMA_FILE};
use crate::error::{DbError, Result};
use crate::query::Filter;
use crate::registry::TypeRegistry;
use crate::schema::EntitySchema;
use crate::value::Record;

type EntityHandle = Arc<RwLock<Entity>>;

pub struct YourDb {
    name: String,
    path: PathBuf,
    config: DbConfig,
    registry: Arc<TypeRegistry>,
    entities: RwLock<HashMap<String, EntityHandle>>,
}

impl YourDb {
    /// Opens (or creates) the database `<cwd>/<name>.yourdb`, replaying
    /// every discovered entity. All classes and upgraders the stored data
    /// needs must already be registered.
    pub fn open(name: &str, registry: Arc<TypeRegistry>) -> Result<Self> {
        Self::open_with_config(name, registry, DbConfig::default())
    }

    pub fn open_with_config(
        name: &str,
        registry: Arc<TypeRegistry>,
        config: DbConfig,
    ) -> Result<Self> {
        let path = config.root_dir.join(format!("{name}.yourdb"));
        let mut entities = HashMap::new();

        if path.exists() {
            for entry in fs::read_dir(&path)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let Some(entity_name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if !entry.path().join(SCHEMA_FILE).exists() {
                    continue;
                }
                let entity = Entity::open(
                    entry.path(),
                    &entity_name,
                    Arc::clone(&registry),
                    config.shard_count,
                )?;
                entities.insert(entity_name, Arc::new(RwLock::new(entity)));
            }
        } else {
            fs::create_dir_all(&path)?;
        }

        tracing::info!(db = name, entities = entities.len(), "opened database");
        Ok(Self {
            name: name.to_string(),
            path,
            config,
            registry,
            entities: RwLock::new(entities),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Creates an entity with an explicit schema, persisted immediately.
    pub fn create_entity(&self, name: &str, schema: EntitySchema) -> Result<()> {
        if !is_valid_entity_name(name) {
            return Err(DbError::InvalidName(name.to_string()));
        }
        let mut entities = self.entities.write();
        if entities.contains_key(name) {
            return Err(DbError::EntityExists(name.to_string()));
        }
        let entity = Entity::create(
            self.path.join(name),
            name,
            schema,
            Arc::clone(&self.registry),
            self.config.shard_count,
        )?;
        entities.insert(name.to_string(), Arc::new(RwLock::new(entity)));
        Ok(())
    }

    /// Drops an entity and removes its directory.
    pub fn drop_entity(&self, name: &str) -> Result<()> {
        let mut entities = self.entities.write();
        entities
            .remove(name)
            .ok_or_else(|| DbError::EntityMissing(name.to_string()))?;
        fs::remove_dir_all(self.path.join(name))?;
        Ok(())
    }

    pub fn list_entities(&self) -> Vec<String> {
        self.entities.read().keys().cloned().collect()
    }

    pub fn insert_into(&self, entity: &str, record: Record) -> Result<()> {
        self.handle(entity)?.write().insert(record)
    }

    /// Batch insert: validation runs in parallel against a read snapshot,
    /// then all appends apply under a single writer-lock acquisition (which
    /// keeps the uniqueness check atomic across shards).
    pub fn insert_parallel(&self, entity: &str, records: Vec<Record>) -> Result<()> {
        let handle = self.handle(entity)?;
        {
            let guard = handle.read();
            let schema = guard.schema();
            let registry = guard.registry();
            records
                .par_iter()
                .try_for_each(|record| schema.check_record(record, registry))?;
        }
        let mut guard = handle.write();
        for record in records {
            guard.insert(record)?;
        }
        Ok(())
    }

    /// Records matching `filter`; `Filter::All` selects everything.
    pub fn select_from(&self, entity: &str, filter: &Filter) -> Result<Vec<Arc<Record>>> {
        Ok(self.handle(entity)?.read().select(filter))
    }

    /// Applies `mutator` to every matching record; returns how many changed.
    pub fn update_entity(
        &self,
        entity: &str,
        filter: &Filter,
        mutator: impl Fn(&Record) -> Record,
    ) -> Result<usize> {
        self.handle(entity)?.write().update(filter, &mutator)
    }

    /// Deletes every matching record; returns how many were removed.
    pub fn delete_from(&self, entity: &str, filter: &Filter) -> Result<usize> {
        self.handle(entity)?.write().delete(filter)
    }

    /// Eager compaction: rewrites the entity's logs as one INSERT per live
    /// record at the latest version.
    pub fn optimize_entity(&self, entity: &str) -> Result<()> {
        self.handle(entity)?.write().optimize()
    }

    /// Number of live records in an entity.
    pub fn entity_count(&self, entity: &str) -> Result<usize> {
        Ok(self.handle(entity)?.read().len())
    }

    fn handle(&self, entity: &str) -> Result<EntityHandle> {
        self.entities
            .read()
            .get(entity)
            .cloned()
            .ok_or_else(|| DbError::EntityMissing(entity.to_string()))
    }
}

impl std::fmt::Debug for YourDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YourDb")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("entities", &self.entities.read().len())
            .finish()
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_valid_entity_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
