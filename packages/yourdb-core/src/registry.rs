//! Class registry: constructors, decomposers, and upgrade chains.
//!
//! The registry is an external collaborator of the engine. Callers register
//! every class tag the store will encounter, plus one upgrade function per
//! version step, before opening a database. Constructors, decomposers, and
//! upgraders are required to be pure and total for the inputs the previous
//! version produced.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{DbError, Result};
use crate::value::{FieldMap, Record};

/// Rehydrates a record from a post-upgrade field map.
pub type ConstructFn = Arc<dyn Fn(FieldMap) -> Result<Record> + Send + Sync>;
/// Produces the field map written to disk for a record.
pub type DecomposeFn = Arc<dyn Fn(&Record) -> FieldMap + Send + Sync>;
/// Transforms a field map from one version to the next.
pub type UpgradeFn = Arc<dyn Fn(FieldMap) -> Result<FieldMap> + Send + Sync>;

struct ClassSpec {
    latest_version: u32,
    construct: ConstructFn,
    decompose: DecomposeFn,
    /// from-version -> (to-version, upgrader)
    upgrades: HashMap<u32, (u32, UpgradeFn)>,
}

/// Thread-safe registry of record classes.
#[derive(Default)]
pub struct TypeRegistry {
    classes: RwLock<HashMap<String, ClassSpec>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class with the identity constructor and decomposer.
    /// Re-registering a class replaces its spec but keeps its upgraders.
    pub fn register(&self, class: &str, latest_version: u32) {
        let name = class.to_string();
        let construct: ConstructFn = Arc::new(move |fields| Ok(Record::new(name.clone(), fields)));
        let decompose: DecomposeFn = Arc::new(|record: &Record| record.fields.clone());
        self.register_with(class, latest_version, construct, decompose);
    }

    /// Registers a class with a custom constructor and decomposer.
    pub fn register_with(
        &self,
        class: &str,
        latest_version: u32,
        construct: ConstructFn,
        decompose: DecomposeFn,
    ) {
        let mut classes = self.classes.write();
        let upgrades = classes
            .remove(class)
            .map(|spec| spec.upgrades)
            .unwrap_or_default();
        classes.insert(
            class.to_string(),
            ClassSpec {
                latest_version,
                construct,
                decompose,
                upgrades,
            },
        );
    }

    /// Registers the upgrade step `from -> to` for a class.
    pub fn register_upgrade(
        &self,
        class: &str,
        from: u32,
        to: u32,
        upgrade: impl Fn(FieldMap) -> Result<FieldMap> + Send + Sync + 'static,
    ) -> Result<()> {
        let mut classes = self.classes.write();
        let spec = classes
            .get_mut(class)
            .ok_or_else(|| DbError::UnknownClass(class.to_string()))?;
        spec.upgrades.insert(from, (to, Arc::new(upgrade)));
        Ok(())
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.read().contains_key(class)
    }

    pub fn latest_version(&self, class: &str) -> Option<u32> {
        self.classes.read().get(class).map(|s| s.latest_version)
    }

    /// Constructs a record at the registered latest version.
    pub fn instantiate(&self, class: &str, fields: FieldMap) -> Result<Record> {
        let (latest, construct) = {
            let classes = self.classes.read();
            let spec = classes
                .get(class)
                .ok_or_else(|| DbError::UnknownClass(class.to_string()))?;
            (spec.latest_version, Arc::clone(&spec.construct))
        };
        let mut record = construct(fields)?;
        record.class = class.to_string();
        record.version = latest;
        Ok(record)
    }

    /// Field map written to disk for a record.
    pub fn decompose(&self, record: &Record) -> Result<FieldMap> {
        let decompose = {
            let classes = self.classes.read();
            let spec = classes
                .get(&record.class)
                .ok_or_else(|| DbError::UnknownClass(record.class.clone()))?;
            Arc::clone(&spec.decompose)
        };
        Ok(decompose(record))
    }

    /// Rehydrates a decoded field map written at `version`, running the
    /// upgrade chain up to the registered latest version first.
    pub fn construct(&self, class: &str, version: u32, fields: FieldMap) -> Result<Record> {
        // Closures are cloned out so user code never runs under the lock.
        let (latest, construct, chain) = {
            let classes = self.classes.read();
            let spec = classes
                .get(class)
                .ok_or_else(|| DbError::UnknownClass(class.to_string()))?;
            let mut chain = Vec::new();
            let mut at = version;
            while at < spec.latest_version {
                let (to, upgrade) = spec.upgrades.get(&at).ok_or(DbError::MissingUpgrader {
                    class: class.to_string(),
                    from: at,
                })?;
                chain.push(Arc::clone(upgrade));
                at = *to;
            }
            if at != spec.latest_version {
                return Err(DbError::MissingUpgrader {
                    class: class.to_string(),
                    from: version,
                });
            }
            (spec.latest_version, Arc::clone(&spec.construct), chain)
        };

        let mut fields = fields;
        for upgrade in chain {
            fields = upgrade(fields)?;
        }
        let mut record = construct(fields)?;
        record.class = class.to_string();
        record.version = latest;
        Ok(record)
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let classes = self.classes.read();
        f.debug_struct("TypeRegistry")
            .field("classes", &classes.keys().collect::<Vec<_>>())
            .finish()
    }
}
