//! Durable record of rule instances.
//!
//! [`RegistryStore`] is the storage seam; [`Registry`] layers the lifecycle
//! semantics (duplicate ids, idempotent toggles, lookup by collection) on
//! top of any store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use reactive_core::{FieldType, Record};
use reactive_storage::{CollectionSchema, Transaction};

use crate::definition::{RuleDefinition, RuleInstance};
use crate::error::{Result, RuleError};

// ── Store seam ────────────────────────────────────────────────

pub trait RegistryStore: Send + Sync {
    /// Prepare backing storage. Called once when the engine is attached.
    fn install(&self, _tx: &mut Transaction<'_>) -> Result<()> {
        Ok(())
    }

    fn get(&self, tx: &Transaction<'_>, id: &str) -> Result<Option<RuleInstance>>;

    /// All instances, ordered by id.
    fn list(&self, tx: &Transaction<'_>) -> Result<Vec<RuleInstance>>;

    fn insert(&self, tx: &mut Transaction<'_>, instance: &RuleInstance) -> Result<()>;

    /// Returns `false` when no instance has this id.
    fn set_enabled(&self, tx: &mut Transaction<'_>, id: &str, enabled: bool) -> Result<bool>;

    /// Returns `false` when no instance has this id.
    fn remove(&self, tx: &mut Transaction<'_>, id: &str) -> Result<bool>;

    /// Collection backing the store, if any. Mutations of it are never
    /// dispatched to rules.
    fn collection(&self) -> Option<&str> {
        None
    }
}

// ── Collection-backed store ───────────────────────────────────

/// Keeps instances as rows of a database collection, so registry changes
/// commit and roll back with the surrounding transaction and persist with
/// the database snapshot.
///
/// Layout: `(id, kind, target_collection, enabled, configuration)` with the
/// configuration as JSON text. Decoded configurations are cached by their
/// text, so lookups on the hook path only parse a configuration once.
pub struct CollectionRegistry {
    collection: String,
    definitions: RwLock<HashMap<String, RuleDefinition>>,
}

impl CollectionRegistry {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            definitions: RwLock::new(HashMap::new()),
        }
    }

    pub fn schema(&self) -> CollectionSchema {
        CollectionSchema::new(self.collection.clone())
            .field("id", FieldType::Text)
            .field("kind", FieldType::Text)
            .field("target_collection", FieldType::Text)
            .field_with_default("enabled", FieldType::Boolean, true)
            .field("configuration", FieldType::Text)
            .primary_key("id")
    }

    fn encode(instance: &RuleInstance) -> Result<Record> {
        Ok(Record::new()
            .with("id", instance.id.as_str())
            .with("kind", instance.kind.to_string())
            .with("target_collection", instance.target_collection.as_str())
            .with("enabled", instance.enabled)
            .with("configuration", serde_json::to_string(&instance.definition)?))
    }

    fn definition(&self, configuration: &str) -> Result<RuleDefinition> {
        let cached = self
            .definitions
            .read()
            .expect("definitions lock poisoned")
            .get(configuration)
            .cloned();
        if let Some(definition) = cached {
            return Ok(definition);
        }
        let definition: RuleDefinition = serde_json::from_str(configuration)?;
        self.definitions
            .write()
            .expect("definitions lock poisoned")
            .insert(configuration.to_string(), definition.clone());
        Ok(definition)
    }

    fn decode(&self, row: &Record) -> Result<RuleInstance> {
        let id = row.value("id").as_str().unwrap_or_default().to_string();
        let configuration = row.value("configuration").as_str().ok_or_else(|| {
            RuleError::InvalidDeclaration(format!("registry row '{}' has no configuration", id))
        })?;
        let definition = self.definition(configuration)?;
        Ok(RuleInstance {
            kind: definition.kind(),
            target_collection: definition.target_collection().to_string(),
            enabled: row.value("enabled").as_bool().unwrap_or(true),
            definition,
            id,
        })
    }

    fn by_id<'a>(id: &'a str) -> impl Fn(&Record) -> bool + 'a {
        move |row: &Record| row.value("id").as_str() == Some(id)
    }
}

impl RegistryStore for CollectionRegistry {
    fn install(&self, tx: &mut Transaction<'_>) -> Result<()> {
        if !tx.has_collection(&self.collection) {
            tx.create_collection(self.schema())?;
            info!(collection = %self.collection, "rule registry created");
        }
        Ok(())
    }

    fn get(&self, tx: &Transaction<'_>, id: &str) -> Result<Option<RuleInstance>> {
        tx.find_one(&self.collection, Self::by_id(id))?
            .map(|row| self.decode(&row))
            .transpose()
    }

    fn list(&self, tx: &Transaction<'_>) -> Result<Vec<RuleInstance>> {
        let mut instances = tx
            .scan(&self.collection)?
            .iter()
            .map(|row| self.decode(row))
            .collect::<Result<Vec<_>>>()?;
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    fn insert(&self, tx: &mut Transaction<'_>, instance: &RuleInstance) -> Result<()> {
        tx.insert(&self.collection, Self::encode(instance)?)?;
        Ok(())
    }

    fn set_enabled(&self, tx: &mut Transaction<'_>, id: &str, enabled: bool) -> Result<bool> {
        let updated = tx.update_where(&self.collection, Self::by_id(id), |row| row.set("enabled", enabled))?;
        Ok(updated > 0)
    }

    fn remove(&self, tx: &mut Transaction<'_>, id: &str) -> Result<bool> {
        Ok(tx.delete_where(&self.collection, Self::by_id(id))? > 0)
    }

    fn collection(&self) -> Option<&str> {
        Some(&self.collection)
    }
}

// ── In-process store ──────────────────────────────────────────

/// Process-local store. Changes take effect immediately and are not undone
/// by a transaction rollback.
#[derive(Default)]
pub struct MemoryRegistry {
    instances: RwLock<BTreeMap<String, RuleInstance>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryStore for MemoryRegistry {
    fn get(&self, _tx: &Transaction<'_>, id: &str) -> Result<Option<RuleInstance>> {
        Ok(self
            .instances
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .cloned())
    }

    fn list(&self, _tx: &Transaction<'_>) -> Result<Vec<RuleInstance>> {
        Ok(self
            .instances
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect())
    }

    fn insert(&self, _tx: &mut Transaction<'_>, instance: &RuleInstance) -> Result<()> {
        self.instances
            .write()
            .expect("registry lock poisoned")
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    fn set_enabled(&self, _tx: &mut Transaction<'_>, id: &str, enabled: bool) -> Result<bool> {
        let mut instances = self.instances.write().expect("registry lock poisoned");
        match instances.get_mut(id) {
            Some(instance) => {
                instance.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&self, _tx: &mut Transaction<'_>, id: &str) -> Result<bool> {
        Ok(self
            .instances
            .write()
            .expect("registry lock poisoned")
            .remove(id)
            .is_some())
    }
}

// ── Lifecycle semantics ───────────────────────────────────────

#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn RegistryStore>,
}

impl Registry {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }

    pub fn in_collection(collection: impl Into<String>) -> Self {
        Self::new(Arc::new(CollectionRegistry::new(collection)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRegistry::new()))
    }

    pub fn install(&self, tx: &mut Transaction<'_>) -> Result<()> {
        self.store.install(tx)
    }

    pub fn is_registry_collection(&self, collection: &str) -> bool {
        self.store.collection() == Some(collection)
    }

    pub fn create(&self, tx: &mut Transaction<'_>, instance: RuleInstance) -> Result<RuleInstance> {
        if self.store.get(tx, &instance.id)?.is_some() {
            return Err(RuleError::DuplicateId(instance.id));
        }
        self.store.insert(tx, &instance)?;
        info!(rule_id = %instance.id, kind = %instance.kind, target = %instance.target_collection, "rule instance registered");
        Ok(instance)
    }

    pub fn find(&self, tx: &Transaction<'_>, id: &str) -> Result<Option<RuleInstance>> {
        self.store.get(tx, id)
    }

    pub fn get(&self, tx: &Transaction<'_>, id: &str) -> Result<RuleInstance> {
        self.find(tx, id)?
            .ok_or_else(|| RuleError::UnknownId(id.to_string()))
    }

    pub fn list(&self, tx: &Transaction<'_>) -> Result<Vec<RuleInstance>> {
        self.store.list(tx)
    }

    /// Enabled instances watching `collection`, ordered by id.
    pub fn lookup(&self, tx: &Transaction<'_>, collection: &str) -> Result<Vec<RuleInstance>> {
        Ok(self
            .list(tx)?
            .into_iter()
            .filter(|instance| instance.enabled && instance.definition.watches(collection))
            .collect())
    }

    pub fn enable(&self, tx: &mut Transaction<'_>, id: &str) -> Result<()> {
        self.set_enabled(tx, id, true)
    }

    pub fn disable(&self, tx: &mut Transaction<'_>, id: &str) -> Result<()> {
        self.set_enabled(tx, id, false)
    }

    fn set_enabled(&self, tx: &mut Transaction<'_>, id: &str, enabled: bool) -> Result<()> {
        let instance = self.get(tx, id)?;
        if !instance.kind.supports_toggle() {
            return Err(RuleError::Unsupported {
                kind: instance.kind,
                operation: if enabled { "enable" } else { "disable" },
            });
        }
        if instance.enabled == enabled {
            debug!(rule_id = %id, enabled, "rule instance already in requested state");
            return Ok(());
        }
        self.store.set_enabled(tx, id, enabled)?;
        info!(rule_id = %id, enabled, "rule instance toggled");
        Ok(())
    }

    /// Full recompute through the instance's rule. Leaves `enabled` alone.
    pub fn refresh(&self, tx: &mut Transaction<'_>, id: &str) -> Result<()> {
        let instance = self.get(tx, id)?;
        if !instance.kind.supports_refresh() {
            return Err(RuleError::Unsupported {
                kind: instance.kind,
                operation: "refresh",
            });
        }
        instance.definition.rule().refresh(tx)?;
        info!(rule_id = %id, kind = %instance.kind, "rule instance refreshed");
        Ok(())
    }

    /// Remove the registry entry. Derived fields and collections are left
    /// as they are.
    pub fn remove(&self, tx: &mut Transaction<'_>, id: &str) -> Result<RuleInstance> {
        let instance = self.get(tx, id)?;
        self.store.remove(tx, id)?;
        info!(rule_id = %id, kind = %instance.kind, "rule instance dropped, derived state kept");
        Ok(instance)
    }
}
