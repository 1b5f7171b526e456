//! Rule lifecycle surface and mutation event adapter.

use std::sync::Arc;

use tracing::{debug, info, warn};

use reactive_core::config::EngineConfig;
use reactive_core::Record;
use reactive_storage::{Database, MutationObserver, StorageError, StorageResult, Transaction};

use crate::definition::{RuleDeclaration, RuleInstance};
use crate::error::{Result, RuleError};
use crate::handler::ReactiveRule;
use crate::kinds::{CountLink, GroupAggregate, RevisionStamp, SyncDirection, TreeLevel, UnionSync};
use crate::registry::Registry;

/// Owns the registry and routes storage mutation hooks to the enabled rule
/// instances watching the mutated collection.
///
/// Install it on a [`Database`] with [`RuleEngine::attach`]; every
/// lifecycle call then takes the transaction it should run in.
pub struct RuleEngine {
    registry: Registry,
}

impl RuleEngine {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Engine whose registry lives in the configured collection.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(Registry::in_collection(config.registry_collection.clone()))
    }

    pub fn in_memory() -> Self {
        Self::new(Registry::in_memory())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prepare the registry and install the engine as `db`'s mutation
    /// observer.
    pub fn attach(self, db: &mut Database) -> Result<Arc<RuleEngine>> {
        db.execute(|tx| self.registry.install(tx))?;
        let engine = Arc::new(self);
        db.set_observer(engine.clone());
        info!(max_hook_depth = db.max_hook_depth(), "rule engine attached");
        Ok(engine)
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Validate, install derived state, then register. The new instance is
    /// enabled.
    pub fn create(&self, tx: &mut Transaction<'_>, declaration: RuleDeclaration) -> Result<RuleInstance> {
        let RuleDeclaration { id, definition } = declaration;
        if self.registry.find(tx, &id)?.is_some() {
            return Err(RuleError::DuplicateId(id));
        }
        definition.rule().install(tx)?;
        self.registry.create(tx, RuleInstance::new(id, definition))
    }

    /// Create unless an identical instance already exists. Returns whether
    /// a new instance was created.
    pub fn ensure(&self, tx: &mut Transaction<'_>, declaration: RuleDeclaration) -> Result<bool> {
        match self.registry.find(tx, &declaration.id)? {
            Some(existing) if existing.definition == declaration.definition => {
                debug!(rule_id = %declaration.id, "rule instance already provisioned");
                Ok(false)
            }
            Some(_) => Err(RuleError::DuplicateId(declaration.id)),
            None => self.create(tx, declaration).map(|_| true),
        }
    }

    /// Ensure every declaration; returns how many were newly created.
    pub fn provision<I>(&self, tx: &mut Transaction<'_>, declarations: I) -> Result<usize>
    where
        I: IntoIterator<Item = RuleDeclaration>,
    {
        let mut created = 0;
        for declaration in declarations {
            if self.ensure(tx, declaration)? {
                created += 1;
            }
        }
        Ok(created)
    }

    pub fn enable(&self, tx: &mut Transaction<'_>, id: &str) -> Result<()> {
        self.registry.enable(tx, id)
    }

    pub fn disable(&self, tx: &mut Transaction<'_>, id: &str) -> Result<()> {
        self.registry.disable(tx, id)
    }

    pub fn refresh(&self, tx: &mut Transaction<'_>, id: &str) -> Result<()> {
        self.registry.refresh(tx, id)
    }

    /// Remove the instance from the registry. Derived state is kept.
    pub fn drop_rule(&self, tx: &mut Transaction<'_>, id: &str) -> Result<RuleInstance> {
        self.registry.remove(tx, id)
    }

    pub fn get(&self, tx: &Transaction<'_>, id: &str) -> Result<RuleInstance> {
        self.registry.get(tx, id)
    }

    pub fn list(&self, tx: &Transaction<'_>) -> Result<Vec<RuleInstance>> {
        self.registry.list(tx)
    }

    pub fn lookup(&self, tx: &Transaction<'_>, collection: &str) -> Result<Vec<RuleInstance>> {
        self.registry.lookup(tx, collection)
    }

    // ── Per-kind conveniences ───────────────────────────────────

    pub fn revision_stamp_create(
        &self,
        tx: &mut Transaction<'_>,
        id: &str,
        collection: &str,
        field: &str,
    ) -> Result<RuleInstance> {
        self.create(tx, RuleDeclaration::new(id, RevisionStamp::new(collection, field)))
    }

    pub fn revision_stamp_enable(&self, tx: &mut Transaction<'_>, id: &str) -> Result<()> {
        self.enable(tx, id)
    }

    pub fn revision_stamp_disable(&self, tx: &mut Transaction<'_>, id: &str) -> Result<()> {
        self.disable(tx, id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn count_link_create(
        &self,
        tx: &mut Transaction<'_>,
        id: &str,
        parent_collection: &str,
        parent_id_field: &str,
        count_field: &str,
        child_collection: &str,
        foreign_key_field: &str,
    ) -> Result<RuleInstance> {
        let rule = CountLink {
            parent_collection: parent_collection.to_string(),
            parent_id_field: parent_id_field.to_string(),
            count_field: count_field.to_string(),
            child_collection: child_collection.to_string(),
            foreign_key_field: foreign_key_field.to_string(),
        };
        self.create(tx, RuleDeclaration::new(id, rule))
    }

    pub fn count_link_refresh(&self, tx: &mut Transaction<'_>, id: &str) -> Result<()> {
        self.refresh(tx, id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn group_aggregate_create(
        &self,
        tx: &mut Transaction<'_>,
        id: &str,
        source_collection: &str,
        id_field: &str,
        value_field: &str,
        group_by: &[&str],
        target_collection: &str,
    ) -> Result<RuleInstance> {
        let rule = GroupAggregate {
            source_collection: source_collection.to_string(),
            id_field: id_field.to_string(),
            value_field: value_field.to_string(),
            group_by: group_by.iter().map(|f| f.to_string()).collect(),
            target_collection: target_collection.to_string(),
        };
        self.create(tx, RuleDeclaration::new(id, rule))
    }

    pub fn group_aggregate_refresh(&self, tx: &mut Transaction<'_>, id: &str) -> Result<()> {
        self.refresh(tx, id)
    }

    pub fn tree_level_create(
        &self,
        tx: &mut Transaction<'_>,
        id: &str,
        collection: &str,
        id_field: &str,
        parent_field: &str,
        level_field: &str,
    ) -> Result<RuleInstance> {
        let rule = TreeLevel {
            collection: collection.to_string(),
            id_field: id_field.to_string(),
            parent_field: parent_field.to_string(),
            level_field: level_field.to_string(),
        };
        self.create(tx, RuleDeclaration::new(id, rule))
    }

    pub fn union_sync_create(
        &self,
        tx: &mut Transaction<'_>,
        id: &str,
        base_collection: &str,
        subtypes: &[&str],
        direction: SyncDirection,
    ) -> Result<RuleInstance> {
        self.create(tx, RuleDeclaration::new(id, UnionSync::new(base_collection, subtypes, direction)))
    }

    // ── Event dispatch ──────────────────────────────────────────

    fn dispatch<F>(&self, tx: &mut Transaction<'_>, collection: &str, event: &'static str, mut handle: F) -> StorageResult<()>
    where
        F: FnMut(&dyn ReactiveRule, &mut Transaction<'_>) -> Result<()>,
    {
        if self.registry.is_registry_collection(collection) {
            return Ok(());
        }
        let instances = self
            .registry
            .lookup(tx, collection)
            .map_err(|e| abort(collection, e))?;

        for instance in &instances {
            debug!(rule_id = %instance.id, kind = %instance.kind, collection, event, "dispatching");
            if let Err(e) = handle(instance.definition.rule(), tx) {
                warn!(rule_id = %instance.id, collection, event, error = %e, "rule rejected mutation");
                return Err(abort(collection, e));
            }
        }
        Ok(())
    }
}

fn abort(collection: &str, error: RuleError) -> StorageError {
    StorageError::HookAborted {
        collection: collection.to_string(),
        source: Box::new(error),
    }
}

impl MutationObserver for RuleEngine {
    fn before_insert(&self, tx: &mut Transaction<'_>, collection: &str, row: &mut Record) -> StorageResult<()> {
        self.dispatch(tx, collection, "before_insert", |rule, tx| {
            rule.prepare_insert(tx, collection, row)
        })
    }

    fn after_insert(&self, tx: &mut Transaction<'_>, collection: &str, row: &Record) -> StorageResult<()> {
        self.dispatch(tx, collection, "after_insert", |rule, tx| rule.on_insert(tx, collection, row))
    }

    fn before_update(
        &self,
        tx: &mut Transaction<'_>,
        collection: &str,
        old: &Record,
        new: &mut Record,
    ) -> StorageResult<()> {
        self.dispatch(tx, collection, "before_update", |rule, tx| {
            rule.prepare_update(tx, collection, old, new)
        })
    }

    fn after_update(&self, tx: &mut Transaction<'_>, collection: &str, old: &Record, new: &Record) -> StorageResult<()> {
        self.dispatch(tx, collection, "after_update", |rule, tx| {
            rule.on_update(tx, collection, old, new)
        })
    }

    fn after_delete(&self, tx: &mut Transaction<'_>, collection: &str, old: &Record) -> StorageResult<()> {
        self.dispatch(tx, collection, "after_delete", |rule, tx| rule.on_delete(tx, collection, old))
    }

    fn after_bulk_clear(&self, tx: &mut Transaction<'_>, collection: &str, removed: usize) -> StorageResult<()> {
        debug!(collection, removed, "bulk clear");
        self.dispatch(tx, collection, "after_bulk_clear", |rule, tx| rule.on_bulk_clear(tx, collection))
    }
}
