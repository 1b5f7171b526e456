use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use reactive_core::{FieldType, FieldValue, Record};
use reactive_storage::Transaction;

use crate::definition::RuleKind;
use crate::error::{Result, RuleError};
use crate::handler::ReactiveRule;
use crate::validation::{require_collection, require_field, require_field_type};

/// Keeps `level_field` equal to the number of parent hops from a row to
/// its root (a row whose `parent_field` is null has level 0).
///
/// The parent relation must be acyclic. A cycle or a dangling parent
/// reference is rejected with [`RuleError::InvariantViolation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeLevel {
    pub collection: String,
    pub id_field: String,
    pub parent_field: String,
    pub level_field: String,
}

impl TreeLevel {
    fn level_under(&self, tx: &Transaction<'_>, parent: &FieldValue) -> Result<i64> {
        if parent.is_null() {
            return Ok(0);
        }
        let id_field = self.id_field.as_str();
        let row = tx
            .find_one(&self.collection, |r| r.value(id_field) == parent)?
            .ok_or_else(|| {
                RuleError::InvariantViolation(format!(
                    "parent {} not found in '{}'",
                    parent, self.collection
                ))
            })?;
        let level = row.value(&self.level_field).as_i64().ok_or_else(|| {
            RuleError::InvariantViolation(format!(
                "parent {} in '{}' has no level",
                parent, self.collection
            ))
        })?;
        Ok(level + 1)
    }

    /// Root-first breadth-first assignment of every level. A row no root
    /// reaches hangs off a missing parent or sits on a cycle.
    fn assign_levels(&self, tx: &mut Transaction<'_>) -> Result<usize> {
        let id_field = self.id_field.as_str();
        let level_field = self.level_field.as_str();

        let rows = tx.scan(&self.collection)?;
        let mut children: HashMap<&FieldValue, Vec<&FieldValue>> = HashMap::new();
        let mut worklist = VecDeque::new();
        for row in &rows {
            let id = row.value(id_field);
            match row.value(&self.parent_field) {
                FieldValue::Null => worklist.push_back((id, 0)),
                parent => children.entry(parent).or_default().push(id),
            }
        }

        let mut levels: HashMap<FieldValue, i64> = HashMap::with_capacity(rows.len());
        while let Some((id, level)) = worklist.pop_front() {
            if levels.insert(id.clone(), level).is_some() {
                continue;
            }
            for child in children.get(id).into_iter().flatten() {
                worklist.push_back((*child, level + 1));
            }
        }

        if let Some(orphan) = rows.iter().map(|r| r.value(id_field)).find(|id| !levels.contains_key(*id)) {
            return Err(RuleError::InvariantViolation(format!(
                "row {} of '{}' has no path to a root",
                orphan, self.collection
            )));
        }

        let updated = tx.update_where(
            &self.collection,
            |r| levels.get(r.value(id_field)).copied() != r.value(level_field).as_i64(),
            |r| {
                let level = levels.get(r.value(id_field)).copied();
                if let Some(level) = level {
                    r.set(level_field, level);
                }
            },
        )?;
        Ok(updated)
    }

    /// Push `level + 1` down the subtree under `root`, breadth first,
    /// stopping at children whose level is already right.
    fn propagate(&self, tx: &mut Transaction<'_>, root: &FieldValue, level: i64) -> Result<usize> {
        let id_field = self.id_field.as_str();
        let parent_field = self.parent_field.as_str();
        let level_field = self.level_field.as_str();

        let mut worklist = VecDeque::from([(root.clone(), level)]);
        let mut visited = HashSet::from([root.clone()]);
        let mut touched = 0;

        while let Some((id, level)) = worklist.pop_front() {
            let child_level = level + 1;
            for child in tx.find(&self.collection, |r| r.value(parent_field) == &id)? {
                let child_id = child.value(id_field).clone();
                if !visited.insert(child_id.clone()) {
                    return Err(RuleError::InvariantViolation(format!(
                        "cycle in '{}' through {}",
                        self.collection, child_id
                    )));
                }
                if child.value(level_field).as_i64() == Some(child_level) {
                    continue;
                }
                tx.update_where(
                    &self.collection,
                    |r| r.value(id_field) == &child_id,
                    |r| r.set(level_field, child_level),
                )?;
                touched += 1;
                worklist.push_back((child_id, child_level));
            }
        }
        Ok(touched)
    }
}

impl ReactiveRule for TreeLevel {
    fn kind(&self) -> RuleKind {
        RuleKind::TreeLevel
    }

    fn watches(&self) -> Vec<&str> {
        vec![self.collection.as_str()]
    }

    fn install(&self, tx: &mut Transaction<'_>) -> Result<()> {
        let schema = require_collection(tx, &self.collection)?;
        let id_type = require_field(&schema, &self.id_field)?;
        let parent_type = require_field(&schema, &self.parent_field)?;
        if id_type != parent_type {
            return Err(RuleError::SchemaMismatch(format!(
                "'{}.{}' is {} but '{}' is {}",
                self.collection, self.parent_field, parent_type, self.id_field, id_type
            )));
        }
        require_field_type(&schema, &self.level_field, FieldType::Integer)?;
        let assigned = self.assign_levels(tx)?;
        info!(collection = %self.collection, rows = assigned, "levels assigned");
        Ok(())
    }

    fn prepare_insert(&self, tx: &mut Transaction<'_>, _collection: &str, row: &mut Record) -> Result<()> {
        let level = self.level_under(tx, row.value(&self.parent_field))?;
        row.set(self.level_field.clone(), level);
        Ok(())
    }

    fn prepare_update(
        &self,
        tx: &mut Transaction<'_>,
        _collection: &str,
        old: &Record,
        new: &mut Record,
    ) -> Result<()> {
        if old.value(&self.parent_field) != new.value(&self.parent_field) {
            let level = self.level_under(tx, new.value(&self.parent_field))?;
            new.set(self.level_field.clone(), level);
        } else if tx.hook_depth() <= 1 {
            // Levels are derived; a direct write to the level alone is ignored.
            new.set(self.level_field.clone(), old.value(&self.level_field).clone());
        }
        Ok(())
    }

    fn on_update(&self, tx: &mut Transaction<'_>, _collection: &str, old: &Record, new: &Record) -> Result<()> {
        if old.value(&self.parent_field) == new.value(&self.parent_field) {
            return Ok(());
        }
        let Some(level) = new.value(&self.level_field).as_i64() else {
            return Ok(());
        };
        let id = new.value(&self.id_field);
        let touched = self.propagate(tx, id, level)?;
        debug!(collection = %self.collection, %id, level, descendants = touched, "subtree re-levelled");
        Ok(())
    }
}
