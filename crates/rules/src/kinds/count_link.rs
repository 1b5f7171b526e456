use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use reactive_core::{FieldType, FieldValue, Record};
use reactive_storage::Transaction;

use crate::definition::RuleKind;
use crate::error::{Result, RuleError};
use crate::handler::ReactiveRule;
use crate::validation::{require_collection, require_field, require_field_type};

/// Keeps `parent.count_field` equal to the number of child rows whose
/// `foreign_key_field` references the parent's `parent_id_field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLink {
    pub parent_collection: String,
    pub parent_id_field: String,
    pub count_field: String,
    pub child_collection: String,
    pub foreign_key_field: String,
}

impl CountLink {
    /// Add `delta` to the count of the parent identified by `key`. A null
    /// key references nothing; a key with no parent row is ignored.
    fn adjust(&self, tx: &mut Transaction<'_>, key: &FieldValue, delta: i64) -> Result<()> {
        if key.is_null() {
            return Ok(());
        }
        let id_field = self.parent_id_field.as_str();
        let count_field = self.count_field.as_str();
        let updated = tx.update_where(
            &self.parent_collection,
            |parent| parent.value(id_field) == key,
            |parent| {
                let current = parent.value(count_field).as_i64().unwrap_or(0);
                parent.set(count_field, current + delta);
            },
        )?;
        if updated == 0 {
            debug!(parent = %self.parent_collection, %key, "no parent row for child reference");
        }
        Ok(())
    }

    /// Number of children per referenced key, from a full scan.
    pub fn count_children(&self, tx: &Transaction<'_>) -> Result<HashMap<FieldValue, i64>> {
        let mut counts: HashMap<FieldValue, i64> = HashMap::new();
        for child in tx.scan(&self.child_collection)? {
            let key = child.value(&self.foreign_key_field);
            if !key.is_null() {
                *counts.entry(key.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

impl ReactiveRule for CountLink {
    fn kind(&self) -> RuleKind {
        RuleKind::CountLink
    }

    fn watches(&self) -> Vec<&str> {
        vec![self.child_collection.as_str()]
    }

    fn install(&self, tx: &mut Transaction<'_>) -> Result<()> {
        let parent = require_collection(tx, &self.parent_collection)?;
        let child = require_collection(tx, &self.child_collection)?;
        let id_type = require_field(&parent, &self.parent_id_field)?;
        require_field_type(&parent, &self.count_field, FieldType::Integer)?;
        let fk_type = require_field(&child, &self.foreign_key_field)?;
        if id_type != fk_type {
            return Err(RuleError::SchemaMismatch(format!(
                "'{}.{}' is {} but '{}.{}' is {}",
                self.child_collection,
                self.foreign_key_field,
                fk_type,
                self.parent_collection,
                self.parent_id_field,
                id_type
            )));
        }
        Ok(())
    }

    fn on_insert(&self, tx: &mut Transaction<'_>, _collection: &str, row: &Record) -> Result<()> {
        self.adjust(tx, row.value(&self.foreign_key_field), 1)
    }

    fn on_update(&self, tx: &mut Transaction<'_>, _collection: &str, old: &Record, new: &Record) -> Result<()> {
        let old_key = old.value(&self.foreign_key_field);
        let new_key = new.value(&self.foreign_key_field);
        if old_key == new_key {
            return Ok(());
        }
        self.adjust(tx, old_key, -1)?;
        self.adjust(tx, new_key, 1)
    }

    fn on_delete(&self, tx: &mut Transaction<'_>, _collection: &str, old: &Record) -> Result<()> {
        self.adjust(tx, old.value(&self.foreign_key_field), -1)
    }

    fn on_bulk_clear(&self, tx: &mut Transaction<'_>, _collection: &str) -> Result<()> {
        let count_field = self.count_field.as_str();
        let reset = tx.update_where(&self.parent_collection, |_| true, |parent| parent.set(count_field, 0))?;
        debug!(parent = %self.parent_collection, rows = reset, "child collection cleared, counts reset");
        Ok(())
    }

    fn refresh(&self, tx: &mut Transaction<'_>) -> Result<()> {
        let counts = self.count_children(tx)?;
        let id_field = self.parent_id_field.as_str();
        let count_field = self.count_field.as_str();
        let updated = tx.update_where(
            &self.parent_collection,
            |_| true,
            |parent| {
                let count = counts.get(parent.value(id_field)).copied().unwrap_or(0);
                parent.set(count_field, count);
            },
        )?;
        info!(parent = %self.parent_collection, rows = updated, "counts recomputed");
        Ok(())
    }
}
