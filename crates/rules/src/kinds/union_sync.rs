use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info};

use reactive_core::{FieldType, FieldValue, Record};
use reactive_storage::{CollectionSchema, Transaction};

use crate::definition::RuleKind;
use crate::error::{Result, RuleError};
use crate::handler::ReactiveRule;
use crate::validation::{require_collection, require_compatible, require_field};

/// Which side of a union is written by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncDirection {
    /// The base collection is written; subtypes are mirrors.
    BaseToSub,
    /// Subtype collections are written; the base is their union.
    SubToBase,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::BaseToSub => write!(f, "BASE_TO_SUB"),
            SyncDirection::SubToBase => write!(f, "SUB_TO_BASE"),
        }
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "BASE_TO_SUB" => Ok(SyncDirection::BaseToSub),
            "SUB_TO_BASE" => Ok(SyncDirection::SubToBase),
            _ => Err(format!("unknown sync direction: '{}'", s)),
        }
    }
}

impl Serialize for SyncDirection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SyncDirection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn default_discriminator() -> String {
    "discriminator".to_string()
}

fn default_id_field() -> String {
    "id".to_string()
}

/// Bidirectional mirror between a union-shaped base collection and a family
/// of disjoint subtype collections.
///
/// Each base row carries a discriminator naming the one subtype collection
/// that holds the same row (matched on `id_field`). Only the side selected
/// by `direction` may be written directly; the other side is maintained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnionSync {
    pub base_collection: String,
    pub subtypes: Vec<String>,
    pub direction: SyncDirection,
    #[serde(default = "default_discriminator")]
    pub discriminator_field: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

impl UnionSync {
    pub fn new(base_collection: impl Into<String>, subtypes: &[&str], direction: SyncDirection) -> Self {
        Self {
            base_collection: base_collection.into(),
            subtypes: subtypes.iter().map(|s| s.to_string()).collect(),
            direction,
            discriminator_field: default_discriminator(),
            id_field: default_id_field(),
        }
    }

    /// Base shape: the discriminator, then every subtype field in
    /// first-seen order. Shared field names must agree on type.
    pub fn base_schema(&self, subtypes: &[CollectionSchema]) -> Result<CollectionSchema> {
        let mut base = CollectionSchema::new(self.base_collection.clone())
            .field(self.discriminator_field.clone(), FieldType::Text);
        for schema in subtypes {
            require_field(schema, &self.id_field)?;
            for def in &schema.fields {
                if def.name == self.discriminator_field {
                    return Err(RuleError::SchemaMismatch(format!(
                        "subtype '{}' uses the discriminator name '{}'",
                        schema.name, def.name
                    )));
                }
                match base.field_type(&def.name) {
                    Some(existing) if existing != def.field_type => {
                        return Err(RuleError::SchemaMismatch(format!(
                            "field '{}' is {} in '{}' but {} elsewhere",
                            def.name, def.field_type, schema.name, existing
                        )));
                    }
                    Some(_) => {}
                    None => base = base.field(def.name.clone(), def.field_type),
                }
            }
        }
        Ok(base)
    }

    fn is_subtype(&self, collection: &str) -> bool {
        self.subtypes.iter().any(|s| s == collection)
    }

    fn writable(&self, collection: &str) -> bool {
        match self.direction {
            SyncDirection::BaseToSub => collection == self.base_collection,
            SyncDirection::SubToBase => self.is_subtype(collection),
        }
    }

    /// Mirror-side writes are only legal from inside a hook, which is where
    /// this rule's own propagation happens.
    fn guard_mirror(&self, tx: &Transaction<'_>, collection: &str) -> Result<()> {
        if tx.hook_depth() <= 1 {
            return Err(RuleError::InvariantViolation(format!(
                "'{}' is maintained by the union on '{}' ({}) and cannot be written directly",
                collection, self.base_collection, self.direction
            )));
        }
        Ok(())
    }

    fn subtype_of<'a>(&'a self, base_row: &Record) -> Result<&'a str> {
        let discriminator = base_row.value(&self.discriminator_field);
        discriminator
            .as_str()
            .and_then(|d| self.subtypes.iter().find(|s| s.as_str() == d))
            .map(|s| s.as_str())
            .ok_or_else(|| {
                RuleError::InvariantViolation(format!(
                    "discriminator {} of '{}' names no configured subtype",
                    discriminator, self.base_collection
                ))
            })
    }

    /// Fail when `id` already exists in `collection`.
    fn ensure_unclaimed(&self, tx: &Transaction<'_>, collection: &str, id: &FieldValue) -> Result<()> {
        let id_field = self.id_field.as_str();
        if tx.count(collection, |r| r.value(id_field) == id)? > 0 {
            return Err(RuleError::InvariantViolation(format!(
                "id {} is already claimed in the union on '{}'",
                id, self.base_collection
            )));
        }
        Ok(())
    }

    fn ensure_unclaimed_in_subtypes(&self, tx: &Transaction<'_>, id: &FieldValue) -> Result<()> {
        for subtype in &self.subtypes {
            self.ensure_unclaimed(tx, subtype, id)?;
        }
        Ok(())
    }

    fn base_row(&self, subtype: &str, row: &Record) -> Record {
        let mut base = Record::new().with(self.discriminator_field.clone(), subtype);
        for (field, value) in row.iter() {
            base.set(field, value.clone());
        }
        base
    }

    fn subtype_row(&self, tx: &Transaction<'_>, subtype: &str, base_row: &Record) -> Result<Record> {
        let schema = tx.schema(subtype)?;
        Ok(schema
            .field_names()
            .map(|field| (field, base_row.value(field).clone()))
            .collect())
    }

    fn matching_id<'a>(&'a self, id: &'a FieldValue) -> impl Fn(&Record) -> bool + 'a {
        move |r: &Record| r.value(&self.id_field) == id
    }

    // ── BASE_TO_SUB ─────────────────────────────────────────────

    fn mirror_base_insert(&self, tx: &mut Transaction<'_>, row: &Record) -> Result<()> {
        let subtype = self.subtype_of(row)?;
        self.ensure_unclaimed_in_subtypes(tx, row.value(&self.id_field))?;
        let mirrored = self.subtype_row(tx, subtype, row)?;
        tx.insert(subtype, mirrored)?;
        debug!(base = %self.base_collection, subtype, id = %row.value(&self.id_field), "base row mirrored");
        Ok(())
    }

    fn mirror_base_delete(&self, tx: &mut Transaction<'_>, row: &Record) -> Result<()> {
        let subtype = self.subtype_of(row)?;
        let removed = tx.delete_where(subtype, self.matching_id(row.value(&self.id_field)))?;
        if removed == 0 {
            return Err(RuleError::InvariantViolation(format!(
                "no row {} in subtype '{}' to delete",
                row.value(&self.id_field),
                subtype
            )));
        }
        Ok(())
    }

    fn mirror_base_update(&self, tx: &mut Transaction<'_>, old: &Record, new: &Record) -> Result<()> {
        let old_subtype = self.subtype_of(old)?;
        let new_subtype = self.subtype_of(new)?;
        let old_id = old.value(&self.id_field);
        let new_id = new.value(&self.id_field);

        if old_subtype != new_subtype || old_id != new_id {
            // the row changes identity: move it
            self.mirror_base_delete(tx, old)?;
            return self.mirror_base_insert(tx, new);
        }

        let mirrored = self.subtype_row(tx, new_subtype, new)?;
        let updated = tx.update_where(new_subtype, self.matching_id(old_id), |row| {
            for (field, value) in mirrored.iter() {
                row.set(field, value.clone());
            }
        })?;
        if updated == 0 {
            return Err(RuleError::InvariantViolation(format!(
                "no row {} in subtype '{}' to update",
                old_id, new_subtype
            )));
        }
        Ok(())
    }

    // ── SUB_TO_BASE ─────────────────────────────────────────────

    fn union_subtype_insert(&self, tx: &mut Transaction<'_>, subtype: &str, row: &Record) -> Result<()> {
        self.ensure_unclaimed(tx, &self.base_collection, row.value(&self.id_field))?;
        tx.insert(&self.base_collection, self.base_row(subtype, row))?;
        debug!(base = %self.base_collection, subtype, id = %row.value(&self.id_field), "subtype row merged");
        Ok(())
    }

    fn union_subtype_update(&self, tx: &mut Transaction<'_>, subtype: &str, old: &Record, new: &Record) -> Result<()> {
        let old_id = old.value(&self.id_field);
        let new_id = new.value(&self.id_field);
        if old_id != new_id {
            self.ensure_unclaimed(tx, &self.base_collection, new_id)?;
        }
        let discriminator = self.discriminator_field.as_str();
        let updated = tx.update_where(
            &self.base_collection,
            |r| r.value(discriminator).as_str() == Some(subtype) && r.value(&self.id_field) == old_id,
            |r| {
                for (field, value) in new.iter() {
                    r.set(field, value.clone());
                }
            },
        )?;
        if updated == 0 {
            return Err(RuleError::InvariantViolation(format!(
                "no row {} for subtype '{}' in '{}'",
                old_id, subtype, self.base_collection
            )));
        }
        Ok(())
    }

    fn union_subtype_delete(&self, tx: &mut Transaction<'_>, subtype: &str, old: &Record) -> Result<()> {
        let discriminator = self.discriminator_field.as_str();
        let old_id = old.value(&self.id_field);
        tx.delete_where(&self.base_collection, |r| {
            r.value(discriminator).as_str() == Some(subtype) && r.value(&self.id_field) == old_id
        })?;
        Ok(())
    }

    /// Fill a freshly created base collection from existing subtype rows.
    fn populate_base(&self, tx: &mut Transaction<'_>) -> Result<usize> {
        let mut merged = 0;
        for subtype in &self.subtypes {
            for row in tx.scan(subtype)? {
                self.union_subtype_insert(tx, subtype, &row)?;
                merged += 1;
            }
        }
        Ok(merged)
    }
}

impl ReactiveRule for UnionSync {
    fn kind(&self) -> RuleKind {
        RuleKind::UnionSync
    }

    fn watches(&self) -> Vec<&str> {
        let mut watched = vec![self.base_collection.as_str()];
        watched.extend(self.subtypes.iter().map(|s| s.as_str()));
        watched
    }

    fn install(&self, tx: &mut Transaction<'_>) -> Result<()> {
        if self.subtypes.is_empty() {
            return Err(RuleError::SchemaMismatch("a union needs at least one subtype".to_string()));
        }
        let mut schemas: Vec<CollectionSchema> = Vec::with_capacity(self.subtypes.len());
        for subtype in &self.subtypes {
            if subtype == &self.base_collection || schemas.iter().any(|s| &s.name == subtype) {
                return Err(RuleError::SchemaMismatch(format!(
                    "subtype '{}' is listed twice or equals the base",
                    subtype
                )));
            }
            schemas.push(require_collection(tx, subtype)?);
        }

        let expected = self.base_schema(&schemas)?;
        match tx.schema(&self.base_collection).ok().cloned() {
            Some(existing) => require_compatible(&existing, &expected)?,
            None => {
                tx.create_collection(expected)?;
                let merged = self.populate_base(tx)?;
                info!(base = %self.base_collection, rows = merged, "base collection created");
            }
        }
        Ok(())
    }

    fn prepare_insert(&self, tx: &mut Transaction<'_>, collection: &str, _row: &mut Record) -> Result<()> {
        if self.writable(collection) {
            return Ok(());
        }
        self.guard_mirror(tx, collection)
    }

    fn prepare_update(
        &self,
        tx: &mut Transaction<'_>,
        collection: &str,
        _old: &Record,
        _new: &mut Record,
    ) -> Result<()> {
        if self.writable(collection) {
            return Ok(());
        }
        self.guard_mirror(tx, collection)
    }

    fn on_insert(&self, tx: &mut Transaction<'_>, collection: &str, row: &Record) -> Result<()> {
        match self.direction {
            SyncDirection::BaseToSub if collection == self.base_collection => self.mirror_base_insert(tx, row),
            SyncDirection::SubToBase if self.is_subtype(collection) => {
                self.union_subtype_insert(tx, collection, row)
            }
            _ => Ok(()),
        }
    }

    fn on_update(&self, tx: &mut Transaction<'_>, collection: &str, old: &Record, new: &Record) -> Result<()> {
        match self.direction {
            SyncDirection::BaseToSub if collection == self.base_collection => {
                self.mirror_base_update(tx, old, new)
            }
            SyncDirection::SubToBase if self.is_subtype(collection) => {
                self.union_subtype_update(tx, collection, old, new)
            }
            _ => Ok(()),
        }
    }

    fn on_delete(&self, tx: &mut Transaction<'_>, collection: &str, old: &Record) -> Result<()> {
        if !self.writable(collection) {
            return self.guard_mirror(tx, collection);
        }
        match self.direction {
            SyncDirection::BaseToSub => self.mirror_base_delete(tx, old),
            SyncDirection::SubToBase => self.union_subtype_delete(tx, collection, old),
        }
    }

    fn on_bulk_clear(&self, tx: &mut Transaction<'_>, collection: &str) -> Result<()> {
        if !self.writable(collection) {
            return self.guard_mirror(tx, collection);
        }
        match self.direction {
            SyncDirection::BaseToSub => {
                for subtype in &self.subtypes {
                    tx.clear(subtype)?;
                }
            }
            SyncDirection::SubToBase => {
                let discriminator = self.discriminator_field.as_str();
                tx.delete_where(&self.base_collection, |r| r.value(discriminator).as_str() == Some(collection))?;
            }
        }
        debug!(base = %self.base_collection, collection, "union side cleared");
        Ok(())
    }
}
