use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use reactive_core::{FieldType, FieldValue, Record};
use reactive_storage::{CollectionSchema, Transaction};

use crate::definition::RuleKind;
use crate::error::{Result, RuleError};
use crate::handler::ReactiveRule;
use crate::validation::{require_collection, require_compatible, require_field, require_numeric};

const MIN_VALUE: &str = "min_value";
const ID_OF_MIN: &str = "id_of_min";
const MAX_VALUE: &str = "max_value";
const ID_OF_MAX: &str = "id_of_max";
const ROW_COUNT: &str = "row_count";

const DERIVED_FIELDS: [&str; 5] = [MIN_VALUE, ID_OF_MIN, MAX_VALUE, ID_OF_MAX, ROW_COUNT];

/// Maintains one row per distinct `group_by` key in `target_collection`
/// holding the group's min and max of `value_field` (with the id of the
/// holding row) and its row count.
///
/// When several rows share an extreme value the holder is the one with the
/// smallest id. Null values count towards `row_count` but never hold an
/// extremum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAggregate {
    pub source_collection: String,
    pub id_field: String,
    pub value_field: String,
    pub group_by: Vec<String>,
    pub target_collection: String,
}

/// Aggregate of one group as computed by a scan. Extremes are
/// `(value, id)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupSummary {
    pub row_count: i64,
    pub min: Option<(FieldValue, FieldValue)>,
    pub max: Option<(FieldValue, FieldValue)>,
}

impl GroupSummary {
    /// Fold one source row into the summary.
    pub fn add(&mut self, value: &FieldValue, id: &FieldValue) {
        self.row_count += 1;
        if value.is_null() {
            return;
        }
        let candidate = (value.clone(), id.clone());
        if self.min.as_ref().map_or(true, |held| beats_min(&candidate, held)) {
            self.min = Some(candidate.clone());
        }
        if self.max.as_ref().map_or(true, |held| beats_max(&candidate, held)) {
            self.max = Some(candidate);
        }
    }

    fn from_row(row: &Record) -> Self {
        let pair = |value: &str, id: &str| {
            let v = row.value(value);
            (!v.is_null()).then(|| (v.clone(), row.value(id).clone()))
        };
        Self {
            row_count: row.value(ROW_COUNT).as_i64().unwrap_or(0),
            min: pair(MIN_VALUE, ID_OF_MIN),
            max: pair(MAX_VALUE, ID_OF_MAX),
        }
    }

    fn write_into(&self, row: &mut Record) {
        let (min_value, id_of_min) = self.min.clone().unwrap_or((FieldValue::Null, FieldValue::Null));
        let (max_value, id_of_max) = self.max.clone().unwrap_or((FieldValue::Null, FieldValue::Null));
        row.set(MIN_VALUE, min_value);
        row.set(ID_OF_MIN, id_of_min);
        row.set(MAX_VALUE, max_value);
        row.set(ID_OF_MAX, id_of_max);
        row.set(ROW_COUNT, self.row_count);
    }

    fn holds_extreme(&self, id: &FieldValue) -> bool {
        let holds = |pair: &Option<(FieldValue, FieldValue)>| pair.as_ref().is_some_and(|(_, held)| held == id);
        holds(&self.min) || holds(&self.max)
    }
}

/// `(value, id)` ordering: lower value wins, ties go to the smaller id.
fn beats_min(candidate: &(FieldValue, FieldValue), held: &(FieldValue, FieldValue)) -> bool {
    candidate < held
}

/// Higher value wins, ties go to the smaller id.
fn beats_max(candidate: &(FieldValue, FieldValue), held: &(FieldValue, FieldValue)) -> bool {
    candidate.0 > held.0 || (candidate.0 == held.0 && candidate.1 < held.1)
}

impl GroupAggregate {
    fn group_key(&self, row: &Record) -> Vec<FieldValue> {
        row.key(&self.group_by)
    }

    fn in_group<'a>(&'a self, key: &'a [FieldValue]) -> impl Fn(&Record) -> bool + 'a {
        move |row: &Record| self.group_by.iter().zip(key).all(|(field, value)| row.value(field) == value)
    }

    /// Schema of the aggregate collection for a given source schema.
    pub fn target_schema(&self, source: &CollectionSchema) -> Result<CollectionSchema> {
        let mut schema = CollectionSchema::new(self.target_collection.clone());
        for field in &self.group_by {
            if DERIVED_FIELDS.contains(&field.as_str()) {
                return Err(RuleError::SchemaMismatch(format!(
                    "grouping field '{}' collides with an aggregate column",
                    field
                )));
            }
            schema = schema.field(field.clone(), require_field(source, field)?);
        }
        let value_type = require_numeric(source, &self.value_field)?;
        let id_type = require_field(source, &self.id_field)?;
        Ok(schema
            .field(MIN_VALUE, value_type)
            .field(ID_OF_MIN, id_type)
            .field(MAX_VALUE, value_type)
            .field(ID_OF_MAX, id_type)
            .field(ROW_COUNT, FieldType::Integer))
    }

    /// Scoped scan of the source rows sharing `key`. This is the fallback
    /// used when an extremum holder leaves its group.
    pub fn scan_group(&self, tx: &Transaction<'_>, key: &[FieldValue]) -> Result<GroupSummary> {
        let mut summary = GroupSummary::default();
        for row in tx.find(&self.source_collection, self.in_group(key))? {
            summary.add(row.value(&self.value_field), row.value(&self.id_field));
        }
        debug!(source = %self.source_collection, rows = summary.row_count, "group rescanned");
        Ok(summary)
    }

    /// Full recompute of every group, ordered by group key.
    pub fn scan_all(&self, tx: &Transaction<'_>) -> Result<BTreeMap<Vec<FieldValue>, GroupSummary>> {
        let mut groups: BTreeMap<Vec<FieldValue>, GroupSummary> = BTreeMap::new();
        for row in tx.scan(&self.source_collection)? {
            groups
                .entry(self.group_key(&row))
                .or_default()
                .add(row.value(&self.value_field), row.value(&self.id_field));
        }
        Ok(groups)
    }

    fn aggregate_row(&self, tx: &Transaction<'_>, key: &[FieldValue]) -> Result<Option<GroupSummary>> {
        Ok(tx
            .find_one(&self.target_collection, self.in_group(key))?
            .map(|row| GroupSummary::from_row(&row)))
    }

    fn write_aggregate(&self, tx: &mut Transaction<'_>, key: &[FieldValue], summary: &GroupSummary) -> Result<()> {
        tx.update_where(&self.target_collection, self.in_group(key), |row| summary.write_into(row))?;
        Ok(())
    }

    fn insert_aggregate(&self, tx: &mut Transaction<'_>, key: &[FieldValue], summary: &GroupSummary) -> Result<()> {
        let mut row: Record = self.group_by.iter().cloned().zip(key.iter().cloned()).collect();
        summary.write_into(&mut row);
        tx.insert(&self.target_collection, row)?;
        Ok(())
    }

    fn missing_group(&self, key: &[FieldValue]) -> RuleError {
        RuleError::InvariantViolation(format!(
            "no row in '{}' for group {:?}",
            self.target_collection, key
        ))
    }

    fn add_row(&self, tx: &mut Transaction<'_>, row: &Record) -> Result<()> {
        let key = self.group_key(row);
        let value = row.value(&self.value_field);
        let id = row.value(&self.id_field);
        match self.aggregate_row(tx, &key)? {
            None => {
                let mut summary = GroupSummary::default();
                summary.add(value, id);
                self.insert_aggregate(tx, &key, &summary)
            }
            Some(mut summary) => {
                summary.add(value, id);
                self.write_aggregate(tx, &key, &summary)
            }
        }
    }

    fn remove_row(&self, tx: &mut Transaction<'_>, row: &Record) -> Result<()> {
        let key = self.group_key(row);
        let id = row.value(&self.id_field);
        let Some(mut summary) = self.aggregate_row(tx, &key)? else {
            return Err(self.missing_group(&key));
        };

        let remaining = summary.row_count - 1;
        if remaining < 0 {
            return Err(self.missing_group(&key));
        }
        if remaining == 0 {
            tx.delete_where(&self.target_collection, self.in_group(&key))?;
            return Ok(());
        }

        if summary.holds_extreme(id) {
            summary = self.rescan(tx, &key, remaining)?;
        } else {
            summary.row_count = remaining;
        }
        self.write_aggregate(tx, &key, &summary)
    }

    /// Fallback scan, checked against the row count the aggregate expects.
    fn rescan(&self, tx: &Transaction<'_>, key: &[FieldValue], expected: i64) -> Result<GroupSummary> {
        let summary = self.scan_group(tx, key)?;
        if summary.row_count != expected {
            return Err(RuleError::InvariantViolation(format!(
                "group {:?} of '{}' has {} rows, aggregate expects {}",
                key, self.source_collection, summary.row_count, expected
            )));
        }
        Ok(summary)
    }

    fn update_in_group(&self, tx: &mut Transaction<'_>, old: &Record, new: &Record) -> Result<()> {
        let key = self.group_key(new);
        let old_id = old.value(&self.id_field);
        let new_id = new.value(&self.id_field);
        let new_value = new.value(&self.value_field);
        if old_id == new_id && old.value(&self.value_field) == new_value {
            return Ok(());
        }

        let Some(mut summary) = self.aggregate_row(tx, &key)? else {
            return Err(self.missing_group(&key));
        };
        if old_id != new_id || summary.holds_extreme(old_id) {
            summary = self.rescan(tx, &key, summary.row_count)?;
        } else if !new_value.is_null() {
            let candidate = (new_value.clone(), new_id.clone());
            if summary.min.as_ref().map_or(true, |held| beats_min(&candidate, held)) {
                summary.min = Some(candidate.clone());
            }
            if summary.max.as_ref().map_or(true, |held| beats_max(&candidate, held)) {
                summary.max = Some(candidate);
            }
        }
        self.write_aggregate(tx, &key, &summary)
    }
}

impl ReactiveRule for GroupAggregate {
    fn kind(&self) -> RuleKind {
        RuleKind::GroupAggregate
    }

    fn watches(&self) -> Vec<&str> {
        vec![self.source_collection.as_str()]
    }

    fn install(&self, tx: &mut Transaction<'_>) -> Result<()> {
        if self.target_collection == self.source_collection {
            return Err(RuleError::SchemaMismatch(
                "aggregate collection must differ from the source".to_string(),
            ));
        }
        let source = require_collection(tx, &self.source_collection)?;
        let expected = self.target_schema(&source)?;
        match tx.schema(&self.target_collection).ok().cloned() {
            Some(existing) => require_compatible(&existing, &expected)?,
            None => {
                info!(target = %self.target_collection, "creating aggregate collection");
                tx.create_collection(expected)?;
            }
        }
        self.refresh(tx)
    }

    fn on_insert(&self, tx: &mut Transaction<'_>, _collection: &str, row: &Record) -> Result<()> {
        self.add_row(tx, row)
    }

    fn on_update(&self, tx: &mut Transaction<'_>, _collection: &str, old: &Record, new: &Record) -> Result<()> {
        if self.group_key(old) != self.group_key(new) {
            self.remove_row(tx, old)?;
            self.add_row(tx, new)
        } else {
            self.update_in_group(tx, old, new)
        }
    }

    fn on_delete(&self, tx: &mut Transaction<'_>, _collection: &str, old: &Record) -> Result<()> {
        self.remove_row(tx, old)
    }

    fn on_bulk_clear(&self, tx: &mut Transaction<'_>, _collection: &str) -> Result<()> {
        let removed = tx.clear(&self.target_collection)?;
        debug!(target = %self.target_collection, rows = removed, "source cleared, aggregates dropped");
        Ok(())
    }

    fn refresh(&self, tx: &mut Transaction<'_>) -> Result<()> {
        let groups = self.scan_all(tx)?;
        tx.clear(&self.target_collection)?;
        for (key, summary) in &groups {
            self.insert_aggregate(tx, key, summary)?;
        }
        info!(target = %self.target_collection, groups = groups.len(), "aggregates recomputed");
        Ok(())
    }
}
