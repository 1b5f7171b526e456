//! YAML scenario scripts.
//!
//! ```yaml
//! description: invoices counted per customer
//! steps:
//!   - op: create_collection
//!     name: customer
//!     primary_key: id
//!     fields:
//!       - { name: id, type: integer }
//!       - { name: invoice_count, type: integer, default: 0 }
//!   - op: provision
//!   - op: insert
//!     collection: customer
//!     rows:
//!       - { id: 1 }
//!   - op: commit
//! ```
//!
//! Steps between two `commit` steps run in one transaction. The first
//! failing step rolls its transaction back and stops the script; earlier
//! transactions stay committed.

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::{debug, info};

use reactive_core::{FieldType, FieldValue, Record};
use reactive_rules::{RuleDeclaration, RuleEngine};
use reactive_storage::{CollectionSchema, Database, FieldDef, Transaction};

/// A row as written in a script: field name to YAML scalar.
pub type RowSpec = IndexMap<String, Value>;

#[derive(Debug, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    CreateCollection {
        name: String,
        fields: Vec<FieldSpec>,
        #[serde(default)]
        primary_key: Option<String>,
    },
    CreateRule {
        rule: RuleDeclaration,
    },
    /// Ensure every declaration from the rules directory.
    Provision,
    Insert {
        collection: String,
        rows: Vec<RowSpec>,
    },
    Update {
        collection: String,
        #[serde(default, rename = "where")]
        filter: RowSpec,
        set: RowSpec,
    },
    Delete {
        collection: String,
        #[serde(default, rename = "where")]
        filter: RowSpec,
    },
    Clear {
        collection: String,
    },
    Enable {
        id: String,
    },
    Disable {
        id: String,
    },
    Refresh {
        id: String,
    },
    DropRule {
        id: String,
    },
    Commit,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::CreateCollection { .. } => "create_collection",
            Step::CreateRule { .. } => "create_rule",
            Step::Provision => "provision",
            Step::Insert { .. } => "insert",
            Step::Update { .. } => "update",
            Step::Delete { .. } => "delete",
            Step::Clear { .. } => "clear",
            Step::Enable { .. } => "enable",
            Step::Disable { .. } => "disable",
            Step::Refresh { .. } => "refresh",
            Step::DropRule { .. } => "drop_rule",
            Step::Commit => "commit",
        }
    }
}

impl Script {
    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("invalid scenario script")
    }
}

/// Counters reported after a run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub transactions: usize,
    pub steps: usize,
    pub rows_written: usize,
}

/// Execute `script`; `declarations` backs the `provision` step.
pub fn run(
    db: &mut Database,
    engine: &RuleEngine,
    declarations: &[RuleDeclaration],
    script: &Script,
) -> Result<RunSummary> {
    if let Some(description) = &script.description {
        info!(description = %description, steps = script.steps.len(), "running script");
    }

    let mut summary = RunSummary::default();
    let mut offset = 0;
    for batch in script.steps.split(|s| matches!(s, Step::Commit)) {
        let first = offset;
        offset += batch.len() + 1;
        if batch.is_empty() {
            continue;
        }

        let written = db.execute(|tx| -> Result<usize> {
            let mut written = 0;
            for (i, step) in batch.iter().enumerate() {
                written += apply(tx, engine, declarations, step)
                    .with_context(|| format!("step {} ({}) failed", first + i + 1, step.name()))?;
            }
            Ok(written)
        })?;

        summary.transactions += 1;
        summary.steps += batch.len();
        summary.rows_written += written;
        debug!(steps = batch.len(), rows = written, "script transaction committed");
    }
    Ok(summary)
}

/// Apply one step; returns the number of rows it wrote directly.
fn apply(
    tx: &mut Transaction<'_>,
    engine: &RuleEngine,
    declarations: &[RuleDeclaration],
    step: &Step,
) -> Result<usize> {
    match step {
        Step::CreateCollection { name, fields, primary_key } => {
            let mut schema = CollectionSchema::new(name.clone());
            for spec in fields {
                let mut def = FieldDef::new(spec.name.clone(), spec.field_type);
                if let Some(default) = &spec.default {
                    def = def.with_default(to_field_value(&spec.name, default)?);
                }
                schema.fields.push(def);
            }
            if let Some(pk) = primary_key {
                schema = schema.primary_key(pk.clone());
            }
            tx.create_collection(schema)?;
            Ok(0)
        }
        Step::CreateRule { rule } => {
            engine.create(tx, rule.clone())?;
            Ok(0)
        }
        Step::Provision => {
            let created = engine.provision(tx, declarations.iter().cloned())?;
            info!(declarations = declarations.len(), created, "declarations provisioned");
            Ok(0)
        }
        Step::Insert { collection, rows } => {
            let rows = rows.iter().map(to_record).collect::<Result<Vec<_>>>()?;
            Ok(tx.insert_many(collection, rows)?)
        }
        Step::Update { collection, filter, set } => {
            let criteria = criteria(tx, collection, filter)?;
            let changes = to_record(set)?;
            Ok(tx.update_where(
                collection,
                |r| matches_all(r, &criteria),
                |r| {
                    for (field, value) in changes.iter() {
                        r.set(field, value.clone());
                    }
                },
            )?)
        }
        Step::Delete { collection, filter } => {
            let criteria = criteria(tx, collection, filter)?;
            Ok(tx.delete_where(collection, |r| matches_all(r, &criteria))?)
        }
        Step::Clear { collection } => Ok(tx.clear(collection)?),
        Step::Enable { id } => {
            engine.enable(tx, id)?;
            Ok(0)
        }
        Step::Disable { id } => {
            engine.disable(tx, id)?;
            Ok(0)
        }
        Step::Refresh { id } => {
            engine.refresh(tx, id)?;
            Ok(0)
        }
        Step::DropRule { id } => {
            engine.drop_rule(tx, id)?;
            Ok(0)
        }
        Step::Commit => Ok(0),
    }
}

/// Equality criteria with values coerced to the collection's field types,
/// so `amount: 5` matches a stored float `5.0`.
fn criteria(tx: &Transaction<'_>, collection: &str, filter: &RowSpec) -> Result<Vec<(String, FieldValue)>> {
    let schema = tx.schema(collection)?;
    filter
        .iter()
        .map(|(field, value)| -> Result<(String, FieldValue)> {
            let Some(field_type) = schema.field_type(field) else {
                bail!("collection '{}' has no field '{}'", collection, field);
            };
            let value = to_field_value(field, value)?.coerce(field_type, field)?;
            Ok((field.clone(), value))
        })
        .collect()
}

fn matches_all(row: &Record, criteria: &[(String, FieldValue)]) -> bool {
    criteria.iter().all(|(field, value)| row.value(field) == value)
}

pub fn to_record(spec: &RowSpec) -> Result<Record> {
    spec.iter()
        .map(|(field, value)| -> Result<(String, FieldValue)> { Ok((field.clone(), to_field_value(field, value)?)) })
        .collect()
}

/// Convert a YAML scalar. Integers stay integers; the schema widens them
/// where a float is declared.
pub fn to_field_value(field: &str, value: &Value) -> Result<FieldValue> {
    Ok(match value {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Boolean(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => FieldValue::Integer(i),
            (None, Some(f)) => FieldValue::Float(f),
            (None, None) => bail!("field '{}': number {} is out of range", field, n),
        },
        Value::String(s) => FieldValue::Text(s.clone()),
        Value::Tagged(tagged) => to_field_value(field, &tagged.value)?,
        Value::Sequence(_) | Value::Mapping(_) => {
            bail!("field '{}': only scalar values are supported", field)
        }
    })
}

/// JSON rendering of a record for display.
pub fn to_json(record: &Record) -> serde_json::Value {
    let map = record
        .iter()
        .map(|(field, value)| {
            let json = match value {
                FieldValue::Null => serde_json::Value::Null,
                FieldValue::Boolean(b) => serde_json::Value::Bool(*b),
                FieldValue::Integer(i) => serde_json::Value::from(*i),
                FieldValue::Float(f) => serde_json::Value::from(*f),
                FieldValue::Text(s) => serde_json::Value::String(s.clone()),
                FieldValue::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
            };
            (field.to_string(), json)
        })
        .collect();
    serde_json::Value::Object(map)
}
