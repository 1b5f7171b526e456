//! Create-time schema checks shared by the rule kinds.
//!
//! Every failure is a [`RuleError::SchemaMismatch`] naming the offending
//! collection and field.

use reactive_core::FieldType;
use reactive_storage::{CollectionSchema, Transaction};

use crate::error::{Result, RuleError};

pub fn require_collection(tx: &Transaction<'_>, name: &str) -> Result<CollectionSchema> {
    tx.schema(name)
        .map(|schema| schema.clone())
        .map_err(|_| RuleError::SchemaMismatch(format!("collection '{}' does not exist", name)))
}

pub fn require_field(schema: &CollectionSchema, field: &str) -> Result<FieldType> {
    schema.field_type(field).ok_or_else(|| {
        RuleError::SchemaMismatch(format!(
            "collection '{}' has no field '{}'",
            schema.name, field
        ))
    })
}

pub fn require_field_type(schema: &CollectionSchema, field: &str, expected: FieldType) -> Result<()> {
    let found = require_field(schema, field)?;
    if found != expected {
        return Err(RuleError::SchemaMismatch(format!(
            "field '{}.{}' must be {}, found {}",
            schema.name, field, expected, found
        )));
    }
    Ok(())
}

pub fn require_numeric(schema: &CollectionSchema, field: &str) -> Result<FieldType> {
    let found = require_field(schema, field)?;
    if !found.is_numeric() {
        return Err(RuleError::SchemaMismatch(format!(
            "field '{}.{}' must be numeric, found {}",
            schema.name, field, found
        )));
    }
    Ok(found)
}

/// Check that `existing` carries every field of `expected` with the same
/// type. Extra fields are allowed.
pub fn require_compatible(existing: &CollectionSchema, expected: &CollectionSchema) -> Result<()> {
    for def in &expected.fields {
        require_field_type(existing, &def.name, def.field_type)?;
    }
    Ok(())
}
