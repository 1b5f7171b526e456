use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use reactive_core::{FieldType, FieldValue, Record};

use crate::error::{StorageError, StorageResult};

/// Definition of one field of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Value used when an insert omits the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<FieldValue>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            default: None,
        }
    }

    pub fn with_default(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Shape of a collection: ordered fields plus an optional primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            primary_key: None,
        }
    }

    /// Builder: append a field.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldDef::new(name, field_type));
        self
    }

    /// Builder: append a field with a default value.
    pub fn field_with_default(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        default: impl Into<FieldValue>,
    ) -> Self {
        self.fields
            .push(FieldDef::new(name, field_type).with_default(default));
        self
    }

    /// Builder: declare the primary key field.
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == field)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        self.get(field).map(|f| f.field_type)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Check the schema itself: non-empty name, unique field names, a
    /// primary key that names an existing field.
    pub fn validate(&self) -> StorageResult<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("collection name must not be empty"));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(self.invalid(format!("duplicate field '{}'", field.name)));
            }
            if let Some(default) = &field.default {
                default.clone().coerce(field.field_type, &field.name)?;
            }
        }
        if let Some(pk) = &self.primary_key {
            if !self.has_field(pk) {
                return Err(self.invalid(format!("primary key '{}' is not a field", pk)));
            }
        }
        Ok(())
    }

    /// Bring a written row into schema shape.
    ///
    /// Fields come out in schema order. Unknown fields are rejected, missing
    /// fields take the field default (or `Null`), and values are coerced to
    /// the declared type. A declared primary key must be non-null.
    pub fn conform(&self, row: Record) -> StorageResult<Record> {
        if let Some(unknown) = row.field_names().find(|f| !self.has_field(f)) {
            return Err(StorageError::UnknownField {
                collection: self.name.clone(),
                field: unknown.to_string(),
            });
        }

        let mut row = row;
        let mut conformed = Record::new();
        for def in &self.fields {
            let value = match row.remove(&def.name) {
                Some(v) => v,
                None => def.default.clone().unwrap_or(FieldValue::Null),
            };
            conformed.set(def.name.clone(), value.coerce(def.field_type, &def.name)?);
        }

        if let Some(pk) = &self.primary_key {
            if conformed.value(pk).is_null() {
                return Err(StorageError::ConstraintViolation {
                    collection: self.name.clone(),
                    reason: format!("primary key '{}' must not be null", pk),
                });
            }
        }
        Ok(conformed)
    }

    fn invalid(&self, reason: impl Into<String>) -> StorageError {
        StorageError::InvalidSchema {
            collection: self.name.clone(),
            reason: reason.into(),
        }
    }
}
