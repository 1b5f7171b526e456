use serde::{Deserialize, Serialize};
use tracing::debug;

use reactive_core::{FieldType, Record};
use reactive_storage::Transaction;

use crate::definition::RuleKind;
use crate::error::Result;
use crate::handler::ReactiveRule;
use crate::validation::{require_collection, require_field_type};

/// Stamps `field` with the transaction timestamp on every insert and
/// update of `collection`, overwriting whatever the statement supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionStamp {
    pub collection: String,
    pub field: String,
}

impl RevisionStamp {
    pub fn new(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
        }
    }

    fn stamp(&self, tx: &Transaction<'_>, row: &mut Record) {
        let now = tx.timestamp();
        debug!(collection = %self.collection, field = %self.field, %now, "stamping row");
        row.set(self.field.clone(), now);
    }
}

impl ReactiveRule for RevisionStamp {
    fn kind(&self) -> RuleKind {
        RuleKind::RevisionStamp
    }

    fn watches(&self) -> Vec<&str> {
        vec![self.collection.as_str()]
    }

    fn install(&self, tx: &mut Transaction<'_>) -> Result<()> {
        let schema = require_collection(tx, &self.collection)?;
        require_field_type(&schema, &self.field, FieldType::Timestamp)
    }

    fn prepare_insert(&self, tx: &mut Transaction<'_>, _collection: &str, row: &mut Record) -> Result<()> {
        self.stamp(tx, row);
        Ok(())
    }

    fn prepare_update(
        &self,
        tx: &mut Transaction<'_>,
        _collection: &str,
        _old: &Record,
        new: &mut Record,
    ) -> Result<()> {
        self.stamp(tx, new);
        Ok(())
    }
}
