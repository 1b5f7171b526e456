//! The capability every rule kind implements.
//!
//! [`RuleEngine`](crate::engine::RuleEngine) delivers the storage engine's
//! mutation hooks to each enabled instance watching the mutated collection.
//! `prepare_*` run before the row is written and may rewrite it; `on_*` run
//! after. All of them execute inside the mutating transaction.

use reactive_core::Record;
use reactive_storage::Transaction;

use crate::definition::RuleKind;
use crate::error::{Result, RuleError};

pub trait ReactiveRule {
    fn kind(&self) -> RuleKind;

    /// Collections whose events this rule consumes.
    fn watches(&self) -> Vec<&str>;

    /// Validate the configuration against the current schema and create or
    /// populate derived collections. Runs once, at create time.
    fn install(&self, tx: &mut Transaction<'_>) -> Result<()>;

    fn prepare_insert(&self, _tx: &mut Transaction<'_>, _collection: &str, _row: &mut Record) -> Result<()> {
        Ok(())
    }

    fn on_insert(&self, _tx: &mut Transaction<'_>, _collection: &str, _row: &Record) -> Result<()> {
        Ok(())
    }

    fn prepare_update(
        &self,
        _tx: &mut Transaction<'_>,
        _collection: &str,
        _old: &Record,
        _new: &mut Record,
    ) -> Result<()> {
        Ok(())
    }

    fn on_update(&self, _tx: &mut Transaction<'_>, _collection: &str, _old: &Record, _new: &Record) -> Result<()> {
        Ok(())
    }

    fn on_delete(&self, _tx: &mut Transaction<'_>, _collection: &str, _old: &Record) -> Result<()> {
        Ok(())
    }

    fn on_bulk_clear(&self, _tx: &mut Transaction<'_>, _collection: &str) -> Result<()> {
        Ok(())
    }

    /// Recompute all derived state from scratch.
    fn refresh(&self, _tx: &mut Transaction<'_>) -> Result<()> {
        Err(RuleError::Unsupported {
            kind: self.kind(),
            operation: "refresh",
        })
    }
}
