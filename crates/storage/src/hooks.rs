//! Mutation hook seam between the storage engine and whatever reacts to
//! row changes.
//!
//! Every row-level mutation delivers a before-hook (which may rewrite the
//! incoming row image) and an after-hook; `clear` delivers a single
//! statement-level `after_bulk_clear`. Hooks run inside the mutating
//! transaction and may issue further statements through it. Returning an
//! error aborts the transaction.

use reactive_core::Record;

use crate::error::StorageResult;
use crate::transaction::Transaction;

pub trait MutationObserver: Send + Sync {
    fn before_insert(
        &self,
        _tx: &mut Transaction<'_>,
        _collection: &str,
        _row: &mut Record,
    ) -> StorageResult<()> {
        Ok(())
    }

    fn after_insert(
        &self,
        _tx: &mut Transaction<'_>,
        _collection: &str,
        _row: &Record,
    ) -> StorageResult<()> {
        Ok(())
    }

    fn before_update(
        &self,
        _tx: &mut Transaction<'_>,
        _collection: &str,
        _old: &Record,
        _new: &mut Record,
    ) -> StorageResult<()> {
        Ok(())
    }

    fn after_update(
        &self,
        _tx: &mut Transaction<'_>,
        _collection: &str,
        _old: &Record,
        _new: &Record,
    ) -> StorageResult<()> {
        Ok(())
    }

    fn after_delete(
        &self,
        _tx: &mut Transaction<'_>,
        _collection: &str,
        _old: &Record,
    ) -> StorageResult<()> {
        Ok(())
    }

    /// Statement-level: all rows of `collection` were removed at once.
    fn after_bulk_clear(
        &self,
        _tx: &mut Transaction<'_>,
        _collection: &str,
        _removed: usize,
    ) -> StorageResult<()> {
        Ok(())
    }
}
