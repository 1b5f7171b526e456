use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use reactive_core::Record;

use crate::collection::{Collection, RowId};
use crate::database::Database;
use crate::error::{StorageError, StorageResult};
use crate::hooks::MutationObserver;
use crate::schema::CollectionSchema;

/// A unit of work against a [`Database`].
///
/// Collections are copied into the transaction on first write; reads see
/// the staged copies, so every statement observes the effects of earlier
/// statements (including hook writes) in the same transaction. `commit`
/// publishes the staged collections, `rollback` or drop discards them.
///
/// A failed statement aborts the transaction: later statements return
/// [`StorageError::TransactionAborted`] and `commit` fails.
pub struct Transaction<'db> {
    db: &'db mut Database,
    id: Uuid,
    started_at: DateTime<Utc>,
    /// `None` marks a collection dropped inside this transaction.
    staged: HashMap<String, Option<Collection>>,
    observer: Option<Arc<dyn MutationObserver>>,
    hook_depth: u32,
    aborted: bool,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(db: &'db mut Database, started_at: DateTime<Utc>) -> Self {
        let observer = db.observer.clone();
        let id = Uuid::new_v4();
        debug!(tx_id = %id, "transaction started");
        Self {
            db,
            id,
            started_at,
            staged: HashMap::new(),
            observer,
            hook_depth: 0,
            aborted: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Transaction timestamp, fixed at `begin`.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Number of mutation hooks currently executing; 0 for statements
    /// issued directly by the application.
    pub fn hook_depth(&self) -> u32 {
        self.hook_depth
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    // ── Schema ──────────────────────────────────────────────────

    pub fn create_collection(&mut self, schema: CollectionSchema) -> StorageResult<()> {
        let result = self.create_collection_inner(schema);
        self.track(result)
    }

    fn create_collection_inner(&mut self, schema: CollectionSchema) -> StorageResult<()> {
        self.ensure_active()?;
        schema.validate()?;
        if self.has_collection(&schema.name) {
            return Err(StorageError::CollectionExists(schema.name));
        }
        info!(tx_id = %self.id, collection = %schema.name, fields = schema.fields.len(), "collection created");
        self.staged
            .insert(schema.name.clone(), Some(Collection::new(schema)));
        Ok(())
    }

    pub fn drop_collection(&mut self, name: &str) -> StorageResult<()> {
        let result = self
            .ensure_active()
            .and_then(|_| self.collection(name).map(|_| ()));
        self.track(result)?;
        self.staged.insert(name.to_string(), None);
        info!(tx_id = %self.id, collection = name, "collection dropped");
        Ok(())
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collection(name).is_ok()
    }

    pub fn schema(&self, name: &str) -> StorageResult<&CollectionSchema> {
        self.collection(name).map(|c| c.schema())
    }

    /// Names of all collections visible to this transaction, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.db.collections.keys().cloned().collect();
        for (name, entry) in &self.staged {
            match entry {
                Some(_) => names.insert(name.clone()),
                None => names.remove(name),
            };
        }
        names.into_iter().collect()
    }

    // ── Reads ───────────────────────────────────────────────────

    pub fn scan(&self, name: &str) -> StorageResult<Vec<Record>> {
        self.find(name, |_| true)
    }

    pub fn find<P>(&self, name: &str, predicate: P) -> StorageResult<Vec<Record>>
    where
        P: Fn(&Record) -> bool,
    {
        self.ensure_active()?;
        Ok(self
            .collection(name)?
            .rows()
            .filter(|row| predicate(row))
            .cloned()
            .collect())
    }

    pub fn find_one<P>(&self, name: &str, predicate: P) -> StorageResult<Option<Record>>
    where
        P: Fn(&Record) -> bool,
    {
        self.ensure_active()?;
        Ok(self
            .collection(name)?
            .rows()
            .find(|row| predicate(row))
            .cloned())
    }

    pub fn count<P>(&self, name: &str, predicate: P) -> StorageResult<usize>
    where
        P: Fn(&Record) -> bool,
    {
        self.ensure_active()?;
        Ok(self
            .collection(name)?
            .rows()
            .filter(|row| predicate(row))
            .count())
    }

    // ── Writes ──────────────────────────────────────────────────

    /// Insert one row, returning the stored image (after defaults, coercion
    /// and before-hook rewrites).
    pub fn insert(&mut self, name: &str, row: Record) -> StorageResult<Record> {
        let result = self.insert_row(name, row);
        self.track(result)
    }

    /// Insert several rows as one statement.
    pub fn insert_many<I>(&mut self, name: &str, rows: I) -> StorageResult<usize>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut inserted = 0;
        for row in rows {
            self.insert(name, row)?;
            inserted += 1;
        }
        Ok(inserted)
    }

    fn insert_row(&mut self, name: &str, row: Record) -> StorageResult<Record> {
        self.ensure_active()?;
        let mut row = self.schema(name)?.conform(row)?;
        self.run_hook(|observer, tx| observer.before_insert(tx, name, &mut row))?;
        let row = self.schema(name)?.conform(row)?;
        self.check_unique(name, &row, None)?;

        let row_id = self.collection_mut(name)?.push(row.clone());
        debug!(tx_id = %self.id, collection = name, row_id, "row inserted");

        self.run_hook(|observer, tx| observer.after_insert(tx, name, &row))?;
        Ok(row)
    }

    /// Apply `mutate` to every row matching `predicate`. Returns the number
    /// of rows updated.
    pub fn update_where<P, M>(&mut self, name: &str, predicate: P, mutate: M) -> StorageResult<usize>
    where
        P: Fn(&Record) -> bool,
        M: FnMut(&mut Record),
    {
        let result = self.update_rows(name, predicate, mutate);
        self.track(result)
    }

    fn update_rows<P, M>(&mut self, name: &str, predicate: P, mut mutate: M) -> StorageResult<usize>
    where
        P: Fn(&Record) -> bool,
        M: FnMut(&mut Record),
    {
        self.ensure_active()?;
        let targets = self.collection(name)?.matching(&predicate);

        let mut updated = 0;
        for row_id in targets {
            // A hook of an earlier row may already have removed this one.
            let Some(old) = self.collection(name)?.get(row_id).cloned() else {
                continue;
            };
            let mut new = old.clone();
            mutate(&mut new);
            let mut new = self.schema(name)?.conform(new)?;
            self.run_hook(|observer, tx| observer.before_update(tx, name, &old, &mut new))?;
            let new = self.schema(name)?.conform(new)?;
            if self.collection(name)?.get(row_id).is_none() {
                continue;
            }
            self.check_unique(name, &new, Some(row_id))?;
            self.collection_mut(name)?.replace(row_id, new.clone());

            self.run_hook(|observer, tx| observer.after_update(tx, name, &old, &new))?;
            updated += 1;
        }

        debug!(tx_id = %self.id, collection = name, rows = updated, "rows updated");
        Ok(updated)
    }

    /// Delete every row matching `predicate`, delivering a row-level
    /// delete event per row. Returns the number of rows deleted.
    pub fn delete_where<P>(&mut self, name: &str, predicate: P) -> StorageResult<usize>
    where
        P: Fn(&Record) -> bool,
    {
        let result = self.delete_rows(name, predicate);
        self.track(result)
    }

    fn delete_rows<P>(&mut self, name: &str, predicate: P) -> StorageResult<usize>
    where
        P: Fn(&Record) -> bool,
    {
        self.ensure_active()?;
        let targets = self.collection(name)?.matching(&predicate);

        let mut deleted = 0;
        for row_id in targets {
            let Some(old) = self.collection_mut(name)?.remove(row_id) else {
                continue;
            };
            self.run_hook(|observer, tx| observer.after_delete(tx, name, &old))?;
            deleted += 1;
        }

        debug!(tx_id = %self.id, collection = name, rows = deleted, "rows deleted");
        Ok(deleted)
    }

    /// Remove every row at once. Delivers one statement-level
    /// `after_bulk_clear` event and no row-level events.
    pub fn clear(&mut self, name: &str) -> StorageResult<usize> {
        let result = self.clear_rows(name);
        self.track(result)
    }

    fn clear_rows(&mut self, name: &str) -> StorageResult<usize> {
        self.ensure_active()?;
        let removed = self.collection_mut(name)?.clear();
        info!(tx_id = %self.id, collection = name, rows = removed, "collection cleared");
        self.run_hook(|observer, tx| observer.after_bulk_clear(tx, name, removed))?;
        Ok(removed)
    }

    // ── Completion ──────────────────────────────────────────────

    pub fn commit(self) -> StorageResult<()> {
        if self.aborted {
            warn!(tx_id = %self.id, "commit refused, transaction is aborted");
            return Err(StorageError::TransactionAborted);
        }

        let Transaction { db, id, staged, .. } = self;
        let changed = staged.len();
        for (name, entry) in staged {
            match entry {
                Some(collection) => {
                    db.collections.insert(name, collection);
                }
                None => {
                    db.collections.remove(&name);
                }
            }
        }
        debug!(tx_id = %id, collections = changed, "transaction committed");
        Ok(())
    }

    pub fn rollback(self) {
        debug!(tx_id = %self.id, collections = self.staged.len(), "transaction rolled back");
    }

    // ── Internals ───────────────────────────────────────────────

    fn ensure_active(&self) -> StorageResult<()> {
        if self.aborted {
            Err(StorageError::TransactionAborted)
        } else {
            Ok(())
        }
    }

    fn track<T>(&mut self, result: StorageResult<T>) -> StorageResult<T> {
        if let Err(e) = &result {
            if !self.aborted {
                warn!(tx_id = %self.id, error = %e, "statement failed, aborting transaction");
                self.aborted = true;
            }
        }
        result
    }

    fn collection(&self, name: &str) -> StorageResult<&Collection> {
        match self.staged.get(name) {
            Some(Some(collection)) => Ok(collection),
            Some(None) => Err(StorageError::CollectionNotFound(name.to_string())),
            None => self
                .db
                .collections
                .get(name)
                .ok_or_else(|| StorageError::CollectionNotFound(name.to_string())),
        }
    }

    fn collection_mut(&mut self, name: &str) -> StorageResult<&mut Collection> {
        if !self.staged.contains_key(name) {
            let copy = self
                .db
                .collections
                .get(name)
                .cloned()
                .ok_or_else(|| StorageError::CollectionNotFound(name.to_string()))?;
            self.staged.insert(name.to_string(), Some(copy));
        }
        match self.staged.get_mut(name) {
            Some(Some(collection)) => Ok(collection),
            _ => Err(StorageError::CollectionNotFound(name.to_string())),
        }
    }

    fn check_unique(&self, name: &str, row: &Record, skip: Option<RowId>) -> StorageResult<()> {
        let collection = self.collection(name)?;
        let Some(pk) = collection.schema().primary_key.as_deref() else {
            return Ok(());
        };
        let key = row.value(pk);
        let clash = collection
            .matching(|r| r.value(pk) == key)
            .into_iter()
            .any(|id| Some(id) != skip);
        if clash {
            return Err(StorageError::ConstraintViolation {
                collection: name.to_string(),
                reason: format!("duplicate primary key {}={}", pk, key),
            });
        }
        Ok(())
    }

    fn run_hook<F>(&mut self, hook: F) -> StorageResult<()>
    where
        F: FnOnce(&dyn MutationObserver, &mut Transaction<'db>) -> StorageResult<()>,
    {
        let Some(observer) = self.observer.clone() else {
            return Ok(());
        };
        let max_depth = self.db.max_hook_depth;
        if self.hook_depth >= max_depth {
            return Err(StorageError::HookDepthExceeded {
                depth: self.hook_depth + 1,
                max_depth,
            });
        }
        self.hook_depth += 1;
        let outcome = hook(observer.as_ref(), self);
        self.hook_depth -= 1;
        outcome
    }
}
