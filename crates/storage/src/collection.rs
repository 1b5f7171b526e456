use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use reactive_core::Record;

use crate::schema::CollectionSchema;

/// Internal row address, stable for the lifetime of the row.
pub type RowId = u64;

/// Rows of one collection, keyed by [`RowId`] in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    schema: CollectionSchema,
    rows: BTreeMap<RowId, Record>,
    next_row_id: RowId,
}

impl Collection {
    pub fn new(schema: CollectionSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 1,
        }
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &Record> {
        self.rows.values()
    }

    pub fn get(&self, row_id: RowId) -> Option<&Record> {
        self.rows.get(&row_id)
    }

    /// Row ids whose record satisfies `predicate`, in insertion order.
    pub fn matching<P>(&self, predicate: P) -> Vec<RowId>
    where
        P: Fn(&Record) -> bool,
    {
        self.rows
            .iter()
            .filter(|(_, row)| predicate(row))
            .map(|(id, _)| *id)
            .collect()
    }

    pub(crate) fn push(&mut self, row: Record) -> RowId {
        let id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.insert(id, row);
        id
    }

    pub(crate) fn replace(&mut self, row_id: RowId, row: Record) -> Option<Record> {
        self.rows.insert(row_id, row)
    }

    pub(crate) fn remove(&mut self, row_id: RowId) -> Option<Record> {
        self.rows.remove(&row_id)
    }

    pub(crate) fn clear(&mut self) -> usize {
        let removed = self.rows.len();
        self.rows.clear();
        removed
    }
}
