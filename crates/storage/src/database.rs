use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use reactive_core::Record;

use crate::collection::Collection;
use crate::error::{StorageError, StorageResult};
use crate::hooks::MutationObserver;
use crate::transaction::Transaction;

pub const DEFAULT_MAX_HOOK_DEPTH: u32 = 16;

/// In-memory transactional collection store.
///
/// All access goes through a [`Transaction`]; committed state can be read
/// directly and persisted as a JSON snapshot.
pub struct Database {
    pub(crate) collections: BTreeMap<String, Collection>,
    pub(crate) observer: Option<Arc<dyn MutationObserver>>,
    pub(crate) max_hook_depth: u32,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    saved_at: DateTime<Utc>,
    collections: &'a BTreeMap<String, Collection>,
}

#[derive(Deserialize)]
struct Snapshot {
    #[allow(dead_code)]
    saved_at: DateTime<Utc>,
    collections: BTreeMap<String, Collection>,
}

impl Database {
    pub fn new() -> Self {
        Self {
            collections: BTreeMap::new(),
            observer: None,
            max_hook_depth: DEFAULT_MAX_HOOK_DEPTH,
        }
    }

    pub fn with_max_hook_depth(mut self, max_hook_depth: u32) -> Self {
        self.max_hook_depth = max_hook_depth;
        self
    }

    pub fn max_hook_depth(&self) -> u32 {
        self.max_hook_depth
    }

    /// Install the observer that receives mutation hooks for every
    /// transaction begun afterwards.
    pub fn set_observer(&mut self, observer: Arc<dyn MutationObserver>) {
        self.observer = Some(observer);
    }

    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    pub fn begin(&mut self) -> Transaction<'_> {
        Transaction::new(self, Utc::now())
    }

    /// Begin a transaction with a fixed timestamp.
    pub fn begin_at(&mut self, timestamp: DateTime<Utc>) -> Transaction<'_> {
        Transaction::new(self, timestamp)
    }

    /// Run `f` in a fresh transaction: commit on `Ok`, roll back on `Err`.
    pub fn execute<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut tx = self.begin();
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    /// Committed rows of `name`, in insertion order.
    pub fn rows(&self, name: &str) -> StorageResult<Vec<Record>> {
        self.collections
            .get(name)
            .map(|c| c.rows().cloned().collect())
            .ok_or_else(|| StorageError::CollectionNotFound(name.to_string()))
    }

    // ── Snapshots ───────────────────────────────────────────────

    /// Atomically write committed state as JSON.
    ///
    /// Writes to a `.tmp` sibling first, then renames over `path`.
    pub fn save_snapshot(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let snapshot = SnapshotRef {
            saved_at: Utc::now(),
            collections: &self.collections,
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, path)?;

        info!(path = %path.display(), collections = self.collections.len(), "snapshot saved");
        Ok(())
    }

    /// Load a snapshot, or start empty when `path` does not exist.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut db = Self::new();
        if !path.exists() {
            info!(path = %path.display(), "no snapshot found, starting empty");
            return Ok(db);
        }
        let content = fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        db.collections = snapshot.collections;
        info!(path = %path.display(), collections = db.collections.len(), "snapshot loaded");
        Ok(db)
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
