//! High-level DataStore API
//!
//! This module provides the main entry point for interacting with arbor_db.
//! The tree engine (`merkle`), the root registry (`registry`) and the
//! operation log (`oplog`) each add their operations to [`DataStore`].

use crate::model::TreeId;
use crate::store::Storage;
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::error;

/// The main database interface
///
/// Writes to one tree are serialized by a per-tree lock; writes to different
/// trees only contend on the final append to the log. Reads never block on
/// the per-tree locks.
pub struct DataStore {
    pub(crate) storage: Storage,
    /// One writer lock per tree
    writers: Mutex<HashMap<TreeId, Arc<Mutex<()>>>>,
    /// Trees that failed an integrity audit
    quarantined: RwLock<HashSet<TreeId>>,
}

impl DataStore {
    /// Wrap an opened storage backend
    pub fn new(storage: Storage) -> Self {
        DataStore {
            storage,
            writers: Mutex::new(HashMap::new()),
            quarantined: RwLock::new(HashSet::new()),
        }
    }

    /// Create a new database at the given path
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Storage::create(path)?))
    }

    /// Open an existing database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Storage::open(path)?))
    }

    /// Open or create a database
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Storage::open_or_create(path)?))
    }

    /// A database that is never written to disk
    pub fn in_memory() -> Self {
        Self::new(Storage::in_memory())
    }

    /// The underlying storage backend
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Whether `tree_id` has been taken out of service by `check`
    pub fn is_quarantined(&self, tree_id: &TreeId) -> bool {
        self.quarantined.read().contains(tree_id)
    }

    pub(crate) fn ensure_serving(&self, tree_id: &TreeId) -> Result<()> {
        if self.is_quarantined(tree_id) {
            return Err(Error::Quarantined(*tree_id));
        }
        Ok(())
    }

    pub(crate) fn quarantine(&self, tree_id: TreeId) {
        error!(tree_id = %tree_id, "Tree quarantined; serving halted pending manual recovery");
        self.quarantined.write().insert(tree_id);
    }

    /// Writer lock of an existing tree; unknown trees get no entry
    pub(crate) fn writer_lock(&self, tree_id: &TreeId) -> Result<Arc<Mutex<()>>> {
        if !self.tree_exists(tree_id) {
            return Err(Error::NotFound(format!("tree {}", tree_id)));
        }
        Ok(self.creation_lock(tree_id))
    }

    /// Writer lock for a tree that may be about to be created
    pub(crate) fn creation_lock(&self, tree_id: &TreeId) -> Arc<Mutex<()>> {
        self.writers.lock().entry(*tree_id).or_default().clone()
    }
}
