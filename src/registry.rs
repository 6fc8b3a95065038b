//! Root registry: the generation history of every tree

use crate::model::{Hash, Root, Status, TreeId};
use crate::{DataStore, Error, Result};
use tracing::{debug, info};

impl DataStore {
    /// Whether `tree_id` has been created
    pub fn tree_exists(&self, tree_id: &TreeId) -> bool {
        self.storage.read().trees.contains_key(tree_id)
    }

    /// All known trees, in id order
    pub fn get_tree_ids(&self) -> Vec<TreeId> {
        self.storage.read().trees.keys().copied().collect()
    }

    /// Latest generation number of `tree_id`
    pub fn get_tree_generation(&self, tree_id: &TreeId) -> Result<u64> {
        Ok(self.get_latest_root(tree_id)?.generation)
    }

    pub fn get_root(&self, tree_id: &TreeId, generation: u64) -> Result<Root> {
        self.ensure_serving(tree_id)?;
        let state = self.storage.read();
        state
            .tree(tree_id)?
            .roots
            .get(generation as usize)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("generation {} of tree {}", generation, tree_id)))
    }

    pub fn get_latest_root(&self, tree_id: &TreeId) -> Result<Root> {
        self.ensure_serving(tree_id)?;
        let state = self.storage.read();
        Ok(state.tree(tree_id)?.latest().clone())
    }

    /// Roots with `from <= generation < to`
    pub fn get_roots_between(&self, tree_id: &TreeId, from: u64, to: u64) -> Result<Vec<Root>> {
        self.ensure_serving(tree_id)?;
        let state = self.storage.read();
        let roots = &state.tree(tree_id)?.roots;
        let end = (to as usize).min(roots.len());
        let start = (from as usize).min(end);
        Ok(roots[start..end].to_vec())
    }

    /// The most recent generation whose root is `node_hash`, if any
    pub fn get_last_tree_root_by_hash(
        &self,
        tree_id: &TreeId,
        node_hash: Option<Hash>,
    ) -> Result<Option<Root>> {
        self.ensure_serving(tree_id)?;
        let state = self.storage.read();
        Ok(state
            .tree(tree_id)?
            .roots
            .iter()
            .rev()
            .find(|root| root.node_hash == node_hash)
            .cloned())
    }

    /// Mark `generation` as confirmed.
    ///
    /// Committing a generation that is already committed is a no-op.
    pub fn commit(&self, tree_id: &TreeId, generation: u64) -> Result<()> {
        self.ensure_serving(tree_id)?;
        let lock = self.writer_lock(tree_id)?;
        let _guard = lock.lock();

        let root = self.get_root(tree_id, generation)?;
        if root.status == Status::Committed {
            debug!(tree_id = %tree_id, generation, "Generation already committed");
            return Ok(());
        }

        let mut tx = self.storage.begin();
        tx.set_status(*tree_id, generation, Status::Committed);
        tx.commit()?;

        info!(tree_id = %tree_id, generation, "Committed generation");
        Ok(())
    }
}
