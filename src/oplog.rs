//! Operation log: the per-generation diffs of every tree

use crate::model::{Hash, Operation, TreeId};
use crate::{DataStore, Error, Result};
use tracing::debug;

impl DataStore {
    /// Operations producing generations `from + 1 ..= max`, in order.
    ///
    /// Each operation carries the current status of the generation it
    /// produced. `from == max` yields nothing.
    pub fn get_operations(&self, tree_id: &TreeId, from: u64, max: u64) -> Result<Vec<Operation>> {
        self.ensure_serving(tree_id)?;
        let state = self.storage.read();
        let tree = state.tree(tree_id)?;
        let latest = tree.latest().generation;
        if from > max || max > latest {
            return Err(Error::InvalidRange {
                from,
                to: max,
                latest,
            });
        }

        Ok(tree.operations[from as usize..max as usize]
            .iter()
            .zip(&tree.roots[from as usize + 1..=max as usize])
            .map(|(operation, root)| operation.clone().with_root_status(root.status))
            .collect())
    }

    /// Replay `operations` onto `tree_id` through `insert` and `delete`.
    ///
    /// Each step only commits if its new root equals the hash the operation
    /// recorded; on a mismatch replay stops with an integrity error and the
    /// tree keeps the last verified generation. Returns the final root hash.
    pub fn apply_operations(&self, tree_id: &TreeId, operations: &[Operation]) -> Result<Option<Hash>> {
        let mut root_hash = self.get_latest_root(tree_id)?.node_hash;
        for operation in operations {
            let expected = Some(operation.root_hash());
            match operation {
                Operation::Insertion(data) => {
                    self.insert_expecting(
                        tree_id,
                        &data.key,
                        &data.value,
                        data.reference_node_hash,
                        data.side,
                        expected,
                    )?;
                }
                Operation::Deletion(data) => self.delete_expecting(tree_id, &data.key, expected)?,
            }
            root_hash = operation.root_hash();
            debug!(tree_id = %tree_id, root = ?root_hash, "Replayed operation");
        }
        Ok(root_hash)
    }
}
