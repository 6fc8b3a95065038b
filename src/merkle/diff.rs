//! Key/value diff between two roots of a tree

use crate::model::{Hash, Node, TerminalNode, TreeId};
use crate::store::State;
use crate::{DataStore, Error, Result};
use std::collections::{BTreeMap, HashSet};

/// Type of change in a diff
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffEntry {
    /// Key was added
    Added(TerminalNode),
    /// Key was removed
    Removed(TerminalNode),
    /// Key kept but its value changed
    Modified {
        old: TerminalNode,
        new: TerminalNode,
    },
}

impl DiffEntry {
    pub fn key(&self) -> &[u8] {
        match self {
            DiffEntry::Added(node) => &node.key,
            DiffEntry::Removed(node) => &node.key,
            DiffEntry::Modified { new, .. } => &new.key,
        }
    }
}

/// A diff between two tree states, sorted by key
#[derive(Clone, Debug, Default)]
pub struct Diff {
    pub entries: Vec<DiffEntry>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn added_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Added(_)))
            .count()
    }

    pub fn removed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Removed(_)))
            .count()
    }

    pub fn modified_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Modified { .. }))
            .count()
    }
}

impl DataStore {
    /// Compare two roots of `tree_id`; `None` is the empty tree.
    ///
    /// Subtrees present under both roots are skipped without being walked.
    pub fn get_kv_diff(
        &self,
        tree_id: &TreeId,
        from: Option<Hash>,
        to: Option<Hash>,
    ) -> Result<Diff> {
        self.ensure_serving(tree_id)?;
        for hash in [from, to].into_iter().flatten() {
            if self.get_last_tree_root_by_hash(tree_id, Some(hash))?.is_none() {
                return Err(Error::NotFound(format!("root {} of tree {}", hash, tree_id)));
            }
        }
        if from == to {
            return Ok(Diff::default());
        }

        let state = self.storage.read();
        let from_nodes = subtree_hashes(&state, from)?;
        let to_nodes = subtree_hashes(&state, to)?;

        let mut removed: BTreeMap<Vec<u8>, TerminalNode> = unique_terminals(&state, from, &to_nodes)?
            .into_iter()
            .map(|t| (t.key.clone(), t))
            .collect();
        let mut entries = Vec::new();
        for added in unique_terminals(&state, to, &from_nodes)? {
            match removed.remove(&added.key) {
                Some(old) => entries.push(DiffEntry::Modified { old, new: added }),
                None => entries.push(DiffEntry::Added(added)),
            }
        }
        entries.extend(removed.into_values().map(DiffEntry::Removed));

        // Sort entries for determinism
        entries.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(Diff { entries })
    }
}

fn subtree_hashes(state: &State, root: Option<Hash>) -> Result<HashSet<Hash>> {
    let mut seen = HashSet::new();
    let mut stack: Vec<Hash> = root.into_iter().collect();
    while let Some(hash) = stack.pop() {
        if let Node::Internal(node) = state.node(&hash)? {
            stack.push(node.left);
            stack.push(node.right);
        }
        seen.insert(hash);
    }
    Ok(seen)
}

/// Terminals under `root` that do not sit in a subtree shared with `other`
fn unique_terminals(
    state: &State,
    root: Option<Hash>,
    other: &HashSet<Hash>,
) -> Result<Vec<TerminalNode>> {
    let mut found = Vec::new();
    let mut stack: Vec<Hash> = root.into_iter().collect();
    while let Some(hash) = stack.pop() {
        if other.contains(&hash) {
            continue;
        }
        match state.node(&hash)? {
            Node::Terminal(node) => found.push(node.clone()),
            Node::Internal(node) => {
                stack.push(node.right);
                stack.push(node.left);
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Side;

    fn tree_id() -> TreeId {
        TreeId::from_bytes([8; 32])
    }

    fn root(store: &DataStore) -> Option<Hash> {
        store.get_latest_root(&tree_id()).unwrap().node_hash
    }

    #[test]
    fn test_diff_empty_to_non_empty() {
        let store = DataStore::in_memory();
        store.create_tree(&tree_id()).unwrap();
        let a = store.insert(&tree_id(), b"a", b"1", None, None).unwrap();
        store.insert(&tree_id(), b"b", b"2", Some(a), Some(Side::Right)).unwrap();

        let diff = store.get_kv_diff(&tree_id(), None, root(&store)).unwrap();
        assert_eq!(diff.added_count(), 2);
        assert_eq!(diff.removed_count(), 0);
        assert_eq!(diff.entries[0].key(), b"a");
    }

    #[test]
    fn test_diff_modification_and_removal() {
        let store = DataStore::in_memory();
        store.create_tree(&tree_id()).unwrap();
        let a = store.insert(&tree_id(), b"a", b"1", None, None).unwrap();
        let b = store.insert(&tree_id(), b"b", b"2", Some(a), Some(Side::Right)).unwrap();
        store.insert(&tree_id(), b"c", b"3", Some(b), Some(Side::Right)).unwrap();
        let before = root(&store);

        store.delete(&tree_id(), b"b").unwrap();
        store.delete(&tree_id(), b"a").unwrap();
        let c = store.get_node_by_key(&tree_id(), b"c").unwrap().hash;
        store.insert(&tree_id(), b"a", b"changed", Some(c), Some(Side::Left)).unwrap();

        let diff = store.get_kv_diff(&tree_id(), before, root(&store)).unwrap();
        assert_eq!(diff.modified_count(), 1);
        assert_eq!(diff.removed_count(), 1);
        assert_eq!(diff.added_count(), 0);
        assert_eq!(diff.entries[1], DiffEntry::Removed(TerminalNode::new(b"b".to_vec(), b"2".to_vec())));
    }

    #[test]
    fn test_diff_same_root() {
        let store = DataStore::in_memory();
        store.create_tree(&tree_id()).unwrap();
        store.insert(&tree_id(), b"a", b"1", None, None).unwrap();
        let r = root(&store);
        assert!(store.get_kv_diff(&tree_id(), r, r).unwrap().is_empty());
    }

    #[test]
    fn test_diff_rejects_foreign_root() {
        let store = DataStore::in_memory();
        store.create_tree(&tree_id()).unwrap();
        assert!(store
            .get_kv_diff(&tree_id(), None, Some(Hash::digest(b"elsewhere")))
            .is_err());
    }
}
