//! In-memory view of everything the record log has committed

use crate::model::{Hash, Node, Operation, Root, Status, TreeId};
use crate::store::Record;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// Lookup tables for the latest generation of one tree
#[derive(Debug, Default)]
pub(crate) struct TreeIndex {
    /// key -> terminal node hash
    pub keys: HashMap<Vec<u8>, Hash>,
    /// child hash -> parent hash
    ///
    /// Entries for nodes that have left the tree are not removed; a lookup is
    /// only trusted after walking it up to the current root.
    pub parents: HashMap<Hash, Hash>,
}

/// Index changes produced by one write
#[derive(Debug, Default)]
pub(crate) struct IndexUpdate {
    pub parents: Vec<(Hash, Hash)>,
    pub insert_key: Option<(Vec<u8>, Hash)>,
    pub remove_key: Option<Vec<u8>>,
}

impl IndexUpdate {
    /// Record both children of every freshly built internal node
    pub fn adopt(&mut self, parent: Hash, left: Hash, right: Hash) {
        self.parents.push((left, parent));
        self.parents.push((right, parent));
    }
}

/// History of one tree
#[derive(Debug)]
pub(crate) struct TreeState {
    pub roots: Vec<Root>,
    /// `operations[i]` produced generation `i + 1`
    pub operations: Vec<Operation>,
    pub index: TreeIndex,
}

impl TreeState {
    pub fn latest(&self) -> &Root {
        // A tree is only ever created together with its generation 0
        &self.roots[self.roots.len() - 1]
    }
}

#[derive(Debug, Default)]
pub(crate) struct State {
    pub nodes: HashMap<Hash, Node>,
    pub trees: BTreeMap<TreeId, TreeState>,
}

impl State {
    pub fn tree(&self, tree_id: &TreeId) -> Result<&TreeState> {
        self.trees
            .get(tree_id)
            .ok_or_else(|| Error::NotFound(format!("tree {}", tree_id)))
    }

    pub fn node(&self, hash: &Hash) -> Result<&Node> {
        self.nodes
            .get(hash)
            .ok_or_else(|| Error::NotFound(format!("node {}", hash)))
    }

    /// Reject a batch that would break generation contiguity
    pub fn validate(&self, records: &[Record]) -> Result<()> {
        // tree -> (roots, operations) as the batch would leave them
        let mut counts: HashMap<TreeId, (u64, u64)> = HashMap::new();
        for record in records {
            match record {
                Record::Node(_) => {}
                Record::Root(root) => {
                    let entry = counts
                        .entry(root.tree_id)
                        .or_insert_with(|| self.counts(&root.tree_id));
                    if root.generation != entry.0 {
                        return Err(Error::InvalidArgument(format!(
                            "tree {} expects generation {}, got {}",
                            root.tree_id, entry.0, root.generation
                        )));
                    }
                    entry.0 += 1;
                }
                Record::Operation {
                    tree_id,
                    generation,
                    ..
                } => {
                    let entry = counts
                        .entry(*tree_id)
                        .or_insert_with(|| self.counts(tree_id));
                    if *generation != entry.1 + 1 || *generation >= entry.0 {
                        return Err(Error::InvalidArgument(format!(
                            "tree {} cannot log an operation for generation {}",
                            tree_id, generation
                        )));
                    }
                    entry.1 += 1;
                }
                Record::Status {
                    tree_id,
                    generation,
                    ..
                } => {
                    let entry = counts
                        .entry(*tree_id)
                        .or_insert_with(|| self.counts(tree_id));
                    if *generation >= entry.0 {
                        return Err(Error::NotFound(format!(
                            "generation {} of tree {}",
                            generation, tree_id
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn counts(&self, tree_id: &TreeId) -> (u64, u64) {
        match self.trees.get(tree_id) {
            Some(tree) => (tree.roots.len() as u64, tree.operations.len() as u64),
            None => (0, 0),
        }
    }

    /// Apply one committed record
    pub fn apply(&mut self, record: Record) -> Result<()> {
        match record {
            Record::Node(node) => {
                self.nodes.entry(node.hash()).or_insert(node);
            }
            Record::Root(root) => match self.trees.get_mut(&root.tree_id) {
                Some(tree) => {
                    if root.generation != tree.roots.len() as u64 {
                        return Err(Error::Corruption(format!(
                            "non-contiguous generation {} for tree {}",
                            root.generation, root.tree_id
                        )));
                    }
                    tree.roots.push(root);
                }
                None => {
                    if root.generation != 0 {
                        return Err(Error::Corruption(format!(
                            "tree {} starts at generation {}",
                            root.tree_id, root.generation
                        )));
                    }
                    self.trees.insert(
                        root.tree_id,
                        TreeState {
                            roots: vec![root],
                            operations: Vec::new(),
                            index: TreeIndex::default(),
                        },
                    );
                }
            },
            Record::Operation {
                tree_id,
                generation,
                operation,
            } => {
                let tree = self
                    .trees
                    .get_mut(&tree_id)
                    .ok_or_else(|| Error::Corruption(format!("operation for unknown tree {}", tree_id)))?;
                if generation != tree.operations.len() as u64 + 1 {
                    return Err(Error::Corruption(format!(
                        "operation for generation {} out of order in tree {}",
                        generation, tree_id
                    )));
                }
                tree.operations.push(operation);
            }
            Record::Status {
                tree_id,
                generation,
                status,
            } => {
                let root = self
                    .trees
                    .get_mut(&tree_id)
                    .and_then(|tree| tree.roots.get_mut(generation as usize))
                    .ok_or_else(|| {
                        Error::Corruption(format!(
                            "status for unknown generation {} of tree {}",
                            generation, tree_id
                        ))
                    })?;
                if root.status == Status::Pending {
                    root.status = status;
                }
            }
        }
        Ok(())
    }

    pub fn apply_index(&mut self, tree_id: &TreeId, update: IndexUpdate) {
        if let Some(tree) = self.trees.get_mut(tree_id) {
            let index = &mut tree.index;
            for (child, parent) in update.parents {
                index.parents.insert(child, parent);
            }
            if let Some(key) = update.remove_key {
                index.keys.remove(&key);
            }
            if let Some((key, hash)) = update.insert_key {
                index.keys.insert(key, hash);
            }
        }
    }

    /// Rebuild every tree's index from its latest root
    pub fn rebuild_indexes(&mut self) -> Result<()> {
        let tree_ids: Vec<TreeId> = self.trees.keys().copied().collect();
        for tree_id in tree_ids {
            let mut index = TreeIndex::default();
            if let Some(root_hash) = self.tree(&tree_id)?.latest().node_hash {
                let mut stack = vec![root_hash];
                while let Some(hash) = stack.pop() {
                    match self.node(&hash)? {
                        Node::Terminal(node) => {
                            index.keys.insert(node.key.clone(), node.hash);
                        }
                        Node::Internal(node) => {
                            index.parents.insert(node.left, node.hash);
                            index.parents.insert(node.right, node.hash);
                            stack.push(node.right);
                            stack.push(node.left);
                        }
                    }
                }
            }
            if let Some(tree) = self.trees.get_mut(&tree_id) {
                tree.index = index;
            }
        }
        Ok(())
    }

    /// Ancestors of `target` in the latest root of `tree`, parent first.
    ///
    /// Returns `None` when `target` is not part of that root.
    pub fn path_to_root(&self, tree: &TreeState, target: &Hash) -> Option<Vec<Hash>> {
        let root_hash = tree.latest().node_hash?;
        let mut path = Vec::new();
        let mut current = *target;
        while current != root_hash {
            let parent = *tree.index.parents.get(&current)?;
            let is_child = self
                .nodes
                .get(&parent)
                .and_then(Node::as_internal)
                .map(|node| node.left == current || node.right == current)
                .unwrap_or(false);
            if !is_child || path.len() > self.nodes.len() {
                return None;
            }
            path.push(parent);
            current = parent;
        }
        Some(path)
    }
}
