//! Whole-store integrity audit

use crate::model::{Hash, Node, TreeId};
use crate::store::{State, TreeState};
use crate::{DataStore, Error, Result};
use std::collections::HashSet;
use tracing::{info, warn};

impl DataStore {
    /// Recompute every stored hash and verify every root.
    ///
    /// Checks, in order, each tree's roots (including every node reachable
    /// from them), that tree's operation log and key index, and finally any
    /// stored node no root reaches. The first mismatch is returned; a tree it
    /// is attributed to is quarantined.
    pub fn check(&self) -> Result<()> {
        let result = {
            let state = self.storage.read();
            audit(&state)
        };

        match result {
            Ok(nodes) => {
                info!(nodes, "Integrity check passed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Integrity check failed");
                if let Error::Integrity {
                    tree_id: Some(tree_id),
                    ..
                } = &e
                {
                    self.quarantine(*tree_id);
                }
                Err(e)
            }
        }
    }
}

/// Returns the number of nodes verified
fn audit(state: &State) -> Result<usize> {
    let mut verified: HashSet<Hash> = HashSet::new();

    for (tree_id, tree) in &state.trees {
        for (position, root) in tree.roots.iter().enumerate() {
            if root.generation != position as u64 {
                return Err(integrity(
                    tree_id,
                    format!("generation {} stored at position {}", root.generation, position),
                ));
            }
            if let Some(root_hash) = root.node_hash {
                verify_subtree(state, tree_id, root_hash, &mut verified)?;
            }
        }
        check_operations(tree_id, tree)?;
        check_index(state, tree_id, tree)?;
    }

    for (hash, node) in &state.nodes {
        if !verified.contains(hash) && (node.hash() != *hash || node.compute_hash() != *hash) {
            return Err(Error::Integrity {
                tree_id: None,
                detail: format!("unreferenced node stored as {} hashes to {}", hash, node.compute_hash()),
            });
        }
    }

    Ok(state.nodes.len())
}

fn verify_subtree(
    state: &State,
    tree_id: &TreeId,
    start: Hash,
    verified: &mut HashSet<Hash>,
) -> Result<()> {
    let mut stack = vec![start];
    while let Some(hash) = stack.pop() {
        if verified.contains(&hash) {
            continue;
        }
        let node = state
            .nodes
            .get(&hash)
            .ok_or_else(|| integrity(tree_id, format!("node {} is referenced but missing", hash)))?;
        let computed = node.compute_hash();
        if node.hash() != hash || computed != hash {
            return Err(integrity(
                tree_id,
                format!("node stored as {} hashes to {}", hash, computed),
            ));
        }
        if let Node::Internal(internal) = node {
            stack.push(internal.right);
            stack.push(internal.left);
        }
        verified.insert(hash);
    }
    Ok(())
}

fn check_operations(tree_id: &TreeId, tree: &TreeState) -> Result<()> {
    if tree.operations.len() + 1 != tree.roots.len() {
        return Err(integrity(
            tree_id,
            format!(
                "{} operations logged for {} generations",
                tree.operations.len(),
                tree.roots.len()
            ),
        ));
    }
    for (i, operation) in tree.operations.iter().enumerate() {
        let root = &tree.roots[i + 1];
        if operation.root_hash() != root.node_hash {
            return Err(integrity(
                tree_id,
                format!("operation for generation {} disagrees with its root", root.generation),
            ));
        }
    }
    Ok(())
}

fn check_index(state: &State, tree_id: &TreeId, tree: &TreeState) -> Result<()> {
    let mut terminals = 0usize;
    if let Some(root_hash) = tree.latest().node_hash {
        let mut stack = vec![root_hash];
        while let Some(hash) = stack.pop() {
            match state.node(&hash)? {
                Node::Terminal(node) => {
                    terminals += 1;
                    if tree.index.keys.get(&node.key) != Some(&node.hash) {
                        return Err(integrity(
                            tree_id,
                            format!("key {} missing from the index", hex::encode(&node.key)),
                        ));
                    }
                }
                Node::Internal(node) => {
                    stack.push(node.right);
                    stack.push(node.left);
                }
            }
        }
    }
    if terminals != tree.index.keys.len() {
        return Err(integrity(
            tree_id,
            format!(
                "index holds {} keys but the latest root has {}",
                tree.index.keys.len(),
                terminals
            ),
        ));
    }
    Ok(())
}

fn integrity(tree_id: &TreeId, detail: String) -> Error {
    Error::Integrity {
        tree_id: Some(*tree_id),
        detail: format!("tree {}: {}", tree_id, detail),
    }
}
