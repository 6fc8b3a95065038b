//! Binary Merkle tree engine
//!
//! Every write rewrites only the path from the touched leaf up to the root.
//! Unchanged subtrees keep their hashes and are shared with every earlier
//! generation that contains them.

mod check;
mod diff;
mod traversal;

pub use diff::{Diff, DiffEntry};
pub use traversal::LeftToRight;

use crate::model::{
    DeletionData, Hash, InsertionData, InternalNode, Node, Operation, Side, TerminalNode, TreeId,
};
use crate::store::{IndexUpdate, Transaction};
use crate::{DataStore, Error, Result};
use tracing::{debug, info};

impl DataStore {
    /// Create `tree_id` with an empty generation 0
    pub fn create_tree(&self, tree_id: &TreeId) -> Result<()> {
        let lock = self.creation_lock(tree_id);
        let _guard = lock.lock();

        if self.tree_exists(tree_id) {
            return Err(Error::TreeExists(*tree_id));
        }

        let mut tx = self.storage.begin();
        tx.append_root(crate::model::Root::empty(*tree_id));
        tx.commit()?;

        info!(tree_id = %tree_id, "Created tree");
        Ok(())
    }

    /// Insert `key`/`value` beside `reference_node_hash` on `side`.
    ///
    /// The reference must be omitted for an empty tree and given otherwise.
    /// Returns the hash of the new terminal node.
    pub fn insert(
        &self,
        tree_id: &TreeId,
        key: &[u8],
        value: &[u8],
        reference_node_hash: Option<Hash>,
        side: Option<Side>,
    ) -> Result<Hash> {
        self.insert_expecting(tree_id, key, value, reference_node_hash, side, None)
    }

    /// `insert` that only commits if the new root is `expected`
    pub(crate) fn insert_expecting(
        &self,
        tree_id: &TreeId,
        key: &[u8],
        value: &[u8],
        reference_node_hash: Option<Hash>,
        side: Option<Side>,
        expected: Option<Option<Hash>>,
    ) -> Result<Hash> {
        self.ensure_serving(tree_id)?;
        let lock = self.writer_lock(tree_id)?;
        let _guard = lock.lock();

        let (latest, path) = {
            let state = self.storage.read();
            let tree = state.tree(tree_id)?;
            if tree.index.keys.contains_key(key) {
                return Err(Error::DuplicateKey(hex::encode(key)));
            }
            let latest = tree.latest().clone();
            let path = match (latest.node_hash, reference_node_hash) {
                (None, None) => None,
                (None, Some(reference)) => {
                    return Err(Error::NotFound(format!(
                        "reference node {} (tree {} is empty)",
                        reference, tree_id
                    )));
                }
                (Some(_), None) => {
                    return Err(Error::InvalidArgument(
                        "a reference node is required to insert into a non-empty tree".into(),
                    ));
                }
                (Some(_), Some(reference)) => {
                    if side.is_none() {
                        return Err(Error::InvalidArgument(
                            "a side is required alongside the reference node".into(),
                        ));
                    }
                    let path = state.path_to_root(tree, &reference).ok_or_else(|| {
                        Error::NotFound(format!(
                            "reference node {} in the current root of tree {}",
                            reference, tree_id
                        ))
                    })?;
                    Some((reference, path))
                }
            };
            (latest, path)
        };

        let mut tx = self.storage.begin();
        let mut update = IndexUpdate::default();

        let terminal_hash = tx.put_node(TerminalNode::new(key.to_vec(), value.to_vec()).into());
        update.insert_key = Some((key.to_vec(), terminal_hash));

        let (root_hash, reference_node_hash, side) = match (path, side) {
            (Some((reference, path)), Some(side)) => {
                let joined = InternalNode::attach(reference, terminal_hash, side);
                update.adopt(joined.hash, joined.left, joined.right);
                let joined_hash = tx.put_node(joined.into());
                let root_hash = rewrite_path(&mut tx, &mut update, &path, reference, joined_hash)?;
                (root_hash, Some(reference), Some(side))
            }
            _ => (terminal_hash, None, None),
        };

        let root = latest.next(Some(root_hash));
        let generation = root.generation;
        tx.append_root(root);
        tx.append_operation(
            *tree_id,
            generation,
            Operation::Insertion(InsertionData {
                hash: root_hash,
                key: key.to_vec(),
                value: value.to_vec(),
                reference_node_hash,
                side,
                root_status: crate::model::Status::Pending,
            }),
        );
        tx.update_index(*tree_id, update);
        if let Some(expected) = expected {
            ensure_root(tree_id, generation, Some(root_hash), expected)?;
        }
        tx.commit()?;

        debug!(tree_id = %tree_id, generation, root = %root_hash, "Inserted key");
        Ok(terminal_hash)
    }

    /// Remove `key`, promoting its sibling into the parent's place
    pub fn delete(&self, tree_id: &TreeId, key: &[u8]) -> Result<()> {
        self.delete_expecting(tree_id, key, None)
    }

    /// `delete` that only commits if the new root is `expected`
    pub(crate) fn delete_expecting(
        &self,
        tree_id: &TreeId,
        key: &[u8],
        expected: Option<Option<Hash>>,
    ) -> Result<()> {
        self.ensure_serving(tree_id)?;
        let lock = self.writer_lock(tree_id)?;
        let _guard = lock.lock();

        let (latest, terminal_hash, path) = {
            let state = self.storage.read();
            let tree = state.tree(tree_id)?;
            let terminal_hash = *tree
                .index
                .keys
                .get(key)
                .ok_or_else(|| Error::NotFound(format!("key {} in tree {}", hex::encode(key), tree_id)))?;
            let path = state.path_to_root(tree, &terminal_hash).ok_or_else(|| {
                Error::Corruption(format!(
                    "index of tree {} points at node {} outside the current root",
                    tree_id, terminal_hash
                ))
            })?;
            (tree.latest().clone(), terminal_hash, path)
        };

        let mut tx = self.storage.begin();
        let mut update = IndexUpdate {
            remove_key: Some(key.to_vec()),
            ..Default::default()
        };

        let root_hash = match path.split_first() {
            None => None,
            Some((parent, ancestors)) => {
                let sibling = tx
                    .get_node(parent)?
                    .as_internal()
                    .and_then(|node| node.other_child(&terminal_hash))
                    .ok_or_else(|| Error::Corruption(format!("node {} is not the parent of {}", parent, terminal_hash)))?;
                Some(rewrite_path(&mut tx, &mut update, ancestors, *parent, sibling)?)
            }
        };

        let root = latest.next(root_hash);
        let generation = root.generation;
        tx.append_root(root);
        tx.append_operation(
            *tree_id,
            generation,
            Operation::Deletion(DeletionData {
                hash: root_hash,
                key: key.to_vec(),
                root_status: crate::model::Status::Pending,
            }),
        );
        tx.update_index(*tree_id, update);
        if let Some(expected) = expected {
            ensure_root(tree_id, generation, root_hash, expected)?;
        }
        tx.commit()?;

        debug!(tree_id = %tree_id, generation, root = ?root_hash, "Deleted key");
        Ok(())
    }

    /// Look up any stored node
    pub fn get_node(&self, hash: &Hash) -> Result<Node> {
        self.storage.read().node(hash).cloned()
    }

    /// Terminal node holding `key` in the latest generation
    pub fn get_node_by_key(&self, tree_id: &TreeId, key: &[u8]) -> Result<TerminalNode> {
        self.ensure_serving(tree_id)?;
        let state = self.storage.read();
        let tree = state.tree(tree_id)?;
        let hash = tree
            .index
            .keys
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("key {} in tree {}", hex::encode(key), tree_id)))?;
        state
            .node(hash)?
            .as_terminal()
            .cloned()
            .ok_or_else(|| Error::Corruption(format!("key index points at internal node {}", hash)))
    }

    /// Internal nodes from the parent of `node_hash` up to the latest root
    pub fn get_ancestors(&self, tree_id: &TreeId, node_hash: &Hash) -> Result<Vec<InternalNode>> {
        self.ensure_serving(tree_id)?;
        let state = self.storage.read();
        let tree = state.tree(tree_id)?;
        let path = state.path_to_root(tree, node_hash).ok_or_else(|| {
            Error::NotFound(format!("node {} in the current root of tree {}", node_hash, tree_id))
        })?;
        path.iter()
            .map(|hash| {
                state
                    .node(hash)?
                    .as_internal()
                    .cloned()
                    .ok_or_else(|| Error::Corruption(format!("ancestor {} is a terminal node", hash)))
            })
            .collect()
    }

    /// Lazily walk the subtree under `node_hash`, left before right
    pub fn left_to_right_traversal(&self, node_hash: Hash) -> LeftToRight<'_> {
        LeftToRight::new(&self.storage, node_hash)
    }

    /// Terminal nodes of one root in left-to-right order.
    ///
    /// `root_hash` must be a root the tree has had; `None` means the latest.
    pub fn get_keys_values(
        &self,
        tree_id: &TreeId,
        root_hash: Option<Hash>,
    ) -> Result<Vec<TerminalNode>> {
        let root_hash = match root_hash {
            Some(hash) => {
                self.get_last_tree_root_by_hash(tree_id, Some(hash))?
                    .ok_or_else(|| Error::NotFound(format!("root {} of tree {}", hash, tree_id)))?;
                Some(hash)
            }
            None => self.get_latest_root(tree_id)?.node_hash,
        };

        let Some(root_hash) = root_hash else {
            return Ok(Vec::new());
        };

        let mut terminals = Vec::new();
        for node in self.left_to_right_traversal(root_hash) {
            if let Node::Terminal(terminal) = node? {
                terminals.push(terminal);
            }
        }
        Ok(terminals)
    }
}

fn ensure_root(
    tree_id: &TreeId,
    generation: u64,
    actual: Option<Hash>,
    expected: Option<Hash>,
) -> Result<()> {
    if actual == expected {
        return Ok(());
    }
    let show = |hash: Option<Hash>| hash.map_or_else(|| "None".to_string(), |h| h.to_hex());
    Err(Error::Integrity {
        tree_id: Some(*tree_id),
        detail: format!(
            "replaying generation {} produced root {} instead of {}",
            generation,
            show(actual),
            show(expected)
        ),
    })
}

/// Replace `old_child` by `new_child` under each ancestor in `path`, bottom up.
/// Returns the new root hash.
fn rewrite_path(
    tx: &mut Transaction<'_>,
    update: &mut IndexUpdate,
    path: &[Hash],
    old_child: Hash,
    new_child: Hash,
) -> Result<Hash> {
    let mut old = old_child;
    let mut new = new_child;
    for ancestor in path {
        let rewritten = tx
            .get_node(ancestor)?
            .as_internal()
            .and_then(|node| node.replace_child(&old, new))
            .ok_or_else(|| Error::Corruption(format!("node {} is not the parent of {}", ancestor, old)))?;
        update.adopt(rewritten.hash, rewritten.left, rewritten.right);
        old = *ancestor;
        new = tx.put_node(rewritten.into());
    }
    Ok(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Status;

    fn tree_id() -> TreeId {
        TreeId::from_bytes([1; 32])
    }

    fn setup() -> DataStore {
        let store = DataStore::in_memory();
        store.create_tree(&tree_id()).unwrap();
        store
    }

    fn keys(store: &DataStore) -> Vec<Vec<u8>> {
        store
            .get_keys_values(&tree_id(), None)
            .unwrap()
            .into_iter()
            .map(|t| t.key)
            .collect()
    }

    #[test]
    fn test_create_tree_twice_fails() {
        let store = setup();
        assert!(matches!(
            store.create_tree(&tree_id()),
            Err(Error::TreeExists(_))
        ));
    }

    #[test]
    fn test_insert_into_empty_tree() {
        let store = setup();
        let hash = store.insert(&tree_id(), b"a", b"1", None, None).unwrap();

        let root = store.get_latest_root(&tree_id()).unwrap();
        assert_eq!(root.generation, 1);
        assert_eq!(root.node_hash, Some(hash));
        assert_eq!(root.status, Status::Pending);
        assert_eq!(hash, Hash::terminal(b"a", b"1"));
    }

    #[test]
    fn test_insert_sides() {
        let store = setup();
        let a = store.insert(&tree_id(), b"a", b"1", None, None).unwrap();
        store.insert(&tree_id(), b"b", b"2", Some(a), Some(Side::Right)).unwrap();
        store.insert(&tree_id(), b"z", b"0", Some(a), Some(Side::Left)).unwrap();

        assert_eq!(keys(&store), vec![b"z".to_vec(), b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_insert_errors() {
        let store = setup();
        let missing = Hash::digest(b"nowhere");
        assert!(matches!(
            store.insert(&tree_id(), b"a", b"1", Some(missing), Some(Side::Left)),
            Err(Error::NotFound(_))
        ));

        let a = store.insert(&tree_id(), b"a", b"1", None, None).unwrap();
        assert!(matches!(
            store.insert(&tree_id(), b"a", b"other", Some(a), Some(Side::Left)),
            Err(Error::DuplicateKey(_))
        ));
        assert!(matches!(
            store.insert(&tree_id(), b"b", b"2", None, None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            store.insert(&tree_id(), b"b", b"2", Some(a), None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            store.insert(&tree_id(), b"b", b"2", Some(missing), Some(Side::Right)),
            Err(Error::NotFound(_))
        ));

        // Failed writes leave no generation behind
        assert_eq!(store.get_tree_generation(&tree_id()).unwrap(), 1);
    }

    #[test]
    fn test_reference_must_be_in_current_root() {
        let store = setup();
        let a = store.insert(&tree_id(), b"a", b"1", None, None).unwrap();
        let b = store.insert(&tree_id(), b"b", b"2", Some(a), Some(Side::Right)).unwrap();
        store.delete(&tree_id(), b"b").unwrap();

        // `b` is still stored, but no longer part of the latest root
        assert!(store.get_node(&b).is_ok());
        assert!(matches!(
            store.insert(&tree_id(), b"c", b"3", Some(b), Some(Side::Right)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_insert_beside_internal_node() {
        let store = setup();
        let a = store.insert(&tree_id(), b"a", b"1", None, None).unwrap();
        store.insert(&tree_id(), b"b", b"2", Some(a), Some(Side::Right)).unwrap();
        let pair = store.get_latest_root(&tree_id()).unwrap().node_hash.unwrap();

        store.insert(&tree_id(), b"c", b"3", Some(pair), Some(Side::Right)).unwrap();
        assert_eq!(keys(&store), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        store.check().unwrap();
    }

    #[test]
    fn test_delete_promotes_sibling() {
        let store = setup();
        let a = store.insert(&tree_id(), b"a", b"1", None, None).unwrap();
        let b = store.insert(&tree_id(), b"b", b"2", Some(a), Some(Side::Right)).unwrap();
        let c = store.insert(&tree_id(), b"c", b"3", Some(b), Some(Side::Right)).unwrap();

        store.delete(&tree_id(), b"b").unwrap();
        let root = store.get_latest_root(&tree_id()).unwrap();
        assert_eq!(root.node_hash, Some(Hash::internal(&a, &c)));

        store.delete(&tree_id(), b"a").unwrap();
        assert_eq!(store.get_latest_root(&tree_id()).unwrap().node_hash, Some(c));

        store.delete(&tree_id(), b"c").unwrap();
        let root = store.get_latest_root(&tree_id()).unwrap();
        assert_eq!(root.node_hash, None);
        assert_eq!(root.generation, 6);
        store.check().unwrap();
    }

    #[test]
    fn test_delete_missing_key() {
        let store = setup();
        assert!(matches!(
            store.delete(&tree_id(), b"ghost"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_reinsert_after_delete_reuses_nodes() {
        let store = setup();
        let a = store.insert(&tree_id(), b"a", b"1", None, None).unwrap();
        store.insert(&tree_id(), b"b", b"2", Some(a), Some(Side::Right)).unwrap();
        let before = store.get_latest_root(&tree_id()).unwrap().node_hash;
        let nodes = store.storage().node_count();

        store.delete(&tree_id(), b"b").unwrap();
        store.insert(&tree_id(), b"b", b"2", Some(a), Some(Side::Right)).unwrap();

        assert_eq!(store.get_latest_root(&tree_id()).unwrap().node_hash, before);
        assert_eq!(store.storage().node_count(), nodes);
        // Index still tracks the re-added leaf
        assert_eq!(store.get_node_by_key(&tree_id(), b"b").unwrap().value, b"2");
    }

    #[test]
    fn test_get_ancestors() {
        let store = setup();
        let a = store.insert(&tree_id(), b"a", b"1", None, None).unwrap();
        let b = store.insert(&tree_id(), b"b", b"2", Some(a), Some(Side::Right)).unwrap();
        let c = store.insert(&tree_id(), b"c", b"3", Some(b), Some(Side::Right)).unwrap();

        let ancestors = store.get_ancestors(&tree_id(), &c).unwrap();
        assert_eq!(ancestors.len(), 2);
        assert_eq!(ancestors[0].hash, Hash::internal(&b, &c));
        assert_eq!(
            Some(ancestors[1].hash),
            store.get_latest_root(&tree_id()).unwrap().node_hash
        );
        assert!(store.get_ancestors(&tree_id(), &Hash::digest(b"x")).is_err());
    }

    #[test]
    fn test_traversal_is_restartable() {
        let store = setup();
        let a = store.insert(&tree_id(), b"a", b"1", None, None).unwrap();
        store.insert(&tree_id(), b"b", b"2", Some(a), Some(Side::Right)).unwrap();
        let root = store.get_latest_root(&tree_id()).unwrap().node_hash.unwrap();

        let mut walk = store.left_to_right_traversal(root);
        let first: Vec<Hash> = walk.by_ref().map(|n| n.unwrap().hash()).collect();
        assert_eq!(first.len(), 3);
        assert!(walk.next().is_none());

        walk.restart();
        let second: Vec<Hash> = walk.map(|n| n.unwrap().hash()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_traversal_of_unknown_hash_fails() {
        let store = setup();
        let mut walk = store.left_to_right_traversal(Hash::digest(b"missing"));
        assert!(matches!(walk.next(), Some(Err(Error::NotFound(_)))));
        assert!(walk.next().is_none());
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.arbor");
        let c;
        {
            let store = DataStore::create(&path).unwrap();
            store.create_tree(&tree_id()).unwrap();
            let a = store.insert(&tree_id(), b"a", b"1", None, None).unwrap();
            c = store.insert(&tree_id(), b"c", b"3", Some(a), Some(Side::Right)).unwrap();
        }

        let store = DataStore::open(&path).unwrap();
        assert_eq!(store.get_node_by_key(&tree_id(), b"a").unwrap().value, b"1");
        store.insert(&tree_id(), b"b", b"2", Some(c), Some(Side::Left)).unwrap();
        store.delete(&tree_id(), b"a").unwrap();
        assert_eq!(keys(&store), vec![b"b".to_vec(), b"c".to_vec()]);
    }
}
