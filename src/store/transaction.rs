//! Write transactions
//!
//! A transaction stages records in memory. `commit` writes them as one frame
//! and publishes them together; dropping an uncommitted transaction discards
//! everything it staged.

use crate::model::{Hash, Node, Operation, Root, Status, TreeId};
use crate::store::record::Record;
use crate::store::state::IndexUpdate;
use crate::store::Storage;
use crate::Result;
use std::collections::HashMap;
use tracing::debug;

pub struct Transaction<'a> {
    storage: &'a Storage,
    records: Vec<Record>,
    staged_nodes: HashMap<Hash, Node>,
    index_updates: Vec<(TreeId, IndexUpdate)>,
    finished: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        Transaction {
            storage,
            records: Vec::new(),
            staged_nodes: HashMap::new(),
            index_updates: Vec::new(),
            finished: false,
        }
    }

    /// Stage a node unless an identical one is already stored
    pub fn put_node(&mut self, node: Node) -> Hash {
        let hash = node.hash();
        if self.staged_nodes.contains_key(&hash) || self.storage.read().nodes.contains_key(&hash) {
            return hash;
        }
        self.staged_nodes.insert(hash, node.clone());
        self.records.push(Record::Node(node));
        hash
    }

    /// Look a node up in this transaction, then in committed state
    pub fn get_node(&self, hash: &Hash) -> Result<Node> {
        if let Some(node) = self.staged_nodes.get(hash) {
            return Ok(node.clone());
        }
        self.storage.read().node(hash).cloned()
    }

    pub fn append_root(&mut self, root: Root) {
        self.records.push(Record::Root(root));
    }

    pub fn append_operation(&mut self, tree_id: TreeId, generation: u64, operation: Operation) {
        self.records.push(Record::Operation {
            tree_id,
            generation,
            operation,
        });
    }

    pub fn set_status(&mut self, tree_id: TreeId, generation: u64, status: Status) {
        self.records.push(Record::Status {
            tree_id,
            generation,
            status,
        });
    }

    pub(crate) fn update_index(&mut self, tree_id: TreeId, update: IndexUpdate) {
        self.index_updates.push((tree_id, update));
    }

    /// Number of records staged so far
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Make every staged record durable and visible, or none of them
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        let records = std::mem::take(&mut self.records);
        let index_updates = std::mem::take(&mut self.index_updates);
        self.storage.commit(records, index_updates)
    }

    /// Discard every staged record
    pub fn rollback(mut self) {
        self.finished = true;
        debug!(records = self.records.len(), "Transaction rolled back");
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.records.is_empty() {
            debug!(records = self.records.len(), "Uncommitted transaction dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TerminalNode;

    #[test]
    fn test_rollback_discards_everything() {
        let storage = Storage::in_memory();
        let node = Node::Terminal(TerminalNode::new(b"k".to_vec(), b"v".to_vec()));
        let tree_id = TreeId::from_bytes([3; 32]);

        let mut tx = storage.begin();
        let hash = tx.put_node(node.clone());
        tx.append_root(Root::empty(tree_id));
        assert_eq!(tx.get_node(&hash).unwrap(), node);
        tx.rollback();

        assert_eq!(storage.node_count(), 0);
        assert!(storage.read().trees.is_empty());

        {
            let mut tx = storage.begin();
            tx.put_node(node);
            // dropped without commit
        }
        assert_eq!(storage.node_count(), 0);
    }

    #[test]
    fn test_put_node_deduplicates() {
        let storage = Storage::in_memory();
        let node = Node::Terminal(TerminalNode::new(b"k".to_vec(), b"v".to_vec()));

        let mut tx = storage.begin();
        tx.put_node(node.clone());
        tx.put_node(node.clone());
        assert_eq!(tx.len(), 1);
        tx.commit().unwrap();

        let mut tx = storage.begin();
        tx.put_node(node);
        assert!(tx.is_empty());
        assert_eq!(storage.node_count(), 1);
    }
}
