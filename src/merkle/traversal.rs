//! Left-to-right subtree traversal

use crate::model::{Hash, Node};
use crate::store::Storage;
use crate::Result;

/// Lazy pre-order walk of the subtree under one node
///
/// Every node is yielded before its left subtree, and the left subtree is
/// exhausted before the right one starts, so terminal nodes come out in
/// left-to-right order. Nodes are immutable once stored, so looking each one
/// up as it is reached sees exactly the subtree the start hash denotes even
/// while other writers commit.
#[derive(Clone)]
pub struct LeftToRight<'a> {
    storage: &'a Storage,
    start: Hash,
    stack: Vec<Hash>,
    failed: bool,
}

impl<'a> LeftToRight<'a> {
    pub(crate) fn new(storage: &'a Storage, start: Hash) -> Self {
        LeftToRight {
            storage,
            start,
            stack: vec![start],
            failed: false,
        }
    }

    /// Begin again from the start node
    pub fn restart(&mut self) {
        self.stack.clear();
        self.stack.push(self.start);
        self.failed = false;
    }

    /// Hash of the subtree being walked
    pub fn start(&self) -> Hash {
        self.start
    }
}

impl Iterator for LeftToRight<'_> {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let hash = self.stack.pop()?;
        let node = match self.storage.read().node(&hash) {
            Ok(node) => node.clone(),
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };
        if let Node::Internal(internal) = &node {
            self.stack.push(internal.right);
            self.stack.push(internal.left);
        }
        Some(Ok(node))
    }
}
