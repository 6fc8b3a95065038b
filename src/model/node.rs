//! Tree node types
//!
//! Nodes are immutable and identified by the hash of their content. A node
//! that appears in many generations is stored once.

use super::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side of a reference node a new leaf is attached on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            other => Err(format!("invalid side: {}", other)),
        }
    }
}

/// A leaf carrying one key/value pair
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalNode {
    pub hash: Hash,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl TerminalNode {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        TerminalNode {
            hash: Hash::terminal(&key, &value),
            key,
            value,
        }
    }
}

/// A branch joining two subtrees
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalNode {
    pub hash: Hash,
    pub left: Hash,
    pub right: Hash,
}

impl InternalNode {
    pub fn new(left: Hash, right: Hash) -> Self {
        InternalNode {
            hash: Hash::internal(&left, &right),
            left,
            right,
        }
    }

    /// Build the node joining `new` with `reference`, `new` placed on `side`
    pub fn attach(reference: Hash, new: Hash, side: Side) -> Self {
        match side {
            Side::Left => Self::new(new, reference),
            Side::Right => Self::new(reference, new),
        }
    }

    /// Copy of this node with `old` child swapped for `new`
    pub fn replace_child(&self, old: &Hash, new: Hash) -> Option<Self> {
        if &self.left == old {
            Some(Self::new(new, self.right))
        } else if &self.right == old {
            Some(Self::new(self.left, new))
        } else {
            None
        }
    }

    /// The child that is not `child`
    pub fn other_child(&self, child: &Hash) -> Option<Hash> {
        if &self.left == child {
            Some(self.right)
        } else if &self.right == child {
            Some(self.left)
        } else {
            None
        }
    }
}

/// A node in the Merkle tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Terminal(TerminalNode),
    Internal(InternalNode),
}

impl Node {
    /// The stored hash
    pub fn hash(&self) -> Hash {
        match self {
            Node::Terminal(node) => node.hash,
            Node::Internal(node) => node.hash,
        }
    }

    /// Hash recomputed from the node's content
    pub fn compute_hash(&self) -> Hash {
        match self {
            Node::Terminal(node) => Hash::terminal(&node.key, &node.value),
            Node::Internal(node) => Hash::internal(&node.left, &node.right),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Node::Terminal(_))
    }

    pub fn as_terminal(&self) -> Option<&TerminalNode> {
        match self {
            Node::Terminal(node) => Some(node),
            Node::Internal(_) => None,
        }
    }

    pub fn as_internal(&self) -> Option<&InternalNode> {
        match self {
            Node::Internal(node) => Some(node),
            Node::Terminal(_) => None,
        }
    }
}

impl From<TerminalNode> for Node {
    fn from(node: TerminalNode) -> Self {
        Node::Terminal(node)
    }
}

impl From<InternalNode> for Node {
    fn from(node: InternalNode) -> Self {
        Node::Internal(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_content_identical_hash() {
        let a = TerminalNode::new(b"key".to_vec(), b"value".to_vec());
        let b = TerminalNode::new(b"key".to_vec(), b"value".to_vec());
        assert_eq!(a.hash, b.hash);

        let i1 = InternalNode::new(a.hash, Hash::digest(b"x"));
        let i2 = InternalNode::new(b.hash, Hash::digest(b"x"));
        assert_eq!(i1.hash, i2.hash);
    }

    #[test]
    fn test_attach_orders_by_side() {
        let reference = Hash::digest(b"ref");
        let new = Hash::digest(b"new");

        let left = InternalNode::attach(reference, new, Side::Left);
        assert_eq!((left.left, left.right), (new, reference));

        let right = InternalNode::attach(reference, new, Side::Right);
        assert_eq!((right.left, right.right), (reference, new));
    }

    #[test]
    fn test_replace_child() {
        let a = Hash::digest(b"a");
        let b = Hash::digest(b"b");
        let c = Hash::digest(b"c");
        let node = InternalNode::new(a, b);

        let replaced = node.replace_child(&b, c).unwrap();
        assert_eq!(replaced.left, a);
        assert_eq!(replaced.right, c);
        assert_eq!(replaced.hash, Hash::internal(&a, &c));
        assert!(node.replace_child(&c, a).is_none());
        assert_eq!(node.other_child(&a), Some(b));
    }

    #[test]
    fn test_compute_hash_detects_tampering() {
        let mut node = Node::Terminal(TerminalNode::new(b"k".to_vec(), b"v".to_vec()));
        assert_eq!(node.hash(), node.compute_hash());
        if let Node::Terminal(ref mut terminal) = node {
            terminal.value = b"tampered".to_vec();
        }
        assert_ne!(node.hash(), node.compute_hash());
    }

    #[test]
    fn test_side_parse() {
        assert_eq!("left".parse::<Side>().unwrap(), Side::Left);
        assert_eq!("RIGHT".parse::<Side>().unwrap(), Side::Right);
        assert!("up".parse::<Side>().is_err());
    }
}
