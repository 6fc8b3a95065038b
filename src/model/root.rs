//! Root type - one generation of a tree

use super::{Hash, TreeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Confirmation state of a generation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Written locally, not yet confirmed
    Pending,
    /// Confirmed; final
    Committed,
}

impl Status {
    /// Integer code used on the wire
    pub fn code(&self) -> u8 {
        match self {
            Status::Pending => 1,
            Status::Committed => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Status::Pending),
            2 => Some(Status::Committed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Committed => "committed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Status::Pending),
            "committed" => Some(Status::Committed),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A snapshot of a tree at one generation
///
/// `node_hash` is `None` for the empty tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub tree_id: TreeId,
    pub generation: u64,
    pub node_hash: Option<Hash>,
    pub status: Status,
}

impl Root {
    /// Generation 0 of a freshly created tree
    pub fn empty(tree_id: TreeId) -> Self {
        Root {
            tree_id,
            generation: 0,
            node_hash: None,
            status: Status::Pending,
        }
    }

    /// The pending root following this one
    pub fn next(&self, node_hash: Option<Hash>) -> Self {
        Root {
            tree_id: self.tree_id,
            generation: self.generation + 1,
            node_hash,
            status: Status::Pending,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.node_hash.is_none()
    }
}
