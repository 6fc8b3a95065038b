//! Operation type - the diff between two consecutive generations

use super::{Hash, Side, Status};
use serde::{Deserialize, Serialize};

/// A key/value pair was attached beside `reference_node_hash`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertionData {
    /// Root hash after the insertion
    pub hash: Hash,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// `None` when inserted into an empty tree
    pub reference_node_hash: Option<Hash>,
    pub side: Option<Side>,
    pub root_status: Status,
}

/// A key was removed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionData {
    /// Root hash after the deletion, `None` when the tree became empty
    pub hash: Option<Hash>,
    pub key: Vec<u8>,
    pub root_status: Status,
}

/// The change that produced generation `g` from generation `g - 1`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Insertion(InsertionData),
    Deletion(DeletionData),
}

impl Operation {
    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Insertion(data) => &data.key,
            Operation::Deletion(data) => &data.key,
        }
    }

    /// Root hash of the generation this operation produced
    pub fn root_hash(&self) -> Option<Hash> {
        match self {
            Operation::Insertion(data) => Some(data.hash),
            Operation::Deletion(data) => data.hash,
        }
    }

    pub fn root_status(&self) -> Status {
        match self {
            Operation::Insertion(data) => data.root_status,
            Operation::Deletion(data) => data.root_status,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Operation::Insertion(_))
    }

    pub(crate) fn with_root_status(mut self, status: Status) -> Self {
        match &mut self {
            Operation::Insertion(data) => data.root_status = status,
            Operation::Deletion(data) => data.root_status = status,
        }
        self
    }
}
