//! Core data model types for arbor_db

mod hash;
mod node;
mod operation;
mod root;

pub use hash::{Hash, TreeId};
pub use node::{InternalNode, Node, Side, TerminalNode};
pub use operation::{DeletionData, InsertionData, Operation};
pub use root::{Root, Status};
