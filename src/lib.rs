//! # arbor_db
//!
//! An authenticated, versioned key-value store backed by a binary Merkle tree.
//!
//! Every write produces a new generation of its tree: the nodes on the path
//! from the touched leaf to the root are rebuilt, a new root is recorded and
//! the minimal operation that produced it is logged, all in one durable
//! transaction. Peers replicate a tree through the sync server without
//! trusting it, by replaying the operation log and checking every root hash.
//!
//! ## Core Concepts
//!
//! - **Nodes**: Immutable and content-addressed, shared between generations
//! - **Roots**: One per generation, `Pending` until confirmed, then `Committed`
//! - **Operations**: The insertion or deletion between two generations
//! - **Sync server**: Read-only websocket queries over roots, nodes and operations
//!
//! ## Example
//!
//! ```ignore
//! use arbor_db::{DataStore, Side, TreeId};
//!
//! let store = DataStore::open_or_create("store.arbor")?;
//! let tree = TreeId::from_bytes([1; 32]);
//! store.create_tree(&tree)?;
//! let a = store.insert(&tree, b"a", b"1", None, None)?;
//! store.insert(&tree, b"b", b"2", Some(a), Some(Side::Right))?;
//! store.commit(&tree, 2)?;
//! ```

pub mod config;
pub mod merkle;
pub mod model;
#[cfg(feature = "sync")]
pub mod server;
pub mod store;
#[cfg(feature = "sync")]
pub mod sync;

mod datastore;
mod error;
mod oplog;
mod registry;

pub use config::{Config, ServerConfig, StoreConfig};
pub use datastore::DataStore;
pub use error::{Error, Result};
pub use merkle::{Diff, DiffEntry, LeftToRight};
pub use model::{
    DeletionData, Hash, InsertionData, InternalNode, Node, Operation, Root, Side, Status,
    TerminalNode, TreeId,
};
#[cfg(feature = "sync")]
pub use server::SyncServer;
pub use store::{Storage, Transaction};
#[cfg(feature = "sync")]
pub use sync::{ReplicationReport, SyncClient};

/// Database version for format compatibility
pub const VERSION: u32 = 1;

/// Magic bytes for file identification
pub const MAGIC: &[u8; 8] = b"ARBOR_DB";
