//! Durable transactional storage
//!
//! Nodes, roots, operations and status changes are appended to a single
//! log file as checksummed, zstd-compressed frames, one per transaction.

mod record;
mod state;
mod storage;
mod transaction;

pub use record::{decode_frame, encode_frame, FrameRead, Record};
pub(crate) use state::{IndexUpdate, State, TreeState};
pub use storage::Storage;
pub use transaction::Transaction;
