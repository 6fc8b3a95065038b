//! Error types for arbor_db

use crate::model::TreeId;
use thiserror::Error;

/// Result type alias for arbor_db operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in arbor_db operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Tree already exists: {0}")]
    TreeExists(TreeId),

    #[error("Key already present: {0}")]
    DuplicateKey(String),

    #[error("Invalid generation range {from}..{to} (latest generation is {latest})")]
    InvalidRange { from: u64, to: u64, latest: u64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Integrity check failed: {detail}")]
    Integrity {
        tree_id: Option<TreeId>,
        detail: String,
    },

    #[error("Tree {0} is quarantined after a failed integrity check")]
    Quarantined(TreeId),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid database file: {0}")]
    InvalidFile(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[cfg(feature = "sync")]
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means "the thing asked for does not exist"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::InvalidHash(e.to_string())
    }
}
