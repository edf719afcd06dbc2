//! Store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Commit conflict: {0}")]
    CommitConflict(String),

    #[error("Corrupt store state: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
