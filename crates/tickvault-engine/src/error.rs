//! Engine error types.

use thiserror::Error;
use tickvault_core::CoreError;
use tickvault_store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Table '{table}' is {state:?}, not writable")]
    NotWritable {
        table: String,
        state: tickvault_core::TableState,
    },

    #[error("Flush failed after {attempts} attempts: {last_error}")]
    FlushFailure { attempts: u32, last_error: String },

    #[error("Compaction conflict: {0}")]
    CompactionConflict(String),

    #[error("Audit inconsistency in table '{table}': {reason}")]
    AuditInconsistency { table: String, reason: String },

    #[error("Writes halted for table '{0}' pending manual intervention")]
    WritesHalted(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
