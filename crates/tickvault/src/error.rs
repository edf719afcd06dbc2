//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] tickvault_core::CoreError),

    #[error(transparent)]
    Engine(#[from] tickvault_engine::EngineError),

    #[error("Store error: {0}")]
    Store(#[from] tickvault_store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type VaultResult<T> = Result<T, VaultError>;
