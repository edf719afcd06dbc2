//! Error types for tickvault-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
