//! tickvault: idempotent time-series persistence for market data.
//!
//! Append-only, date-partitioned storage with Last-Write-Wins
//! deduplication, batched atomic flushes, and a built-in audit trail
//! supporting point-in-time reconstruction.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod vault;

pub use config::VaultConfig;
pub use error::{VaultError, VaultResult};
pub use logging::init_logging;
pub use vault::{IngestSummary, Vault};

// The surfaces callers need, re-exported so most users depend only on
// this crate.
pub use tickvault_core::{
    ColumnDef, ColumnType, PartitionRule, Record, RetentionPolicy, TableSchema, Value,
    VersionEntry,
};
pub use tickvault_engine::{CompactionReport, FlushOutcome};
pub use tickvault_store::{AsOf, PartitionFilter, RowDelta};
