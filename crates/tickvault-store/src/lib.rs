//! Durable partitioned storage for tickvault.
//!
//! Records land in JSON Lines segment files organized by partition, with
//! an append-only per-table version log as both the commit mechanism and
//! the audit trail:
//! - `segment`: immutable JSONL segment files
//! - `audit`: the version log, live-set folding, Last-Write-Wins folding
//! - `fs_store`: the `SegmentStore` trait and filesystem implementation
//! - `reader`: snapshot reads, point-in-time reads, version diffs

pub mod audit;
pub mod error;
pub mod fs_store;
pub mod reader;
pub mod segment;

pub use audit::{AsOf, VersionLog};
pub use error::{StoreError, StoreResult};
pub use fs_store::{FsStore, SegmentStore, StagedPartition};
pub use reader::{diff_versions, read_as_of, read_latest, PartitionFilter, RowDelta};
