//! Core domain types for the tickvault persistence layer.
//!
//! This crate provides the fundamental types used throughout the system:
//! - `ColumnType`, `Value`: tagged typed values for record fields
//! - `TableSchema`, `ColumnDef`, `PartitionRule`: table definitions
//! - `Record`: a typed field map validated against a schema
//! - `VersionEntry`: one immutable entry of the per-table audit trail

pub mod error;
pub mod record;
pub mod schema;
pub mod value;
pub mod version;

pub use error::{CoreError, CoreResult};
pub use record::{KeyTuple, Record};
pub use schema::{
    ColumnDef, PartitionRule, RetentionPolicy, TableSchema, TableState, MAX_PARTITIONS_DEFAULT,
};
pub use value::{ColumnType, Value};
pub use version::{Operation, SegmentRef, VersionEntry};
