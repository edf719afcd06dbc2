//! Version log entries.
//!
//! One `VersionEntry` per committed operation, appended to the table's
//! `versions.jsonl`. The ordered entries are the audit trail: folding them
//! yields the live segment set at any committed version, with no side
//! bookkeeping tables.

use crate::schema::TableSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operation recorded by a version entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Table defined; carries the initial schema snapshot.
    Create,
    /// Table activated for writes.
    Activate,
    /// One committed flush.
    Flush,
    /// Segment merge; replaced segments stay on disk for as-of reads.
    Compact,
    /// Additive schema migration; carries the new schema snapshot.
    Migrate,
    /// Table made read-only.
    Deprecate,
}

/// One durable segment file, as recorded in the version log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRef {
    /// Partition value the segment belongs to.
    pub partition: String,
    /// Path relative to the table directory.
    pub path: String,
    pub rows: u64,
    pub bytes: u64,
}

/// One immutable entry of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// Strictly increasing per table; assigned only at commit.
    pub version: u64,
    pub op: Operation,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub rows_written: u64,
    #[serde(default)]
    pub duplicates_dropped: u64,
    /// Partitions touched by this operation.
    #[serde(default)]
    pub partitions: Vec<String>,
    /// Segments this entry adds to the live set.
    #[serde(default)]
    pub segments_added: Vec<SegmentRef>,
    /// Segment paths this entry removes from the live set (compaction).
    #[serde(default)]
    pub segments_replaced: Vec<String>,
    /// Schema snapshot; present on Create and Migrate entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<TableSchema>,
}

impl VersionEntry {
    /// A minimal entry for operations that move no rows.
    #[must_use]
    pub fn administrative(version: u64, op: Operation, at: DateTime<Utc>) -> Self {
        Self {
            version,
            op,
            at,
            rows_written: 0,
            duplicates_dropped: 0,
            partitions: Vec::new(),
            segments_added: Vec::new(),
            segments_replaced: Vec::new(),
            schema: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entry_round_trip() {
        let entry = VersionEntry {
            version: 3,
            op: Operation::Flush,
            at: Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap(),
            rows_written: 42,
            duplicates_dropped: 2,
            partitions: vec!["2026-01-30".into()],
            segments_added: vec![SegmentRef {
                partition: "2026-01-30".into(),
                path: "2026-01-30/seg-v000003-0.jsonl".into(),
                rows: 42,
                bytes: 4096,
            }],
            segments_replaced: vec![],
            schema: None,
        };
        let line = serde_json::to_string(&entry).unwrap();
        let back: VersionEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_administrative_entry_is_empty() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let entry = VersionEntry::administrative(1, Operation::Create, at);
        assert_eq!(entry.rows_written, 0);
        assert!(entry.segments_added.is_empty());
    }
}
