//! Shared test fixtures: schemas, records, and a failure-injecting
//! store double.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use tickvault::{ColumnDef, ColumnType, PartitionRule, Record, TableSchema};
use tickvault_core::{KeyTuple, Operation, SegmentRef, VersionEntry};
use tickvault_store::{FsStore, SegmentStore, StagedPartition, StoreError, StoreResult};

/// Market snapshot table: key (t, symbol), tie-break t, daily partitions.
pub fn snapshot_schema() -> TableSchema {
    TableSchema {
        name: "market_snapshots".into(),
        columns: vec![
            ColumnDef::new("t", ColumnType::Timestamp),
            ColumnDef::new("symbol", ColumnType::Text),
            ColumnDef::new("regime", ColumnType::Text),
            ColumnDef::new("value", ColumnType::Int),
        ],
        key_columns: vec!["t".into(), "symbol".into()],
        tie_break: Some("t".into()),
        partition_rule: PartitionRule::DateFromTimestamp { column: "t".into() },
        retention: Default::default(),
        max_partitions: 1000,
    }
}

/// Latest-value table: key symbol alone, tie-break t, single partition.
/// Corrections for a symbol arrive as records with a later t.
pub fn latest_schema() -> TableSchema {
    TableSchema {
        name: "latest_signals".into(),
        columns: vec![
            ColumnDef::new("t", ColumnType::Timestamp),
            ColumnDef::new("symbol", ColumnType::Text),
            ColumnDef::new("value", ColumnType::Int),
        ],
        key_columns: vec!["symbol".into()],
        tie_break: Some("t".into()),
        partition_rule: PartitionRule::Single,
        retention: Default::default(),
        max_partitions: 1000,
    }
}

pub fn ts(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, day, hour, min, 0).unwrap()
}

pub fn snapshot(day: u32, symbol: &str, regime: &str) -> Record {
    Record::new()
        .with("t", ts(day, 14, 30))
        .with("symbol", symbol)
        .with("regime", regime)
        .with("value", 1i64)
}

pub fn signal(symbol: &str, minute: u32, value: i64) -> Record {
    Record::new()
        .with("t", ts(30, 14, minute))
        .with("symbol", symbol)
        .with("value", value)
}

/// Store double that fails the first N flush commits with a transient
/// error, then behaves like the real filesystem store.
pub struct FlakyStore {
    inner: FsStore,
    fail_commits: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: FsStore, fail_commits: u32) -> Self {
        Self {
            inner,
            fail_commits: AtomicU32::new(fail_commits),
        }
    }

    pub fn remaining_failures(&self) -> u32 {
        self.fail_commits.load(Ordering::Acquire)
    }
}

impl SegmentStore for FlakyStore {
    fn create_table(&self, schema: &TableSchema) -> StoreResult<VersionEntry> {
        self.inner.create_table(schema)
    }

    fn append_admin(&self, table: &str, op: Operation) -> StoreResult<VersionEntry> {
        self.inner.append_admin(table, op)
    }

    fn append_migration(&self, schema: &TableSchema) -> StoreResult<VersionEntry> {
        self.inner.append_migration(schema)
    }

    fn table_exists(&self, table: &str) -> bool {
        self.inner.table_exists(table)
    }

    fn list_tables(&self) -> StoreResult<Vec<String>> {
        self.inner.list_tables()
    }

    fn list_versions(&self, table: &str) -> StoreResult<Vec<VersionEntry>> {
        self.inner.list_versions(table)
    }

    fn lookup_keys(
        &self,
        schema: &TableSchema,
        partitions: &[String],
        keys: &HashSet<KeyTuple>,
    ) -> StoreResult<HashMap<KeyTuple, Record>> {
        self.inner.lookup_keys(schema, partitions, keys)
    }

    fn commit_flush(
        &self,
        schema: &TableSchema,
        staged: Vec<StagedPartition>,
        duplicates_dropped: u64,
    ) -> StoreResult<VersionEntry> {
        let remaining = self.fail_commits.load(Ordering::Acquire);
        if remaining > 0 {
            self.fail_commits.store(remaining - 1, Ordering::Release);
            return Err(StoreError::Unavailable("injected outage".into()));
        }
        self.inner.commit_flush(schema, staged, duplicates_dropped)
    }

    fn live_segments(&self, table: &str, as_of: Option<u64>) -> StoreResult<Vec<SegmentRef>> {
        self.inner.live_segments(table, as_of)
    }

    fn read_segment(&self, table: &str, seg: &SegmentRef) -> StoreResult<Vec<Record>> {
        self.inner.read_segment(table, seg)
    }

    fn commit_compaction(
        &self,
        schema: &TableSchema,
        partition: &str,
        replaced: &[String],
        merged: &[Record],
    ) -> StoreResult<VersionEntry> {
        self.inner
            .commit_compaction(schema, partition, replaced, merged)
    }

    fn prune_superseded(
        &self,
        schema: &TableSchema,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.inner.prune_superseded(schema, now)
    }
}
