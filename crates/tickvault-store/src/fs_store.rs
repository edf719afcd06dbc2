//! Durable store: trait and filesystem implementation.
//!
//! `SegmentStore` is the single shared mutable resource of the system and
//! is injected as a handle (`Arc<dyn SegmentStore>`) so the write path can
//! be exercised against scripted test doubles.
//!
//! Layout per table:
//!
//! ```text
//! <root>/<table>/versions.jsonl              append-only audit trail
//! <root>/<table>/<partition>/seg-vNNNNNN-K.jsonl
//! ```
//!
//! Commit protocol: under the table's commit lock, stage segment files
//! named after the next version, then append the version entry. The
//! append is the commit point; staged files never referenced by the log
//! are overwritten by the next commit of that version number.

use crate::audit::{fold_winners, live_set, VersionLog};
use crate::error::{StoreError, StoreResult};
use crate::segment;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tickvault_core::{
    KeyTuple, Operation, Record, SegmentRef, TableSchema, VersionEntry,
};
use tracing::{debug, info, warn};

/// Records bound for one partition within a single flush.
#[derive(Debug, Clone)]
pub struct StagedPartition {
    pub partition: String,
    pub records: Vec<Record>,
}

/// Durable, partition-organized segment storage.
pub trait SegmentStore: Send + Sync {
    /// Create the table directory and commit the Create entry (carries
    /// the schema snapshot).
    fn create_table(&self, schema: &TableSchema) -> StoreResult<VersionEntry>;

    /// Commit an administrative entry (Activate, Deprecate).
    fn append_admin(&self, table: &str, op: Operation) -> StoreResult<VersionEntry>;

    /// Commit a Migrate entry carrying the new schema snapshot.
    fn append_migration(&self, schema: &TableSchema) -> StoreResult<VersionEntry>;

    fn table_exists(&self, table: &str) -> bool;

    /// Names of all tables present in the store.
    fn list_tables(&self) -> StoreResult<Vec<String>>;

    /// Ordered committed history.
    fn list_versions(&self, table: &str) -> StoreResult<Vec<VersionEntry>>;

    /// Latest committed record per requested key, looking only at the
    /// given partitions. This is the bounded anti-join lookup: cost is
    /// proportional to the touched partitions, never a full table scan.
    fn lookup_keys(
        &self,
        schema: &TableSchema,
        partitions: &[String],
        keys: &HashSet<KeyTuple>,
    ) -> StoreResult<HashMap<KeyTuple, Record>>;

    /// Atomically commit one flush. All partitions commit together or
    /// not at all.
    fn commit_flush(
        &self,
        schema: &TableSchema,
        staged: Vec<StagedPartition>,
        duplicates_dropped: u64,
    ) -> StoreResult<VersionEntry>;

    /// Live segment set at `as_of` (inclusive; `None` = latest).
    fn live_segments(&self, table: &str, as_of: Option<u64>) -> StoreResult<Vec<SegmentRef>>;

    fn read_segment(&self, table: &str, seg: &SegmentRef) -> StoreResult<Vec<Record>>;

    /// Commit a compaction of one partition. `replaced` is the live set
    /// the plan was built against; if it no longer matches, fails with
    /// `CommitConflict` and leaves everything untouched.
    fn commit_compaction(
        &self,
        schema: &TableSchema,
        partition: &str,
        replaced: &[String],
        merged: &[Record],
    ) -> StoreResult<VersionEntry>;

    /// Delete superseded segment files older than the table's retention
    /// window. Returns the number of files removed.
    fn prune_superseded(&self, schema: &TableSchema, now: DateTime<Utc>) -> StoreResult<usize>;
}

/// Filesystem-backed `SegmentStore`.
pub struct FsStore {
    root: PathBuf,
    /// Per-table commit locks; version assignment and the log append
    /// happen inside the locked section.
    commit_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FsStore {
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            commit_locks: DashMap::new(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, table: &str) -> PathBuf {
        self.root.join(table)
    }

    fn log(&self, table: &str) -> VersionLog {
        VersionLog::new(&self.table_dir(table))
    }

    fn commit_lock(&self, table: &str) -> Arc<Mutex<()>> {
        self.commit_locks
            .entry(table.to_string())
            .or_default()
            .clone()
    }

    fn require_table(&self, table: &str) -> StoreResult<VersionLog> {
        let log = self.log(table);
        if !log.exists() {
            return Err(StoreError::UnknownTable(table.to_string()));
        }
        Ok(log)
    }

    /// Next version under an already-held commit lock.
    fn next_version(log: &VersionLog) -> StoreResult<u64> {
        Ok(log.last_version()? + 1)
    }
}

/// Partition values become directory names; anything outside the safe
/// character set is mapped to '_'.
fn partition_dir(partition: &str) -> String {
    partition
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '=') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl SegmentStore for FsStore {
    fn create_table(&self, schema: &TableSchema) -> StoreResult<VersionEntry> {
        let lock = self.commit_lock(&schema.name);
        let _guard = lock.lock();

        let log = self.log(&schema.name);
        if log.exists() {
            return Err(StoreError::TableExists(schema.name.clone()));
        }
        std::fs::create_dir_all(self.table_dir(&schema.name))?;

        let mut entry = VersionEntry::administrative(1, Operation::Create, Utc::now());
        entry.schema = Some(schema.clone());
        log.append(&entry)?;
        info!(table = %schema.name, "Created table");
        Ok(entry)
    }

    fn append_admin(&self, table: &str, op: Operation) -> StoreResult<VersionEntry> {
        let lock = self.commit_lock(table);
        let _guard = lock.lock();

        let log = self.require_table(table)?;
        let entry = VersionEntry::administrative(Self::next_version(&log)?, op, Utc::now());
        log.append(&entry)?;
        Ok(entry)
    }

    fn append_migration(&self, schema: &TableSchema) -> StoreResult<VersionEntry> {
        let lock = self.commit_lock(&schema.name);
        let _guard = lock.lock();

        let log = self.require_table(&schema.name)?;
        let mut entry =
            VersionEntry::administrative(Self::next_version(&log)?, Operation::Migrate, Utc::now());
        entry.schema = Some(schema.clone());
        log.append(&entry)?;
        info!(table = %schema.name, version = entry.version, "Committed schema migration");
        Ok(entry)
    }

    fn table_exists(&self, table: &str) -> bool {
        self.log(table).exists()
    }

    fn list_tables(&self) -> StoreResult<Vec<String>> {
        let mut tables = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.log(&name).exists() {
                tables.push(name);
            }
        }
        tables.sort();
        Ok(tables)
    }

    fn list_versions(&self, table: &str) -> StoreResult<Vec<VersionEntry>> {
        self.require_table(table)?.read_all()
    }

    fn lookup_keys(
        &self,
        schema: &TableSchema,
        partitions: &[String],
        keys: &HashSet<KeyTuple>,
    ) -> StoreResult<HashMap<KeyTuple, Record>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let entries = self.require_table(&schema.name)?.read_all()?;
        let wanted: HashSet<&str> = partitions.iter().map(String::as_str).collect();

        let mut winners = HashMap::new();
        for seg in live_set(&entries, None) {
            if !wanted.contains(seg.partition.as_str()) {
                continue;
            }
            let rows = self.read_segment(&schema.name, &seg)?;
            fold_winners(
                schema,
                rows.into_iter().filter(|r| keys.contains(&r.key_tuple(schema))),
                &mut winners,
            );
        }
        Ok(winners)
    }

    fn commit_flush(
        &self,
        schema: &TableSchema,
        staged: Vec<StagedPartition>,
        duplicates_dropped: u64,
    ) -> StoreResult<VersionEntry> {
        let lock = self.commit_lock(&schema.name);
        let _guard = lock.lock();

        let log = self.require_table(&schema.name)?;
        let version = Self::next_version(&log)?;
        let table_dir = self.table_dir(&schema.name);

        let mut segments_added = Vec::with_capacity(staged.len());
        let mut partitions = Vec::with_capacity(staged.len());
        let mut rows_written = 0u64;

        for (seq, part) in staged.iter().enumerate() {
            let rel = format!(
                "{}/seg-v{:06}-{}.jsonl",
                partition_dir(&part.partition),
                version,
                seq
            );
            let (rows, bytes) = segment::write_segment(&table_dir.join(&rel), &part.records)?;
            rows_written += rows;
            partitions.push(part.partition.clone());
            segments_added.push(SegmentRef {
                partition: part.partition.clone(),
                path: rel,
                rows,
                bytes,
            });
        }

        let entry = VersionEntry {
            version,
            op: Operation::Flush,
            at: Utc::now(),
            rows_written,
            duplicates_dropped,
            partitions,
            segments_added,
            segments_replaced: Vec::new(),
            schema: None,
        };
        log.append(&entry)?;

        info!(
            table = %schema.name,
            version,
            rows = rows_written,
            duplicates = duplicates_dropped,
            partitions = entry.partitions.len(),
            "Committed flush"
        );
        Ok(entry)
    }

    fn live_segments(&self, table: &str, as_of: Option<u64>) -> StoreResult<Vec<SegmentRef>> {
        let entries = self.require_table(table)?.read_all()?;
        Ok(live_set(&entries, as_of))
    }

    fn read_segment(&self, table: &str, seg: &SegmentRef) -> StoreResult<Vec<Record>> {
        segment::read_segment(&self.table_dir(table).join(&seg.path))
    }

    fn commit_compaction(
        &self,
        schema: &TableSchema,
        partition: &str,
        replaced: &[String],
        merged: &[Record],
    ) -> StoreResult<VersionEntry> {
        let lock = self.commit_lock(&schema.name);
        let _guard = lock.lock();

        let log = self.require_table(&schema.name)?;
        let entries = log.read_all()?;

        // The plan was built against a snapshot of the live set; anything
        // committed since invalidates it.
        let current: Vec<String> = live_set(&entries, None)
            .into_iter()
            .filter(|seg| seg.partition == partition)
            .map(|seg| seg.path)
            .collect();
        if current != replaced {
            return Err(StoreError::CommitConflict(format!(
                "partition '{partition}' changed during compaction ({} live vs {} planned)",
                current.len(),
                replaced.len()
            )));
        }

        let version = entries.last().map(|e| e.version).unwrap_or(0) + 1;
        let rel = format!("{}/seg-v{:06}-0.jsonl", partition_dir(partition), version);
        let (rows, bytes) =
            segment::write_segment(&self.table_dir(&schema.name).join(&rel), merged)?;

        let entry = VersionEntry {
            version,
            op: Operation::Compact,
            at: Utc::now(),
            rows_written: rows,
            duplicates_dropped: 0,
            partitions: vec![partition.to_string()],
            segments_added: vec![SegmentRef {
                partition: partition.to_string(),
                path: rel,
                rows,
                bytes,
            }],
            segments_replaced: replaced.to_vec(),
            schema: None,
        };
        log.append(&entry)?;

        info!(
            table = %schema.name,
            version,
            partition,
            merged_segments = replaced.len(),
            rows,
            "Committed compaction"
        );
        Ok(entry)
    }

    fn prune_superseded(&self, schema: &TableSchema, now: DateTime<Utc>) -> StoreResult<usize> {
        let Some(max_age_days) = schema.retention.superseded_max_age_days else {
            return Ok(0);
        };
        let cutoff = now - Duration::days(i64::from(max_age_days));
        let entries = self.require_table(&schema.name)?.read_all()?;
        let table_dir = self.table_dir(&schema.name);

        let mut removed = 0;
        for entry in &entries {
            if entry.op != Operation::Compact || entry.at > cutoff {
                continue;
            }
            for path in &entry.segments_replaced {
                let full = table_dir.join(path);
                match std::fs::remove_file(&full) {
                    Ok(()) => {
                        removed += 1;
                        debug!(table = %schema.name, path = %path, "Pruned superseded segment");
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(table = %schema.name, path = %path, error = %e, "Prune failed");
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tickvault_core::{ColumnDef, ColumnType, PartitionRule, RetentionPolicy};

    fn schema() -> TableSchema {
        TableSchema {
            name: "snapshots".into(),
            columns: vec![
                ColumnDef::new("symbol", ColumnType::Text),
                ColumnDef::new("seq", ColumnType::Int),
                ColumnDef::new("value", ColumnType::Int),
            ],
            key_columns: vec!["symbol".into()],
            tie_break: Some("seq".into()),
            partition_rule: PartitionRule::Single,
            retention: RetentionPolicy::default(),
            max_partitions: 1000,
        }
    }

    fn row(symbol: &str, seq: i64, value: i64) -> Record {
        Record::new()
            .with("symbol", symbol)
            .with("seq", seq)
            .with("value", value)
    }

    fn staged(partition: &str, records: Vec<Record>) -> StagedPartition {
        StagedPartition {
            partition: partition.into(),
            records,
        }
    }

    #[test]
    fn test_create_then_flush_then_list() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let schema = schema();

        let created = store.create_table(&schema).unwrap();
        assert_eq!(created.version, 1);
        assert!(store.table_exists("snapshots"));

        let flushed = store
            .commit_flush(&schema, vec![staged("all", vec![row("SPY", 1, 10)])], 0)
            .unwrap();
        assert_eq!(flushed.version, 2);
        assert_eq!(flushed.rows_written, 1);

        let versions = store.list_versions("snapshots").unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].op, Operation::Flush);
    }

    #[test]
    fn test_create_twice_fails() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        store.create_table(&schema()).unwrap();
        assert!(matches!(
            store.create_table(&schema()),
            Err(StoreError::TableExists(_))
        ));
    }

    #[test]
    fn test_lookup_keys_bounded_to_partitions() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let schema = schema();
        store.create_table(&schema).unwrap();
        store
            .commit_flush(
                &schema,
                vec![
                    staged("a", vec![row("SPY", 1, 10)]),
                    staged("b", vec![row("QQQ", 1, 20)]),
                ],
                0,
            )
            .unwrap();

        let keys: HashSet<KeyTuple> = [
            vec![tickvault_core::Value::from("SPY")],
            vec![tickvault_core::Value::from("QQQ")],
        ]
        .into_iter()
        .collect();

        // Only partition "a" is consulted, so QQQ is not found.
        let found = store
            .lookup_keys(&schema, &["a".into()], &keys)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&vec![tickvault_core::Value::from("SPY")]));
    }

    #[test]
    fn test_compaction_commit_and_conflict() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let schema = schema();
        store.create_table(&schema).unwrap();
        store
            .commit_flush(&schema, vec![staged("all", vec![row("SPY", 1, 10)])], 0)
            .unwrap();
        store
            .commit_flush(&schema, vec![staged("all", vec![row("QQQ", 1, 20)])], 0)
            .unwrap();

        let live: Vec<String> = store
            .live_segments("snapshots", None)
            .unwrap()
            .into_iter()
            .map(|s| s.path)
            .collect();
        assert_eq!(live.len(), 2);

        // A plan against a stale live set must not commit.
        let stale = vec![live[0].clone()];
        let err = store
            .commit_compaction(&schema, "all", &stale, &[row("SPY", 1, 10)])
            .unwrap_err();
        assert!(matches!(err, StoreError::CommitConflict(_)));

        let merged = vec![row("SPY", 1, 10), row("QQQ", 1, 20)];
        let entry = store
            .commit_compaction(&schema, "all", &live, &merged)
            .unwrap();
        assert_eq!(entry.op, Operation::Compact);

        let after = store.live_segments("snapshots", None).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].rows, 2);

        // Replaced files stay on disk for point-in-time reads.
        for path in &live {
            assert!(dir.path().join("snapshots").join(path).exists());
        }
    }

    #[test]
    fn test_prune_superseded_respects_retention() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let mut schema = schema();
        schema.retention = RetentionPolicy {
            superseded_max_age_days: Some(0),
        };
        store.create_table(&schema).unwrap();
        store
            .commit_flush(&schema, vec![staged("all", vec![row("SPY", 1, 10)])], 0)
            .unwrap();
        let live: Vec<String> = store
            .live_segments("snapshots", None)
            .unwrap()
            .into_iter()
            .map(|s| s.path)
            .collect();
        store
            .commit_compaction(&schema, "all", &live, &[row("SPY", 1, 10)])
            .unwrap();

        let removed = store
            .prune_superseded(&schema, Utc::now() + Duration::days(1))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("snapshots").join(&live[0]).exists());

        // Second prune is a no-op.
        let removed = store
            .prune_superseded(&schema, Utc::now() + Duration::days(1))
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_partition_dir_sanitizes() {
        assert_eq!(partition_dir("2026-01-30"), "2026-01-30");
        assert_eq!(partition_dir("a/b c"), "a_b_c");
    }
}
