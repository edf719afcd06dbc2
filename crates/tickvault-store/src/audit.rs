//! The append-only version log.
//!
//! One `versions.jsonl` per table. Appending an entry IS the commit point
//! of a flush or compaction: staged segment files not referenced by a
//! committed entry do not exist as far as readers are concerned. Folding
//! the entries up to a target version yields the live segment set at that
//! version, which makes the log the audit trail with no side bookkeeping.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tickvault_core::{KeyTuple, Operation, Record, SegmentRef, TableSchema, VersionEntry};
use tracing::warn;

/// Point-in-time target for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsOf {
    Version(u64),
    Timestamp(DateTime<Utc>),
}

/// Reader/appender for one table's `versions.jsonl`.
pub struct VersionLog {
    path: PathBuf,
}

impl VersionLog {
    #[must_use]
    pub fn new(table_dir: &Path) -> Self {
        Self {
            path: table_dir.join("versions.jsonl"),
        }
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read all committed entries in order.
    ///
    /// Malformed lines are skipped with a warning: the only way one
    /// appears is a torn append, which by definition never committed.
    /// Version numbers must be strictly increasing or the log is corrupt.
    pub fn read_all(&self) -> StoreResult<Vec<VersionEntry>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries: Vec<VersionEntry> = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<VersionEntry>(line) {
                Ok(entry) => {
                    if let Some(last) = entries.last() {
                        if entry.version <= last.version {
                            return Err(StoreError::Corrupt(format!(
                                "{}: version {} after {} at line {}",
                                self.path.display(),
                                entry.version,
                                last.version,
                                idx + 1
                            )));
                        }
                    }
                    entries.push(entry);
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = idx + 1,
                        error = %e,
                        "Skipping torn version-log line"
                    );
                }
            }
        }
        Ok(entries)
    }

    /// Highest committed version, 0 if the log is empty.
    pub fn last_version(&self) -> StoreResult<u64> {
        Ok(self.read_all()?.last().map(|e| e.version).unwrap_or(0))
    }

    /// Append one entry. The write of the trailing newline completes the
    /// commit; a torn tail from an earlier crash is sealed off first so
    /// it can never concatenate with a live entry.
    pub fn append(&self, entry: &VersionEntry) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        let needs_seal = {
            let len = file.metadata()?.len();
            if len == 0 {
                false
            } else {
                let mut tail = [0u8; 1];
                file.seek(SeekFrom::End(-1))?;
                file.read_exact(&mut tail)?;
                tail[0] != b'\n'
            }
        };

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        if needs_seal {
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// Fold entries up to `as_of` (inclusive; `None` = all) into the live
/// segment set: Flush adds, Compact swaps replaced for produced.
#[must_use]
pub fn live_set(entries: &[VersionEntry], as_of: Option<u64>) -> Vec<SegmentRef> {
    let mut live: Vec<SegmentRef> = Vec::new();
    for entry in entries {
        if let Some(limit) = as_of {
            if entry.version > limit {
                break;
            }
        }
        match entry.op {
            Operation::Flush => live.extend(entry.segments_added.iter().cloned()),
            Operation::Compact => {
                live.retain(|seg| !entry.segments_replaced.contains(&seg.path));
                live.extend(entry.segments_added.iter().cloned());
            }
            _ => {}
        }
    }
    live
}

/// Resolve a point-in-time target to a concrete version number.
///
/// A timestamp resolves to the last entry committed at or before it.
/// Returns `None` if nothing was committed by the target.
#[must_use]
pub fn resolve_as_of(entries: &[VersionEntry], as_of: AsOf) -> Option<u64> {
    match as_of {
        AsOf::Version(v) => {
            let last = entries.last()?.version;
            Some(v.min(last))
        }
        AsOf::Timestamp(ts) => entries
            .iter()
            .take_while(|e| e.at <= ts)
            .last()
            .map(|e| e.version),
    }
}

/// Fold records in commit order into the per-key winners.
///
/// A later record displaces the current winner only if its tie-break
/// strictly exceeds the winner's; equal or incomparable keeps the
/// existing record. Tables with no tie-break column resolve by arrival:
/// the later-committed record wins.
pub fn fold_winners(
    schema: &TableSchema,
    records: impl IntoIterator<Item = Record>,
    winners: &mut HashMap<KeyTuple, Record>,
) {
    for record in records {
        let key = record.key_tuple(schema);
        match winners.get(&key) {
            None => {
                winners.insert(key, record);
            }
            Some(current) => {
                let replace = if schema.tie_break.is_some() {
                    match (
                        record.tie_break_value(schema),
                        current.tie_break_value(schema),
                    ) {
                        (Some(new), Some(old)) => {
                            new.compare(old) == Some(std::cmp::Ordering::Greater)
                        }
                        _ => false,
                    }
                } else {
                    true
                };
                if replace {
                    winners.insert(key, record);
                }
            }
        }
    }
}

/// Total order over key tuples for deterministic read output.
///
/// Key columns are homogeneous per position, so per-value comparison
/// always succeeds; mismatches fall back to Equal.
#[must_use]
pub fn cmp_keys(a: &KeyTuple, b: &KeyTuple) -> std::cmp::Ordering {
    for (va, vb) in a.iter().zip(b.iter()) {
        match va.compare(vb) {
            Some(std::cmp::Ordering::Equal) | None => continue,
            Some(ord) => return ord,
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;
    use tickvault_core::{ColumnDef, ColumnType, PartitionRule, RetentionPolicy};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, day, 12, 0, 0).unwrap()
    }

    fn flush_entry(version: u64, day: u32, path: &str) -> VersionEntry {
        VersionEntry {
            version,
            op: Operation::Flush,
            at: at(day),
            rows_written: 1,
            duplicates_dropped: 0,
            partitions: vec!["p".into()],
            segments_added: vec![SegmentRef {
                partition: "p".into(),
                path: path.into(),
                rows: 1,
                bytes: 10,
            }],
            segments_replaced: vec![],
            schema: None,
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let log = VersionLog::new(dir.path());

        log.append(&flush_entry(1, 1, "a.jsonl")).unwrap();
        log.append(&flush_entry(2, 2, "b.jsonl")).unwrap();

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(log.last_version().unwrap(), 2);
    }

    #[test]
    fn test_torn_tail_is_not_committed() {
        let dir = TempDir::new().unwrap();
        let log = VersionLog::new(dir.path());
        log.append(&flush_entry(1, 1, "a.jsonl")).unwrap();

        // Simulate a crash mid-append: a partial line with no newline.
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join("versions.jsonl"))
            .unwrap();
        file.write_all(b"{\"version\":2,\"op\":\"fl").unwrap();
        drop(file);

        assert_eq!(log.last_version().unwrap(), 1);

        // The next append seals the torn tail and commits cleanly.
        log.append(&flush_entry(2, 2, "b.jsonl")).unwrap();
        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].version, 2);
    }

    #[test]
    fn test_non_monotonic_log_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let log = VersionLog::new(dir.path());
        log.append(&flush_entry(2, 1, "a.jsonl")).unwrap();
        log.append(&flush_entry(2, 2, "b.jsonl")).unwrap();
        assert!(matches!(log.read_all(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_live_set_folds_compaction() {
        let mut compact = VersionEntry::administrative(3, Operation::Compact, at(3));
        compact.segments_replaced = vec!["a.jsonl".into(), "b.jsonl".into()];
        compact.segments_added = vec![SegmentRef {
            partition: "p".into(),
            path: "c.jsonl".into(),
            rows: 2,
            bytes: 20,
        }];
        let entries = vec![
            flush_entry(1, 1, "a.jsonl"),
            flush_entry(2, 2, "b.jsonl"),
            compact,
        ];

        let before = live_set(&entries, Some(2));
        assert_eq!(before.len(), 2);

        let after = live_set(&entries, None);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].path, "c.jsonl");
    }

    #[test]
    fn test_resolve_as_of() {
        let entries = vec![flush_entry(1, 1, "a.jsonl"), flush_entry(2, 3, "b.jsonl")];
        assert_eq!(resolve_as_of(&entries, AsOf::Version(1)), Some(1));
        assert_eq!(resolve_as_of(&entries, AsOf::Version(99)), Some(2));
        assert_eq!(resolve_as_of(&entries, AsOf::Timestamp(at(2))), Some(1));
        assert_eq!(
            resolve_as_of(&entries, AsOf::Timestamp(at(1) - chrono::Duration::days(1))),
            None
        );
    }

    fn lww_schema(tie_break: Option<&str>) -> TableSchema {
        TableSchema {
            name: "t".into(),
            columns: vec![
                ColumnDef::new("symbol", ColumnType::Text),
                ColumnDef::new("seq", ColumnType::Int),
                ColumnDef::new("value", ColumnType::Int),
            ],
            key_columns: vec!["symbol".into()],
            tie_break: tie_break.map(String::from),
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

    #[test]
    fn test_fold_winners_greater_tie_break_wins() {
        let schema = lww_schema(Some("seq"));
        let mut winners = HashMap::new();
        fold_winners(
            &schema,
            vec![row("SPY", 2, 10), row("SPY", 1, 99)],
            &mut winners,
        );
        let winner = &winners[&vec![tickvault_core::Value::from("SPY")]];
        assert_eq!(winner.get("value"), Some(&tickvault_core::Value::Int(10)));
    }

    #[test]
    fn test_fold_winners_equal_tie_break_keeps_existing() {
        let schema = lww_schema(Some("seq"));
        let mut winners = HashMap::new();
        fold_winners(
            &schema,
            vec![row("SPY", 1, 10), row("SPY", 1, 20)],
            &mut winners,
        );
        let winner = &winners[&vec![tickvault_core::Value::from("SPY")]];
        assert_eq!(winner.get("value"), Some(&tickvault_core::Value::Int(10)));
    }

    #[test]
    fn test_fold_winners_no_tie_break_last_arrival_wins() {
        let schema = lww_schema(None);
        let mut winners = HashMap::new();
        fold_winners(
            &schema,
            vec![row("SPY", 1, 10), row("SPY", 2, 20)],
            &mut winners,
        );
        let winner = &winners[&vec![tickvault_core::Value::from("SPY")]];
        assert_eq!(winner.get("value"), Some(&tickvault_core::Value::Int(20)));
    }
}
