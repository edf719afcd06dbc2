//! Immutable JSON Lines segment files.
//!
//! Each segment is one flush's records for one partition, one JSON object
//! per line. JSON Lines keeps segments robust: a torn write damages only
//! the affected line, and staged files that never reach the version log
//! are invisible to readers.

use crate::error::{StoreError, StoreResult};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tickvault_core::Record;
use tracing::debug;

/// Write a fully-formed segment file, truncating any orphan left behind
/// by an earlier failed commit of the same version.
///
/// Returns (rows, bytes) as recorded in the version log.
pub fn write_segment(path: &Path, records: &[Record]) -> StoreResult<(u64, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let mut bytes: u64 = 0;

    for record in records {
        let line = serde_json::to_string(record)?;
        bytes += line.len() as u64 + 1;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;

    debug!(path = %path.display(), rows = records.len(), bytes, "Wrote segment");
    Ok((records.len() as u64, bytes))
}

/// Read a committed segment.
///
/// Committed segments are written whole before the commit point, so any
/// malformed line here is real corruption, not a torn tail.
pub fn read_segment(path: &Path) -> StoreResult<Vec<Record>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line).map_err(|e| {
            StoreError::Corrupt(format!(
                "segment {}: bad line {}: {e}",
                path.display(),
                idx + 1
            ))
        })?;
        records.push(record);
    }

    Ok(records)
}
