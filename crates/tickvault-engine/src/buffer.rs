//! Batch buffering with double-buffered generations.
//!
//! Appends go to the active generation under a short lock; `take_batch`
//! swaps in a fresh generation, so appends arriving during a flush land
//! in the next batch and are never lost or blocked on store I/O.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tickvault_core::{CoreResult, Record, TableSchema};

/// Flush-trigger thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Flush when the buffer reaches this many records.
    #[serde(default = "default_max_count")]
    pub max_count: usize,
    /// Flush when the oldest buffered record is this old (ms).
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,
}

fn default_max_count() -> usize {
    100
}

fn default_max_age_ms() -> u64 {
    60_000
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_count: default_max_count(),
            max_age_ms: default_max_age_ms(),
        }
    }
}

/// One buffer generation; exclusively owned by the flush that takes it.
#[derive(Debug, Default)]
struct Generation {
    records: Vec<Record>,
    oldest: Option<Instant>,
}

/// Per-table record buffer.
pub struct BatchBuffer {
    config: BufferConfig,
    active: Mutex<Generation>,
}

impl BatchBuffer {
    #[must_use]
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            active: Mutex::new(Generation::default()),
        }
    }

    /// Validate and buffer one record.
    ///
    /// Returns `true` when the size trigger fired and the caller should
    /// flush. Schema violations surface synchronously and buffer nothing.
    pub fn append(&self, schema: &TableSchema, record: Record) -> CoreResult<bool> {
        record.validate_against(schema)?;

        let mut gen = self.active.lock();
        if gen.records.is_empty() {
            gen.oldest = Some(Instant::now());
        }
        gen.records.push(record);
        Ok(gen.records.len() >= self.config.max_count)
    }

    /// Whether either flush trigger (size or age) has fired.
    #[must_use]
    pub fn needs_flush(&self) -> bool {
        let gen = self.active.lock();
        if gen.records.is_empty() {
            return false;
        }
        if gen.records.len() >= self.config.max_count {
            return true;
        }
        gen.oldest
            .map(|t| t.elapsed() >= Duration::from_millis(self.config.max_age_ms))
            .unwrap_or(false)
    }

    /// Swap the active generation for a fresh one and hand the old one
    /// to the caller, which then exclusively owns it.
    #[must_use]
    pub fn take_batch(&self) -> Vec<Record> {
        let mut gen = self.active.lock();
        let taken = std::mem::take(&mut *gen);
        taken.records
    }

    /// Return a failed flush's batch, ahead of anything appended since,
    /// so arrival order is preserved for the next attempt.
    pub fn requeue(&self, mut records: Vec<Record>) {
        if records.is_empty() {
            return;
        }
        let mut gen = self.active.lock();
        records.append(&mut gen.records);
        gen.records = records;
        // The requeued records predate everything buffered since.
        gen.oldest = Some(gen.oldest.take().unwrap_or_else(Instant::now));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.active.lock().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
