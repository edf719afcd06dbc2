//! Flush orchestration.
//!
//! `execute_flush` runs the full pipeline for one table:
//! partition assignment -> dedup -> anti-join -> atomic commit, with
//! bounded retry around the store I/O. Flushes are serialized per table
//! and independent across tables.

use crate::dedup;
use crate::error::{EngineError, EngineResult};
use crate::partition;
use crate::registry::SchemaRegistry;
use crate::retry::RetryPolicy;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tickvault_core::{KeyTuple, Record, TableSchema};
use tickvault_store::{SegmentStore, StagedPartition};
use tracing::{info, warn};

/// Result of one flush call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Version committed; `None` for a no-op flush (everything was a
    /// duplicate), which consumes no version number.
    pub version: Option<u64>,
    pub rows_written: u64,
    pub duplicates_dropped: u64,
    pub partitions: Vec<String>,
}

impl FlushOutcome {
    fn noop(duplicates_dropped: u64) -> Self {
        Self {
            version: None,
            rows_written: 0,
            duplicates_dropped,
            partitions: Vec::new(),
        }
    }
}

/// Coordinates deduplicated, atomic, retried flushes.
pub struct WriteCoordinator {
    store: Arc<dyn SegmentStore>,
    registry: Arc<SchemaRegistry>,
    policy: RetryPolicy,
}

impl WriteCoordinator {
    pub fn new(
        store: Arc<dyn SegmentStore>,
        registry: Arc<SchemaRegistry>,
        policy: RetryPolicy,
    ) -> EngineResult<Self> {
        policy.validate()?;
        Ok(Self {
            store,
            registry,
            policy,
        })
    }

    /// Flush one table's candidates as a single atomic commit.
    ///
    /// Candidates are borrowed: on FlushFailure the caller still owns the
    /// batch and requeues it, so nothing is dropped silently.
    pub async fn execute_flush(
        &self,
        table: &str,
        candidates: &[Record],
    ) -> EngineResult<FlushOutcome> {
        let handle = self.registry.check_writable(table)?;
        // One in-flight flush per table; other tables proceed in parallel.
        let _serial = handle.flush_lock.lock().await;

        if candidates.is_empty() {
            return Ok(FlushOutcome::noop(0));
        }
        let schema = handle.schema();

        // The pure phases run once; their outputs are reused verbatim by
        // every attempt, so partition assignment is stable across retries.
        let intra = dedup::dedup_batch(&schema, candidates.to_vec());
        let intra_dropped = intra.duplicates_dropped;
        let grouped = partition::assign(&schema, intra.survivors)?;
        let partitions: Vec<String> = grouped.keys().cloned().collect();
        let keys: HashSet<KeyTuple> = grouped
            .values()
            .flatten()
            .map(|r| r.key_tuple(&schema))
            .collect();

        let mut attempt = 1u32;
        loop {
            let result = self
                .run_attempt(&schema, &grouped, &partitions, &keys, intra_dropped)
                .await;

            let last_error = match result {
                Ok(outcome) => {
                    info!(
                        table,
                        version = ?outcome.version,
                        rows = outcome.rows_written,
                        duplicates = outcome.duplicates_dropped,
                        attempt,
                        "Flush complete"
                    );
                    return Ok(outcome);
                }
                // Planner and schema failures are deterministic; retrying
                // cannot change them.
                Err(e @ EngineError::Core(_)) => return Err(e),
                Err(e) => e.to_string(),
            };

            if attempt >= self.policy.max_attempts {
                warn!(table, attempts = attempt, error = %last_error, "Flush budget exhausted");
                return Err(EngineError::FlushFailure {
                    attempts: attempt,
                    last_error,
                });
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                table,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Flush attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// One attempt: anti-join re-check plus commit, under the per-attempt
    /// deadline. The store I/O runs on the blocking pool; a deadline that
    /// fires cannot abort it, but the version-log commit point keeps
    /// either outcome consistent and the next attempt's anti-join
    /// excludes anything that did land.
    async fn run_attempt(
        &self,
        schema: &TableSchema,
        grouped: &BTreeMap<String, Vec<Record>>,
        partitions: &[String],
        keys: &HashSet<KeyTuple>,
        intra_dropped: u64,
    ) -> EngineResult<FlushOutcome> {
        let store = self.store.clone();
        let schema = schema.clone();
        let grouped = grouped.clone();
        let partitions = partitions.to_vec();
        let keys = keys.clone();

        let task = tokio::task::spawn_blocking(move || {
            commit_attempt(&*store, &schema, grouped, &partitions, &keys, intra_dropped)
        });

        match tokio::time::timeout(self.policy.attempt_timeout(), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(EngineError::Store(tickvault_store::StoreError::Unavailable(
                format!("commit task failed: {join}"),
            ))),
            Err(_) => Err(EngineError::Store(tickvault_store::StoreError::Unavailable(
                format!(
                    "attempt deadline of {} ms exceeded",
                    self.policy.attempt_timeout_ms
                ),
            ))),
        }
    }
}

/// The blocking body of one attempt.
fn commit_attempt(
    store: &dyn SegmentStore,
    schema: &TableSchema,
    grouped: BTreeMap<String, Vec<Record>>,
    partitions: &[String],
    keys: &HashSet<KeyTuple>,
    intra_dropped: u64,
) -> EngineResult<FlushOutcome> {
    // Cardinality ceiling over already-durable partitions plus this
    // flush's, checked before anything is staged.
    let existing: HashSet<String> = store
        .live_segments(&schema.name, None)?
        .into_iter()
        .map(|seg| seg.partition)
        .collect();
    partition::check_cardinality(schema, &existing, partitions.iter())?;

    // Bounded anti-join lookup: only the candidate keys, only the
    // touched partitions.
    let stored = store.lookup_keys(schema, partitions, keys)?;

    let mut duplicates_dropped = intra_dropped;
    let mut staged = Vec::with_capacity(grouped.len());
    for (partition, records) in grouped {
        let out = dedup::anti_join(schema, records, &stored);
        duplicates_dropped += out.duplicates_dropped;
        if !out.survivors.is_empty() {
            staged.push(StagedPartition {
                partition,
                records: out.survivors,
            });
        }
    }

    // Everything was already durable: succeed without consuming a
    // version. This is what makes blind re-delivery idempotent.
    if staged.is_empty() {
        return Ok(FlushOutcome::noop(duplicates_dropped));
    }

    let entry = store.commit_flush(schema, staged, duplicates_dropped)?;
    Ok(FlushOutcome {
        version: Some(entry.version),
        rows_written: entry.rows_written,
        duplicates_dropped,
        partitions: entry.partitions,
    })
}
