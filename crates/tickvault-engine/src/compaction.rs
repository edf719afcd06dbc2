//! Background segment compaction.
//!
//! Never on the write hot path: plans are built from a snapshot of the
//! committed live set, the merge rewrites segments without touching
//! logical content, and the commit re-checks the snapshot so a flush
//! that landed mid-merge aborts the compaction, not the flush.

use crate::error::{EngineError, EngineResult};
use crate::registry::SchemaRegistry;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tickvault_core::{Record, SegmentRef, TableSchema, VersionEntry};
use tickvault_store::{SegmentStore, StoreError};
use tracing::{debug, info, warn};

/// Thresholds that make a partition eligible for compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Merge when a partition holds more live segments than this.
    #[serde(default = "default_max_segments")]
    pub max_segments_per_partition: usize,
    /// Merge when mean live segment size falls below this (bytes).
    #[serde(default = "default_target_bytes")]
    pub target_segment_bytes: u64,
}

fn default_max_segments() -> usize {
    8
}

fn default_target_bytes() -> u64 {
    50 * 1024 * 1024
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_segments_per_partition: default_max_segments(),
            target_segment_bytes: default_target_bytes(),
        }
    }
}

/// A planned merge of one partition's live segments.
#[derive(Debug, Clone)]
pub struct CompactionPlan {
    pub partition: String,
    pub segments: Vec<SegmentRef>,
}

/// What one `compact_table` pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub partitions_compacted: usize,
    pub segments_merged: usize,
    /// Plans aborted by a concurrent commit; retried on the next pass.
    pub conflicts: usize,
    /// Superseded segment files deleted under the retention policy.
    pub segments_pruned: usize,
}

/// Plans and executes segment merges.
pub struct CompactionPlanner {
    store: Arc<dyn SegmentStore>,
    registry: Arc<SchemaRegistry>,
    config: CompactionConfig,
}

impl CompactionPlanner {
    #[must_use]
    pub fn new(
        store: Arc<dyn SegmentStore>,
        registry: Arc<SchemaRegistry>,
        config: CompactionConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Partitions worth merging, from a snapshot of the live set.
    pub fn plan(&self, table: &str) -> EngineResult<Vec<CompactionPlan>> {
        let mut by_partition: BTreeMap<String, Vec<SegmentRef>> = BTreeMap::new();
        for seg in self.store.live_segments(table, None)? {
            by_partition.entry(seg.partition.clone()).or_default().push(seg);
        }

        let mut plans = Vec::new();
        for (partition, segments) in by_partition {
            if segments.len() < 2 {
                continue;
            }
            let total_bytes: u64 = segments.iter().map(|s| s.bytes).sum();
            let mean = total_bytes / segments.len() as u64;
            if segments.len() > self.config.max_segments_per_partition
                || mean < self.config.target_segment_bytes
            {
                debug!(
                    table,
                    partition = %partition,
                    segments = segments.len(),
                    mean_bytes = mean,
                    "Partition eligible for compaction"
                );
                plans.push(CompactionPlan {
                    partition,
                    segments,
                });
            }
        }
        Ok(plans)
    }

    /// Execute one plan: merge-rewrite with row counts verified against
    /// the audit trail before and after.
    ///
    /// A count mismatch is an `AuditInconsistency`: the table's write
    /// halt latch is set and stays set until operator intervention. A
    /// concurrent commit since planning aborts with
    /// `CompactionConflict`, leaving live data untouched.
    pub fn execute_plan(
        &self,
        schema: &TableSchema,
        plan: &CompactionPlan,
    ) -> EngineResult<VersionEntry> {
        let expected_rows: u64 = plan.segments.iter().map(|s| s.rows).sum();

        let mut merged: Vec<Record> = Vec::new();
        for seg in &plan.segments {
            merged.extend(self.store.read_segment(&schema.name, seg)?);
        }

        if merged.len() as u64 != expected_rows {
            let reason = format!(
                "partition '{}': read {} rows, audit trail says {}",
                plan.partition,
                merged.len(),
                expected_rows
            );
            self.registry.halt(&schema.name, &reason);
            return Err(EngineError::AuditInconsistency {
                table: schema.name.clone(),
                reason,
            });
        }

        let replaced: Vec<String> = plan.segments.iter().map(|s| s.path.clone()).collect();
        let entry = match self.store.commit_compaction(
            schema,
            &plan.partition,
            &replaced,
            &merged,
        ) {
            Ok(entry) => entry,
            Err(StoreError::CommitConflict(msg)) => {
                return Err(EngineError::CompactionConflict(msg));
            }
            Err(e) => return Err(e.into()),
        };

        if entry.rows_written != expected_rows {
            let reason = format!(
                "partition '{}': rewrote {} rows, audit trail says {}",
                plan.partition, entry.rows_written, expected_rows
            );
            self.registry.halt(&schema.name, &reason);
            return Err(EngineError::AuditInconsistency {
                table: schema.name.clone(),
                reason,
            });
        }

        Ok(entry)
    }

    /// One full maintenance pass over a table: merge every eligible
    /// partition, then prune superseded segments past retention.
    pub fn compact_table(&self, table: &str) -> EngineResult<CompactionReport> {
        let handle = self.registry.get(table)?;
        if handle.is_halted() {
            return Err(EngineError::WritesHalted(table.to_string()));
        }
        let schema = handle.schema();

        let mut report = CompactionReport::default();
        for plan in self.plan(table)? {
            match self.execute_plan(&schema, &plan) {
                Ok(_) => {
                    report.partitions_compacted += 1;
                    report.segments_merged += plan.segments.len();
                }
                Err(EngineError::CompactionConflict(msg)) => {
                    warn!(table, partition = %plan.partition, %msg, "Compaction rescheduled");
                    report.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        report.segments_pruned = self.store.prune_superseded(&schema, Utc::now())?;
        if report != CompactionReport::default() {
            info!(
                table,
                partitions = report.partitions_compacted,
                merged = report.segments_merged,
                conflicts = report.conflicts,
                pruned = report.segments_pruned,
                "Compaction pass complete"
            );
        }
        Ok(report)
    }
}
