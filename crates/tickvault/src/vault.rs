//! The vault: everything wired together.
//!
//! `Vault` owns the store handle, the table registry, one batch buffer
//! per table, the write coordinator and the compaction planner, and
//! exposes the four external surfaces: ingestion, query, audit, and
//! maintenance hooks.

use crate::config::VaultConfig;
use crate::error::VaultResult;
use crate::metrics;
use dashmap::DashMap;
use std::sync::Arc;
use tickvault_core::{ColumnDef, Record, TableSchema, VersionEntry};
use tickvault_engine::{
    BatchBuffer, CompactionPlanner, CompactionReport, FlushOutcome, SchemaRegistry,
    WriteCoordinator,
};
use tickvault_store::{
    diff_versions, read_as_of, read_latest, AsOf, FsStore, PartitionFilter, RowDelta,
    SegmentStore,
};
use tracing::{info, warn};

/// Result of one `ingest` call.
#[derive(Debug, Default)]
pub struct IngestSummary {
    /// Records accepted into the buffer.
    pub accepted: usize,
    /// Flushes triggered by the size threshold during this call.
    pub flushes: Vec<FlushOutcome>,
}

/// An open tickvault instance.
pub struct Vault {
    config: VaultConfig,
    store: Arc<dyn SegmentStore>,
    registry: Arc<SchemaRegistry>,
    coordinator: WriteCoordinator,
    compactor: CompactionPlanner,
    buffers: DashMap<String, Arc<BatchBuffer>>,
}

impl Vault {
    /// Open (or initialize) a vault at `config.data_dir`, recover any
    /// tables already on disk, and define the tables the config adds.
    pub fn open(config: VaultConfig) -> VaultResult<Self> {
        let store: Arc<dyn SegmentStore> = Arc::new(FsStore::open(&config.data_dir)?);
        Self::with_store(config, store)
    }

    /// Open against an injected store handle. This is how tests swap in
    /// failure-injecting doubles; `open` is the production path.
    pub fn with_store(config: VaultConfig, store: Arc<dyn SegmentStore>) -> VaultResult<Self> {
        let registry = Arc::new(SchemaRegistry::recover(store.clone())?);

        for schema in &config.tables {
            if registry.get(&schema.name).is_ok() {
                continue;
            }
            registry.define(schema.clone())?;
            registry.activate(&schema.name)?;
            info!(table = %schema.name, "Defined table from config");
        }

        let coordinator =
            WriteCoordinator::new(store.clone(), registry.clone(), config.retry.clone())?;
        let compactor = CompactionPlanner::new(
            store.clone(),
            registry.clone(),
            config.compaction.clone(),
        );

        Ok(Self {
            config,
            store,
            registry,
            coordinator,
            compactor,
            buffers: DashMap::new(),
        })
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.registry.table_names()
    }

    fn buffer(&self, table: &str) -> Arc<BatchBuffer> {
        self.buffers
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(BatchBuffer::new(self.config.buffer.clone())))
            .clone()
    }

    // ------------------------------------------------------------------
    // Admin surface
    // ------------------------------------------------------------------

    /// Define and activate a new table.
    pub fn define_table(&self, schema: TableSchema) -> VaultResult<()> {
        let name = schema.name.clone();
        self.registry.define(schema)?;
        self.registry.activate(&name)?;
        Ok(())
    }

    /// Make a table read-only. Buffered records are flushed first so
    /// nothing is stranded.
    pub async fn deprecate_table(&self, table: &str) -> VaultResult<()> {
        self.flush_now(table).await?;
        self.registry.deprecate(table)?;
        Ok(())
    }

    /// Additive schema migration.
    pub fn migrate_table(&self, table: &str, added: Vec<ColumnDef>) -> VaultResult<TableSchema> {
        Ok(self.registry.migrate(table, added)?)
    }

    /// Re-open a table halted by an audit inconsistency. Operator-only.
    pub fn clear_halt(&self, table: &str) -> VaultResult<()> {
        Ok(self.registry.clear_halt(table)?)
    }

    // ------------------------------------------------------------------
    // Ingestion surface
    // ------------------------------------------------------------------

    /// Submit records for a table. Schema violations reject the record
    /// synchronously; valid records buffer, and the size trigger flushes
    /// inline.
    pub async fn ingest(&self, table: &str, records: Vec<Record>) -> VaultResult<IngestSummary> {
        let handle = self.registry.check_writable(table)?;
        let schema = handle.schema();
        let buffer = self.buffer(table);

        let mut summary = IngestSummary::default();
        for record in records {
            let size_trigger = buffer.append(&schema, record)?;
            summary.accepted += 1;
            if size_trigger {
                summary.flushes.push(self.flush_now(table).await?);
            }
        }
        metrics::BUFFERED_RECORDS
            .with_label_values(&[table])
            .set(buffer.len() as i64);
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Maintenance hooks
    // ------------------------------------------------------------------

    /// Flush whatever the table has buffered, now. On failure the batch
    /// is requeued and the error surfaces to the caller; nothing is
    /// dropped.
    pub async fn flush_now(&self, table: &str) -> VaultResult<FlushOutcome> {
        let buffer = self.buffer(table);
        let batch = buffer.take_batch();

        match self.coordinator.execute_flush(table, &batch).await {
            Ok(outcome) => {
                let label = if outcome.version.is_some() {
                    "committed"
                } else {
                    "noop"
                };
                metrics::FLUSHES_TOTAL.with_label_values(&[table, label]).inc();
                metrics::ROWS_WRITTEN_TOTAL
                    .with_label_values(&[table])
                    .inc_by(outcome.rows_written as f64);
                metrics::DUPLICATES_DROPPED_TOTAL
                    .with_label_values(&[table])
                    .inc_by(outcome.duplicates_dropped as f64);
                metrics::BUFFERED_RECORDS
                    .with_label_values(&[table])
                    .set(buffer.len() as i64);
                Ok(outcome)
            }
            Err(e) => {
                metrics::FLUSHES_TOTAL
                    .with_label_values(&[table, "failed"])
                    .inc();
                warn!(table, error = %e, retained = batch.len(), "Flush failed, batch retained");
                buffer.requeue(batch);
                Err(e.into())
            }
        }
    }

    /// Flush every table whose size or age trigger has fired. Returns
    /// per-table outcomes; a failing table does not stop the others.
    pub async fn flush_due(&self) -> Vec<(String, VaultResult<FlushOutcome>)> {
        let mut results = Vec::new();
        for table in self.registry.table_names() {
            let due = self
                .buffers
                .get(&table)
                .map(|b| b.needs_flush())
                .unwrap_or(false);
            if due {
                let result = self.flush_now(&table).await;
                results.push((table, result));
            }
        }
        results
    }

    /// Run one compaction pass over a table.
    pub fn compact_now(&self, table: &str) -> VaultResult<CompactionReport> {
        let report = self.compactor.compact_table(table)?;
        metrics::COMPACTIONS_TOTAL
            .with_label_values(&[table, "compacted"])
            .inc_by(report.partitions_compacted as f64);
        metrics::COMPACTIONS_TOTAL
            .with_label_values(&[table, "conflict"])
            .inc_by(report.conflicts as f64);
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Query surface
    // ------------------------------------------------------------------

    /// Latest committed state, optionally pruned to a partition range.
    pub fn latest(&self, table: &str, filter: &PartitionFilter) -> VaultResult<Vec<Record>> {
        let schema = self.registry.get(table)?.schema();
        Ok(read_latest(&*self.store, &schema, filter)?)
    }

    /// State visible at a version or timestamp.
    pub fn read_as_of(&self, table: &str, as_of: AsOf) -> VaultResult<Vec<Record>> {
        let schema = self.registry.get(table)?.schema();
        Ok(read_as_of(&*self.store, &schema, as_of)?)
    }

    // ------------------------------------------------------------------
    // Audit surface
    // ------------------------------------------------------------------

    /// Ordered committed history.
    pub fn versions(&self, table: &str) -> VaultResult<Vec<VersionEntry>> {
        self.registry.get(table)?;
        Ok(self.store.list_versions(table)?)
    }

    /// Row-level deltas between two committed versions.
    pub fn diff(&self, table: &str, older: u64, newer: u64) -> VaultResult<Vec<RowDelta>> {
        let schema = self.registry.get(table)?.schema();
        Ok(diff_versions(&*self.store, &schema, older, newer)?)
    }
}
