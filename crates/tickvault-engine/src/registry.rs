//! Table registry.
//!
//! Holds every defined table's schema, lifecycle state, and write-halt
//! latch, and performs the explicit state transitions
//! Created -> Active -> Deprecated. Schema changes go through
//! `migrate`, which commits a new schema snapshot to the version log.

use crate::error::{EngineError, EngineResult};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tickvault_core::{ColumnDef, Operation, TableSchema, TableState};
use tickvault_store::SegmentStore;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Shared per-table state.
#[derive(Debug)]
pub struct TableHandle {
    schema: RwLock<TableSchema>,
    state: RwLock<TableState>,
    /// Sticky write-halt latch, set on AuditInconsistency. Cleared only
    /// by explicit operator action.
    halted: AtomicBool,
    /// Serializes flushes: at most one in-flight flush per table.
    pub(crate) flush_lock: Mutex<()>,
}

impl TableHandle {
    fn new(schema: TableSchema, state: TableState) -> Self {
        Self {
            schema: RwLock::new(schema),
            state: RwLock::new(state),
            halted: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn schema(&self) -> TableSchema {
        self.schema.read().clone()
    }

    #[must_use]
    pub fn state(&self) -> TableState {
        *self.state.read()
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }
}

/// Registry of defined tables.
pub struct SchemaRegistry {
    store: Arc<dyn SegmentStore>,
    tables: DashMap<String, Arc<TableHandle>>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn SegmentStore>) -> Self {
        Self {
            store,
            tables: DashMap::new(),
        }
    }

    /// Rebuild the registry from the durable store: schema is the last
    /// committed snapshot, state is the fold of lifecycle entries.
    pub fn recover(store: Arc<dyn SegmentStore>) -> EngineResult<Self> {
        let registry = Self::new(store.clone());
        for table in store.list_tables()? {
            let entries = store.list_versions(&table)?;
            let Some(schema) = entries.iter().filter_map(|e| e.schema.clone()).last() else {
                warn!(table = %table, "Skipping table with no schema snapshot");
                continue;
            };
            let mut state = TableState::Created;
            for entry in &entries {
                match entry.op {
                    Operation::Activate => state = TableState::Active,
                    Operation::Deprecate => state = TableState::Deprecated,
                    _ => {}
                }
            }
            info!(table = %table, ?state, "Recovered table");
            registry
                .tables
                .insert(table, Arc::new(TableHandle::new(schema, state)));
        }
        Ok(registry)
    }

    /// Define a new table. Validates the schema, commits the Create
    /// entry, registers the handle in Created state.
    pub fn define(&self, schema: TableSchema) -> EngineResult<Arc<TableHandle>> {
        schema.validate()?;
        if self.tables.contains_key(&schema.name) {
            return Err(tickvault_store::StoreError::TableExists(schema.name.clone()).into());
        }
        self.store.create_table(&schema)?;

        let handle = Arc::new(TableHandle::new(schema.clone(), TableState::Created));
        self.tables.insert(schema.name.clone(), handle.clone());
        Ok(handle)
    }

    pub fn get(&self, table: &str) -> EngineResult<Arc<TableHandle>> {
        self.tables
            .get(table)
            .map(|h| h.value().clone())
            .ok_or_else(|| EngineError::UnknownTable(table.to_string()))
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Created -> Active.
    pub fn activate(&self, table: &str) -> EngineResult<()> {
        self.transition(table, TableState::Active, Operation::Activate)
    }

    /// Active -> Deprecated (read-only).
    pub fn deprecate(&self, table: &str) -> EngineResult<()> {
        self.transition(table, TableState::Deprecated, Operation::Deprecate)
    }

    fn transition(&self, table: &str, next: TableState, op: Operation) -> EngineResult<()> {
        let handle = self.get(table)?;
        let current = handle.state();
        if !current.can_transition_to(next) {
            return Err(EngineError::NotWritable {
                table: table.to_string(),
                state: current,
            });
        }
        self.store.append_admin(table, op)?;
        *handle.state.write() = next;
        info!(table, ?next, "Table state transition");
        Ok(())
    }

    /// Additive schema migration: append the given columns and commit a
    /// Migrate entry with the new snapshot. Existing columns, keys,
    /// tie-break and partition rule are untouched; historical segments
    /// stay readable (absent columns simply read as missing).
    pub fn migrate(&self, table: &str, added: Vec<ColumnDef>) -> EngineResult<TableSchema> {
        let handle = self.get(table)?;
        if added.is_empty() {
            return Err(tickvault_core::CoreError::Configuration(
                "migration adds no columns".into(),
            )
            .into());
        }

        let mut next = handle.schema();
        for col in added {
            if next.column(&col.name).is_some() {
                return Err(tickvault_core::CoreError::Configuration(format!(
                    "table '{table}': column '{}' already exists",
                    col.name
                ))
                .into());
            }
            next.columns.push(col);
        }
        next.validate()?;

        self.store.append_migration(&next)?;
        *handle.schema.write() = next.clone();
        info!(table, columns = next.columns.len(), "Migrated schema");
        Ok(next)
    }

    /// Latch writes shut for a table. Used when an audit check fails;
    /// only `clear_halt` (manual intervention) re-opens the table.
    pub fn halt(&self, table: &str, reason: &str) {
        if let Ok(handle) = self.get(table) {
            handle.halted.store(true, Ordering::Release);
            error!(table, reason, "WRITES HALTED");
        }
    }

    pub fn clear_halt(&self, table: &str) -> EngineResult<()> {
        let handle = self.get(table)?;
        handle.halted.store(false, Ordering::Release);
        warn!(table, "Write halt cleared by operator");
        Ok(())
    }

    /// Reject writes for halted or non-writable tables.
    pub fn check_writable(&self, table: &str) -> EngineResult<Arc<TableHandle>> {
        let handle = self.get(table)?;
        if handle.is_halted() {
            return Err(EngineError::WritesHalted(table.to_string()));
        }
        let state = handle.state();
        if !state.is_writable() {
            return Err(EngineError::NotWritable {
                table: table.to_string(),
                state,
            });
        }
        Ok(handle)
    }
}
