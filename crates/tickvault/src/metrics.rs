//! Prometheus metrics for the write and maintenance paths.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally: a registration
//! failure means duplicate metric names, which should crash at startup
//! rather than fail silently. These panics only occur during static
//! initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_int_gauge_vec, CounterVec, IntGaugeVec,
};

/// Committed flushes per table and outcome (committed/noop/failed).
pub static FLUSHES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickvault_flushes_total",
        "Flush executions per table and outcome",
        &["table", "outcome"]
    )
    .unwrap()
});

/// Rows durably written per table.
pub static ROWS_WRITTEN_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickvault_rows_written_total",
        "Rows durably committed per table",
        &["table"]
    )
    .unwrap()
});

/// Duplicates dropped by dedup per table.
pub static DUPLICATES_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickvault_duplicates_dropped_total",
        "Records dropped as duplicates per table",
        &["table"]
    )
    .unwrap()
});

/// Records currently buffered per table.
pub static BUFFERED_RECORDS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "tickvault_buffered_records",
        "Records waiting in the batch buffer",
        &["table"]
    )
    .unwrap()
});

/// Compaction passes per table and outcome (compacted/conflict).
pub static COMPACTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickvault_compactions_total",
        "Partition compactions per table and outcome",
        &["table", "outcome"]
    )
    .unwrap()
});
