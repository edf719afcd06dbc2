//! Partition assignment.
//!
//! The partition value is a pure function of record fields, so a retried
//! flush reassigns identical partitions. The rule itself was vetted at
//! table-definition time; the remaining runtime duty is the cardinality
//! ceiling on distinct active partitions.

use crate::error::{EngineError, EngineResult};
use std::collections::{BTreeMap, HashSet};
use tickvault_core::{CoreError, PartitionRule, Record, TableSchema, Value};

/// Derive the partition value for one record.
///
/// The record has already passed schema validation, so the rule's input
/// column is present and correctly typed; a miss here means the caller
/// skipped validation.
pub fn partition_value(schema: &TableSchema, record: &Record) -> EngineResult<String> {
    match &schema.partition_rule {
        PartitionRule::Single => Ok("all".to_string()),
        PartitionRule::DateFromTimestamp { column } => match record.get(column) {
            Some(Value::Timestamp(ts)) => Ok(ts.format("%Y-%m-%d").to_string()),
            _ => Err(CoreError::SchemaViolation(format!(
                "table '{}': partition input '{}' missing or not a timestamp",
                schema.name, column
            ))
            .into()),
        },
        PartitionRule::ByColumn { column } => match record.get(column) {
            Some(value) => Ok(value.to_string()),
            None => Err(CoreError::SchemaViolation(format!(
                "table '{}': partition input '{}' missing",
                schema.name, column
            ))
            .into()),
        },
    }
}

/// Group records by partition value, preserving arrival order within
/// each partition. BTreeMap keys give a deterministic partition order.
pub fn assign(
    schema: &TableSchema,
    records: Vec<Record>,
) -> EngineResult<BTreeMap<String, Vec<Record>>> {
    let mut grouped: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    for record in records {
        let partition = partition_value(schema, &record)?;
        grouped.entry(partition).or_default().push(record);
    }
    Ok(grouped)
}

/// Enforce the ceiling on distinct active partition values. Called with
/// the partitions already durable plus the ones this flush introduces,
/// before anything is staged.
pub fn check_cardinality(
    schema: &TableSchema,
    existing: &HashSet<String>,
    incoming: impl IntoIterator<Item = impl AsRef<str>>,
) -> EngineResult<()> {
    let mut distinct = existing.clone();
    for partition in incoming {
        distinct.insert(partition.as_ref().to_string());
    }
    if distinct.len() > schema.max_partitions {
        return Err(EngineError::Core(CoreError::Configuration(format!(
            "table '{}': {} distinct partitions exceeds ceiling {}",
            schema.name,
            distinct.len(),
            schema.max_partitions
        ))));
    }
    Ok(())
}
