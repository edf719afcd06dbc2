//! Table definitions.
//!
//! A `TableSchema` is frozen once defined; schema changes go through an
//! explicit migration that produces a new snapshot in the version log,
//! never an in-place mutation.

use crate::error::{CoreError, CoreResult};
use crate::value::ColumnType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default ceiling on distinct active partition values per table.
pub const MAX_PARTITIONS_DEFAULT: usize = 1000;

/// One declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// How a record's partition value is derived.
///
/// The derivation must be a pure function of record fields so retried
/// flushes assign identical partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum PartitionRule {
    /// Everything lands in one partition.
    Single,
    /// UTC calendar date (`YYYY-MM-DD`) of a timestamp column.
    DateFromTimestamp { column: String },
    /// The column value itself, for low-cardinality columns.
    ByColumn { column: String },
}

impl PartitionRule {
    /// Column the rule reads, if any.
    #[must_use]
    pub fn input_column(&self) -> Option<&str> {
        match self {
            PartitionRule::Single => None,
            PartitionRule::DateFromTimestamp { column } | PartitionRule::ByColumn { column } => {
                Some(column)
            }
        }
    }
}

/// Retention for segments superseded by compaction.
///
/// `None` keeps superseded segments forever (full point-in-time history).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default)]
    pub superseded_max_age_days: Option<u32>,
}

/// Table lifecycle state.
///
/// Transitions are explicit admin actions, never failure side effects:
/// Created -> Active -> Deprecated (read-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableState {
    Created,
    Active,
    Deprecated,
}

impl TableState {
    /// Whether `next` is a legal transition from `self`.
    #[must_use]
    pub fn can_transition_to(&self, next: TableState) -> bool {
        matches!(
            (self, next),
            (TableState::Created, TableState::Active)
                | (TableState::Active, TableState::Deprecated)
        )
    }

    /// Whether the table accepts writes in this state.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        matches!(self, TableState::Active)
    }
}

/// Full table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Natural business key; identifies the latest logical record.
    pub key_columns: Vec<String>,
    /// Column deciding which of two same-key records wins.
    /// `None` means last-arrival wins within a batch.
    #[serde(default)]
    pub tie_break: Option<String>,
    pub partition_rule: PartitionRule,
    #[serde(default)]
    pub retention: RetentionPolicy,
    /// Ceiling on distinct active partition values.
    #[serde(default = "default_max_partitions")]
    pub max_partitions: usize,
}

fn default_max_partitions() -> usize {
    MAX_PARTITIONS_DEFAULT
}

impl TableSchema {
    /// Look up a declared column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Validate the definition. Called once at table-definition time;
    /// any failure here is a `Configuration` error and the table is
    /// never registered.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::Configuration("table name is empty".into()));
        }
        // Table names become directory names.
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        {
            return Err(CoreError::Configuration(format!(
                "table name '{}' contains characters outside [A-Za-z0-9_-]",
                self.name
            )));
        }
        if self.columns.is_empty() {
            return Err(CoreError::Configuration(format!(
                "table '{}' declares no columns",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for col in &self.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(CoreError::Configuration(format!(
                    "table '{}': duplicate column '{}'",
                    self.name, col.name
                )));
            }
        }

        if self.key_columns.is_empty() {
            return Err(CoreError::Configuration(format!(
                "table '{}' declares no key columns",
                self.name
            )));
        }
        for key in &self.key_columns {
            let col = self.column(key).ok_or_else(|| {
                CoreError::Configuration(format!(
                    "table '{}': key column '{}' is not declared",
                    self.name, key
                ))
            })?;
            if !col.ty.is_orderable() {
                return Err(CoreError::Configuration(format!(
                    "table '{}': key column '{}' has type {}, which cannot key records",
                    self.name, key, col.ty
                )));
            }
        }

        if let Some(tb) = &self.tie_break {
            let col = self.column(tb).ok_or_else(|| {
                CoreError::Configuration(format!(
                    "table '{}': tie-break column '{}' is not declared",
                    self.name, tb
                ))
            })?;
            if !col.ty.is_orderable() {
                return Err(CoreError::Configuration(format!(
                    "table '{}': tie-break column '{}' has type {}, which has no total order",
                    self.name, tb, col.ty
                )));
            }
        }

        self.validate_partition_rule()?;

        if self.max_partitions == 0 {
            return Err(CoreError::Configuration(format!(
                "table '{}': max_partitions must be positive",
                self.name
            )));
        }

        Ok(())
    }

    /// Reject partition rules whose derived key cardinality is unbounded.
    fn validate_partition_rule(&self) -> CoreResult<()> {
        match &self.partition_rule {
            PartitionRule::Single => Ok(()),
            PartitionRule::DateFromTimestamp { column } => {
                let col = self.column(column).ok_or_else(|| {
                    CoreError::Configuration(format!(
                        "table '{}': partition column '{}' is not declared",
                        self.name, column
                    ))
                })?;
                if col.ty != ColumnType::Timestamp {
                    return Err(CoreError::Configuration(format!(
                        "table '{}': date partition rule needs a timestamp column, '{}' is {}",
                        self.name, column, col.ty
                    )));
                }
                Ok(())
            }
            PartitionRule::ByColumn { column } => {
                let col = self.column(column).ok_or_else(|| {
                    CoreError::Configuration(format!(
                        "table '{}': partition column '{}' is not declared",
                        self.name, column
                    ))
                })?;
                match col.ty {
                    ColumnType::Int | ColumnType::Text | ColumnType::Bool => Ok(()),
                    ColumnType::Float | ColumnType::Decimal | ColumnType::Timestamp => {
                        Err(CoreError::Configuration(format!(
                            "table '{}': column '{}' ({}) is too high-cardinality to partition by",
                            self.name, column, col.ty
                        )))
                    }
                }
            }
        }
    }
}
