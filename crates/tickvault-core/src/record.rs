//! Typed records and schema validation.

use crate::error::{CoreError, CoreResult};
use crate::schema::TableSchema;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The values of a table's key columns, in declaration order.
pub type KeyTuple = Vec<Value>;

/// One logical record: a field map validated against a `TableSchema`.
///
/// BTreeMap keeps serialized field order stable, so identical logical
/// records produce identical segment lines.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate this record against a schema.
    ///
    /// Rules:
    /// - no undeclared fields
    /// - every present field matches its declared type
    /// - every key column is present
    /// - the partition-rule input column is present
    /// - the tie-break column, if declared, is present
    ///
    /// Violations are synchronous; a record failing here is never buffered.
    pub fn validate_against(&self, schema: &TableSchema) -> CoreResult<()> {
        for (name, value) in &self.fields {
            let col = schema.column(name).ok_or_else(|| {
                CoreError::SchemaViolation(format!(
                    "table '{}': field '{}' is not declared",
                    schema.name, name
                ))
            })?;
            if !value.matches(col.ty) {
                return Err(CoreError::SchemaViolation(format!(
                    "table '{}': field '{}' expects {}, got {}",
                    schema.name,
                    name,
                    col.ty,
                    value.column_type()
                )));
            }
        }

        for key in &schema.key_columns {
            if !self.fields.contains_key(key) {
                return Err(CoreError::SchemaViolation(format!(
                    "table '{}': key column '{}' is missing",
                    schema.name, key
                )));
            }
        }

        if let Some(input) = schema.partition_rule.input_column() {
            if !self.fields.contains_key(input) {
                return Err(CoreError::SchemaViolation(format!(
                    "table '{}': partition input column '{}' is missing",
                    schema.name, input
                )));
            }
        }

        if let Some(tb) = &schema.tie_break {
            if !self.fields.contains_key(tb) {
                return Err(CoreError::SchemaViolation(format!(
                    "table '{}': tie-break column '{}' is missing",
                    schema.name, tb
                )));
            }
        }

        Ok(())
    }

    /// Extract the key tuple in key-column declaration order.
    ///
    /// Only meaningful after `validate_against` succeeded.
    #[must_use]
    pub fn key_tuple(&self, schema: &TableSchema) -> KeyTuple {
        schema
            .key_columns
            .iter()
            .filter_map(|k| self.fields.get(k).cloned())
            .collect()
    }

    /// The declared tie-break value, if the table has one.
    #[must_use]
    pub fn tie_break_value(&self, schema: &TableSchema) -> Option<&Value> {
        schema.tie_break.as_deref().and_then(|tb| self.fields.get(tb))
    }
}
