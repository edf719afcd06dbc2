//! Typed column values.
//!
//! Loosely-typed upstream payloads become explicit tagged values here.
//! `Value` is the unit of everything the store persists: record fields,
//! key tuples, tie-break comparisons, and partition inputs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Declared type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Decimal,
    Text,
    Bool,
    Timestamp,
}

impl ColumnType {
    /// Whether values of this type have a total order and stable hash.
    ///
    /// Float fails both (NaN), so it is rejected for key, tie-break and
    /// partition-input columns at definition time.
    #[must_use]
    pub fn is_orderable(&self) -> bool {
        !matches!(self, ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Decimal => "decimal",
            ColumnType::Text => "text",
            ColumnType::Bool => "bool",
            ColumnType::Timestamp => "timestamp",
        };
        f.write_str(s)
    }
}

/// A single typed field value.
///
/// Serialized externally tagged (`{"int": 5}`) so segment lines are
/// self-describing and re-read without schema guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// The column type this value inhabits.
    #[must_use]
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Int(_) => ColumnType::Int,
            Value::Float(_) => ColumnType::Float,
            Value::Decimal(_) => ColumnType::Decimal,
            Value::Text(_) => ColumnType::Text,
            Value::Bool(_) => ColumnType::Bool,
            Value::Timestamp(_) => ColumnType::Timestamp,
        }
    }

    /// Whether this value matches a declared column type.
    #[must_use]
    pub fn matches(&self, ty: ColumnType) -> bool {
        self.column_type() == ty
    }

    /// Compare two values of the same variant.
    ///
    /// Returns `None` for mismatched variants or incomparable floats;
    /// callers treat `None` as "not strictly greater".
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

// Float cannot appear in key tuples (rejected at definition time), so a
// total Eq over the remaining variants is sound. Float still participates
// via bit equality for completeness.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Int(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            Value::Float(v) => {
                1u8.hash(state);
                v.to_bits().hash(state);
            }
            Value::Decimal(v) => {
                2u8.hash(state);
                v.hash(state);
            }
            Value::Text(v) => {
                3u8.hash(state);
                v.hash(state);
            }
            Value::Bool(v) => {
                4u8.hash(state);
                v.hash(state);
            }
            Value::Timestamp(v) => {
                5u8.hash(state);
                v.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_value_type_tags() {
        assert_eq!(Value::Int(1).column_type(), ColumnType::Int);
        assert_eq!(Value::from("SPY").column_type(), ColumnType::Text);
        assert!(Value::from(dec!(10.5)).matches(ColumnType::Decimal));
        assert!(!Value::Bool(true).matches(ColumnType::Int));
    }

    #[test]
    fn test_compare_same_variant() {
        let t1 = Utc.with_ymd_and_hms(2026, 1, 30, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            Value::Timestamp(t1).compare(&Value::Timestamp(t2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::from(dec!(20)).compare(&Value::from(dec!(10))),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Int(5).compare(&Value::Int(5)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_compare_mismatched_variants_is_none() {
        assert_eq!(Value::Int(1).compare(&Value::from("1")), None);
    }

    #[test]
    fn test_json_round_trip_is_tagged() {
        let v = Value::from("SPY");
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"text":"SPY"}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_float_not_orderable() {
        assert!(!ColumnType::Float.is_orderable());
        assert!(ColumnType::Decimal.is_orderable());
        assert!(ColumnType::Timestamp.is_orderable());
    }
}
