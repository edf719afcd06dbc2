//! Last-Write-Wins deduplication.
//!
//! Two phases per flush: collapse the batch itself, then anti-join the
//! survivors against what the store already holds. Equal tie-breaks keep
//! the existing record in both phases, so a re-delivered batch collapses
//! to nothing instead of flapping.

use std::cmp::Ordering;
use std::collections::HashMap;
use tickvault_core::{KeyTuple, Record, TableSchema};
use tracing::debug;

/// Dedup result: surviving records plus the drop count for observability.
#[derive(Debug)]
pub struct DedupOutcome {
    pub survivors: Vec<Record>,
    pub duplicates_dropped: u64,
}

/// Whether `incoming` displaces `current` under the table's policy.
///
/// With a declared tie-break: only a strictly greater value wins; equal
/// or incomparable keeps `current`. Without one: the later arrival wins.
fn displaces(schema: &TableSchema, incoming: &Record, current: &Record) -> bool {
    match &schema.tie_break {
        Some(_) => match (
            incoming.tie_break_value(schema),
            current.tie_break_value(schema),
        ) {
            (Some(new), Some(old)) => new.compare(old) == Some(Ordering::Greater),
            _ => false,
        },
        None => true,
    }
}

/// Phase 1: collapse duplicates within one batch, in arrival order.
#[must_use]
pub fn dedup_batch(schema: &TableSchema, candidates: Vec<Record>) -> DedupOutcome {
    let mut by_key: HashMap<KeyTuple, usize> = HashMap::new();
    let mut survivors: Vec<Option<Record>> = Vec::with_capacity(candidates.len());
    let mut duplicates_dropped = 0u64;

    for record in candidates {
        let key = record.key_tuple(schema);
        match by_key.get(&key) {
            None => {
                by_key.insert(key, survivors.len());
                survivors.push(Some(record));
            }
            Some(&slot) => {
                duplicates_dropped += 1;
                let current = survivors[slot]
                    .as_ref()
                    .expect("survivor slot is only vacated on replacement");
                if displaces(schema, &record, current) {
                    survivors[slot] = Some(record);
                }
            }
        }
    }

    DedupOutcome {
        survivors: survivors.into_iter().flatten().collect(),
        duplicates_dropped,
    }
}

/// Phase 2: anti-join candidates against the store's current winners for
/// the same keys. A candidate survives only if its key is absent or its
/// tie-break strictly exceeds the stored record's.
#[must_use]
pub fn anti_join(
    schema: &TableSchema,
    candidates: Vec<Record>,
    existing: &HashMap<KeyTuple, Record>,
) -> DedupOutcome {
    let mut survivors = Vec::with_capacity(candidates.len());
    let mut duplicates_dropped = 0u64;

    for record in candidates {
        let key = record.key_tuple(schema);
        match existing.get(&key) {
            None => survivors.push(record),
            Some(stored) => {
                // Against durable state the arrival-order policy does not
                // apply: re-delivery must be a no-op, so only a strictly
                // greater tie-break gets through.
                let wins = match (record.tie_break_value(schema), stored.tie_break_value(schema))
                {
                    (Some(new), Some(old)) => new.compare(old) == Some(Ordering::Greater),
                    _ => false,
                };
                if wins {
                    survivors.push(record);
                } else {
                    duplicates_dropped += 1;
                }
            }
        }
    }

    if duplicates_dropped > 0 {
        debug!(
            table = %schema.name,
            duplicates = duplicates_dropped,
            "Anti-join dropped already-stored records"
        );
    }
    DedupOutcome {
        survivors,
        duplicates_dropped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickvault_core::{ColumnDef, ColumnType, PartitionRule, RetentionPolicy, Value};

    fn schema(tie_break: Option<&str>) -> TableSchema {
        TableSchema {
            name: "signals".into(),
            columns: vec![
                ColumnDef::new("symbol", ColumnType::Text),
                ColumnDef::new("seq", ColumnType::Int),
                ColumnDef::new("value", ColumnType::Int),
            ],
            key_columns: vec!["symbol".into()],
            tie_break: tie_break.map(String::from),
            partition_rule: PartitionRule::Single,
            retention: RetentionPolicy::default(),
            max_partitions: 1000,
        }
    }

    fn row(symbol: &str, seq: i64, value: i64) -> Record {
        Record::new()
            .with("symbol", symbol)
            .with("seq", seq)
            .with("value", value)
    }

    fn key(symbol: &str) -> KeyTuple {
        vec![Value::from(symbol)]
    }

    #[test]
    fn test_intra_batch_greater_tie_break_wins_any_order() {
        let schema = schema(Some("seq"));

        let out = dedup_batch(&schema, vec![row("SPY", 1, 10), row("SPY", 2, 20)]);
        assert_eq!(out.duplicates_dropped, 1);
        assert_eq!(out.survivors[0].get("value"), Some(&Value::Int(20)));

        let out = dedup_batch(&schema, vec![row("SPY", 2, 20), row("SPY", 1, 10)]);
        assert_eq!(out.survivors.len(), 1);
        assert_eq!(out.survivors[0].get("value"), Some(&Value::Int(20)));
    }

    #[test]
    fn test_intra_batch_equal_tie_break_keeps_first() {
        let schema = schema(Some("seq"));
        let out = dedup_batch(&schema, vec![row("SPY", 1, 10), row("SPY", 1, 99)]);
        assert_eq!(out.duplicates_dropped, 1);
        assert_eq!(out.survivors[0].get("value"), Some(&Value::Int(10)));
    }

    #[test]
    fn test_intra_batch_no_tie_break_last_arrival_wins() {
        let schema = schema(None);
        let out = dedup_batch(&schema, vec![row("SPY", 1, 10), row("SPY", 2, 99)]);
        assert_eq!(out.duplicates_dropped, 1);
        assert_eq!(out.survivors[0].get("value"), Some(&Value::Int(99)));
    }

    #[test]
    fn test_intra_batch_distinct_keys_untouched() {
        let schema = schema(Some("seq"));
        let out = dedup_batch(&schema, vec![row("SPY", 1, 10), row("QQQ", 1, 20)]);
        assert_eq!(out.duplicates_dropped, 0);
        assert_eq!(out.survivors.len(), 2);
    }

    #[test]
    fn test_anti_join_redelivery_is_dropped() {
        let schema = schema(Some("seq"));
        let existing = HashMap::from([(key("SPY"), row("SPY", 1, 10))]);

        let out = anti_join(&schema, vec![row("SPY", 1, 10)], &existing);
        assert!(out.survivors.is_empty());
        assert_eq!(out.duplicates_dropped, 1);
    }

    #[test]
    fn test_anti_join_correction_survives() {
        let schema = schema(Some("seq"));
        let existing = HashMap::from([(key("SPY"), row("SPY", 1, 10))]);

        let out = anti_join(&schema, vec![row("SPY", 2, 20)], &existing);
        assert_eq!(out.survivors.len(), 1);
        assert_eq!(out.duplicates_dropped, 0);
    }

    #[test]
    fn test_anti_join_stale_tie_break_is_dropped() {
        let schema = schema(Some("seq"));
        let existing = HashMap::from([(key("SPY"), row("SPY", 5, 50))]);

        let out = anti_join(&schema, vec![row("SPY", 3, 30)], &existing);
        assert!(out.survivors.is_empty());
        assert_eq!(out.duplicates_dropped, 1);
    }

    #[test]
    fn test_anti_join_no_tie_break_existing_wins() {
        let schema = schema(None);
        let existing = HashMap::from([(key("SPY"), row("SPY", 1, 10))]);

        let out = anti_join(&schema, vec![row("SPY", 2, 99)], &existing);
        assert!(out.survivors.is_empty());
        assert_eq!(out.duplicates_dropped, 1);
    }

    #[test]
    fn test_anti_join_unknown_key_passes() {
        let schema = schema(Some("seq"));
        let existing = HashMap::from([(key("SPY"), row("SPY", 1, 10))]);

        let out = anti_join(&schema, vec![row("QQQ", 1, 20)], &existing);
        assert_eq!(out.survivors.len(), 1);
    }
}
