//! Application configuration.

use crate::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tickvault_core::TableSchema;
use tickvault_engine::{BufferConfig, CompactionConfig, RetryPolicy};

/// Top-level TOML configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Root directory of the durable store.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Flush triggers, shared by all tables.
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Retry budget and backoff shape for flush commits.
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub compaction: CompactionConfig,
    /// Tables defined (and activated) at startup. Tables already present
    /// in the store are recovered instead.
    #[serde(default)]
    pub tables: Vec<TableSchema>,
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            buffer: BufferConfig::default(),
            retry: RetryPolicy::default(),
            compaction: CompactionConfig::default(),
            tables: Vec::new(),
        }
    }
}

impl VaultConfig {
    /// Load from `path` if it exists, defaults otherwise.
    pub fn load(path: &str) -> VaultResult<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> VaultResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VaultError::Config(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| VaultError::Config(format!("Failed to parse config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VaultConfig::default();
        assert_eq!(config.data_dir, "data");
        assert_eq!(config.buffer.max_count, 100);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.tables.is_empty());
    }

    #[test]
    fn test_parse_toml_with_table_definitions() {
        let toml = r#"
            data_dir = "/var/lib/tickvault"

            [buffer]
            max_count = 50

            [retry]
            max_attempts = 5
            base_delay_ms = 250

            [[tables]]
            name = "market_snapshots"
            key_columns = ["t", "symbol"]
            tie_break = "t"

            [[tables.columns]]
            name = "t"
            type = "timestamp"

            [[tables.columns]]
            name = "symbol"
            type = "text"

            [tables.partition_rule]
            rule = "date_from_timestamp"
            column = "t"
        "#;

        let config: VaultConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.data_dir, "/var/lib/tickvault");
        assert_eq!(config.buffer.max_count, 50);
        assert_eq!(config.retry.max_attempts, 5);
        // Unset retry fields keep their defaults.
        assert_eq!(config.retry.factor, 2);
        assert_eq!(config.tables.len(), 1);
        config.tables[0].validate().unwrap();
    }
}
