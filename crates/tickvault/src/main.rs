//! tickvault CLI - Entry Point
//!
//! Opens the vault described by the config file and runs one command:
//! ingest records, drive the maintenance hooks, or inspect state and
//! history. The `run` loop is the reference external scheduler.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tickvault::{AsOf, PartitionFilter, Record, Vault, VaultConfig};
use tracing::info;

/// Idempotent time-series persistence for market data
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TICKVAULT_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest JSON Lines records from a file (or stdin) into a table
    Ingest {
        table: String,
        /// Input file; stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Flush a table's buffer (all tables when omitted)
    Flush { table: Option<String> },
    /// Run a compaction pass (all tables when omitted)
    Compact { table: Option<String> },
    /// List a table's committed versions
    Versions { table: String },
    /// Print a table's visible state
    Show {
        table: String,
        /// Read as of this version instead of latest
        #[arg(long)]
        version: Option<u64>,
        /// Restrict to one partition value
        #[arg(long)]
        partition: Option<String>,
    },
    /// Print row-level deltas between two versions
    Diff { table: String, older: u64, newer: u64 },
    /// Drive the maintenance hooks on an interval until interrupted
    Run {
        /// Flush check interval in milliseconds
        #[arg(long, default_value_t = 1_000)]
        flush_interval_ms: u64,
        /// Compaction interval in milliseconds
        #[arg(long, default_value_t = 60_000)]
        compact_interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tickvault::init_logging();

    let args = Args::parse();
    let config_path = args
        .config
        .or_else(|| std::env::var("TICKVAULT_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = VaultConfig::load(&config_path)?;
    let vault = Vault::open(config)?;

    match args.command {
        Command::Ingest { table, file } => ingest(&vault, &table, file).await?,
        Command::Flush { table } => {
            for table in tables_or_all(&vault, table) {
                let outcome = vault.flush_now(&table).await?;
                println!(
                    "{table}: version {:?}, {} rows, {} duplicates",
                    outcome.version, outcome.rows_written, outcome.duplicates_dropped
                );
            }
        }
        Command::Compact { table } => {
            for table in tables_or_all(&vault, table) {
                let report = vault.compact_now(&table)?;
                println!(
                    "{table}: {} partitions compacted, {} segments merged, {} conflicts, {} pruned",
                    report.partitions_compacted,
                    report.segments_merged,
                    report.conflicts,
                    report.segments_pruned
                );
            }
        }
        Command::Versions { table } => {
            for entry in vault.versions(&table)? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Command::Show {
            table,
            version,
            partition,
        } => {
            let rows = match version {
                Some(v) => vault.read_as_of(&table, AsOf::Version(v))?,
                None => {
                    let filter = partition
                        .map(PartitionFilter::exactly)
                        .unwrap_or_default();
                    vault.latest(&table, &filter)?
                }
            };
            for row in rows {
                println!("{}", serde_json::to_string(&row)?);
            }
        }
        Command::Diff {
            table,
            older,
            newer,
        } => {
            for delta in vault.diff(&table, older, newer)? {
                let kind = if delta.is_added() { "added" } else { "updated" };
                println!("{kind}: {}", serde_json::to_string(&delta.after)?);
            }
        }
        Command::Run {
            flush_interval_ms,
            compact_interval_ms,
        } => run_loop(&vault, flush_interval_ms, compact_interval_ms).await?,
    }

    Ok(())
}

async fn ingest(vault: &Vault, table: &str, file: Option<PathBuf>) -> Result<()> {
    let reader: Box<dyn BufRead> = match file {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(&path)
                .with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record =
            serde_json::from_str(&line).with_context(|| format!("parsing record: {line}"))?;
        records.push(record);
    }

    let count = records.len();
    let summary = vault.ingest(table, records).await?;
    let outcome = vault.flush_now(table).await?;
    let committed: u64 = summary
        .flushes
        .iter()
        .chain(std::iter::once(&outcome))
        .map(|o| o.rows_written)
        .sum();
    println!("{table}: {count} submitted, {committed} rows written");
    Ok(())
}

fn tables_or_all(vault: &Vault, table: Option<String>) -> Vec<String> {
    table.map(|t| vec![t]).unwrap_or_else(|| vault.table_names())
}

/// The reference scheduler: age-based flushes plus periodic compaction.
async fn run_loop(vault: &Vault, flush_interval_ms: u64, compact_interval_ms: u64) -> Result<()> {
    let mut flush_tick =
        tokio::time::interval(std::time::Duration::from_millis(flush_interval_ms));
    let mut compact_tick =
        tokio::time::interval(std::time::Duration::from_millis(compact_interval_ms));

    info!(flush_interval_ms, compact_interval_ms, "Maintenance loop started");
    loop {
        tokio::select! {
            _ = flush_tick.tick() => {
                for (table, result) in vault.flush_due().await {
                    if let Err(e) = result {
                        tracing::error!(table = %table, error = %e, "Scheduled flush failed");
                    }
                }
            }
            _ = compact_tick.tick() => {
                for table in vault.table_names() {
                    if let Err(e) = vault.compact_now(&table) {
                        tracing::error!(table = %table, error = %e, "Scheduled compaction failed");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested, flushing buffers");
                for table in vault.table_names() {
                    if let Err(e) = vault.flush_now(&table).await {
                        tracing::error!(table = %table, error = %e, "Final flush failed");
                    }
                }
                return Ok(());
            }
        }
    }
}
