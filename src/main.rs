//! batch-relay: operator CLI for the batch relay core.
//!
//! ## Example Usage
//!
//! ```bash
//! # Drill failover locally: 20 batches, primary dropped after the 5th
//! batch-relay simulate --batches 20 --sever-primary-after 5
//!
//! # Check a batch file against its merkle root (needs the `native` feature)
//! batch-relay verify --batch batch.bin --merkle-root 0xabc...
//! ```

use anyhow::{anyhow, Context, Result};
use batch_relay::sim::{run_simulation, SimulationOptions};
use batch_relay::RelayConfig;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "batch_relay=info";

#[derive(Parser)]
#[command(name = "batch-relay", author, version, about = "Batch event relay and response guard")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file; BATCH_RELAY_* environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `batch_relay=debug` (default: RUST_LOG, then batch_relay=info)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dual subscription manager against two in-memory ledgers
    Simulate {
        /// Number of batches to emit
        #[arg(long, default_value_t = 5)]
        batches: usize,

        /// Sever the primary endpoint after this many batches
        #[arg(long)]
        sever_primary_after: Option<usize>,

        /// Stop waiting for outstanding batches after this many seconds
        #[arg(long, default_value_t = 10)]
        duration_secs: u64,
    },

    /// Verify a batch file against its merkle root with the native verifier
    Verify {
        /// Raw batch bytes
        #[arg(long)]
        batch: PathBuf,

        /// Expected root, 32 bytes hex (0x prefix optional)
        #[arg(long)]
        merkle_root: String,
    },
}

#[derive(Serialize)]
struct VerifyOutput {
    batch_len: usize,
    merkle_root: String,
    verified: bool,
}

fn init_tracing(log_level: Option<&str>) -> Result<()> {
    let filter = match log_level {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid --log-level {directives:?}"))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn parse_merkle_root(raw: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(raw.trim_start_matches("0x")).context("merkle root is not hex")?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| anyhow!("merkle root must be 32 bytes, got {len}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        command,
        config,
        log_level,
    } = Cli::parse();
    init_tracing(log_level.as_deref())?;

    match command {
        Commands::Simulate {
            batches,
            sever_primary_after,
            duration_secs,
        } => {
            let relay_config = RelayConfig::load(config.as_deref())?;
            let opts = SimulationOptions {
                batches,
                sever_primary_after,
                duration: Duration::from_secs(duration_secs),
                ..SimulationOptions::default()
            };

            let stdout = std::io::stdout();
            let report = run_simulation(&opts, &relay_config, |forwarded| {
                let line = serde_json::to_string(forwarded)?;
                let mut out = stdout.lock();
                writeln!(out, "{line}")?;
                out.flush()?;
                Ok(())
            })
            .await?;

            tracing::info!(
                emitted = report.emitted,
                forwarded = report.forwarded,
                responded = report.responded,
                primary_severed = report.primary_severed,
                "Simulation finished"
            );
            if report.forwarded < report.emitted {
                return Err(anyhow!(
                    "only {} of {} batches were forwarded",
                    report.forwarded,
                    report.emitted
                ));
            }
            Ok(())
        }
        Commands::Verify { batch, merkle_root } => {
            let root = parse_merkle_root(&merkle_root)?;
            let data = std::fs::read(&batch)
                .with_context(|| format!("read batch {}", batch.display()))?;
            let verified = merkle_verify::verify_batch_merkle_root(&data, &root)?;

            let output = VerifyOutput {
                batch_len: data.len(),
                merkle_root: format!("0x{}", hex::encode(root)),
                verified,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            if !verified {
                return Err(anyhow!("batch does not match merkle root"));
            }
            Ok(())
        }
    }
}
