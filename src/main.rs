//! Batch transfer CLI.
//!
//! Signs, broadcasts and confirms a list of transfers from one wallet,
//! never submitting a transfer id twice across runs.
//!
//! ```text
//! entries.json ──▶ BatchOrchestrator ──▶ chain (RPC)
//!                       │   ▲
//!                       ▼   │
//!                  transfers.json (records)
//! ```

use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use batch_transfer::blockchain::Wallet;
use batch_transfer::config::{load_config, AppConfig};
use batch_transfer::lifecycle::signals::spawn_signal_handler;
use batch_transfer::lifecycle::startup::{build_engine, open_store};
use batch_transfer::lifecycle::Shutdown;
use batch_transfer::observability::{logging, metrics};
use batch_transfer::transfer::{TransactionStore, TransferEntry, TxStatus};

#[derive(Parser)]
#[command(name = "batch-transfer")]
#[command(about = "Submit and confirm batches of on-chain transfers", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch of transfers
    Transfer {
        /// JSON array of transfer entries
        #[arg(short, long)]
        entries: PathBuf,

        /// Receipt wait in seconds (overrides transfer.monitor_timeout_secs)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// List stored transactions still waiting for a receipt
    Pending,
    /// Print the wallet address derived from the environment key
    Address,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    logging::init_logging(&config.observability);

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    match cli.command {
        Commands::Transfer { entries, timeout_secs } => {
            let healthy = run_transfer(&config, &entries, timeout_secs).await?;
            if !healthy {
                std::process::exit(1);
            }
        }
        Commands::Pending => list_pending(&config).await?,
        Commands::Address => {
            let wallet = Wallet::from_env(config.blockchain.chain_id)?;
            println!("{}", wallet.address());
        }
    }

    Ok(())
}

/// Returns false when any entry failed or is still unconfirmed.
async fn run_transfer(
    config: &AppConfig,
    entries_path: &Path,
    timeout_secs: Option<u64>,
) -> Result<bool, Box<dyn std::error::Error>> {
    let entries = read_entries(entries_path)?;
    tracing::info!(path = %entries_path.display(), entries = entries.len(), "Loaded transfer entries");

    let wallet = Wallet::from_env(config.blockchain.chain_id)?;
    let engine = build_engine(config, wallet).await?;

    let shutdown = Arc::new(Shutdown::new());
    let signals = spawn_signal_handler(shutdown.clone());

    let timeout = Duration::from_secs(timeout_secs.unwrap_or(config.transfer.monitor_timeout_secs));
    let report = engine.run_batch(&entries, timeout, &shutdown.subscribe()).await;
    signals.abort();
    let report = report?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.failed == 0 && report.unconfirmed == 0)
}

fn read_entries(path: &Path) -> Result<Vec<TransferEntry>, Box<dyn std::error::Error>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

async fn list_pending(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&config.store)?;
    let pending = store.list_by_status(TxStatus::Generated).await?;
    if pending.is_empty() {
        println!("No pending transactions");
        return Ok(());
    }
    for record in pending {
        println!(
            "{:>8}  nonce {:>6}  {}  {} -> {}",
            record.id, record.nonce, record.tx_hash, record.value, record.recipient_address
        );
    }
    Ok(())
}
