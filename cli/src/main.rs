//! chainsync CLI — run the ERC-20 transfer indexer and its read API.
//!
//! Usage:
//! ```bash
//! chainsync sync   --ws-url wss://… --database-url postgres://… --contract 0x…
//! chainsync serve  --database-url postgres://… --port 3000
//! chainsync status --database-url sqlite:chainsync.db
//! chainsync version
//! ```
//!
//! Every flag can also come from the environment (or a `.env` file).

mod logging;

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use chainsync_core::{normalize_address, RetryConfig, TransferQuery};
use chainsync_evm::{EvmDataSource, EvmSourceConfig, SyncBuilder};
use chainsync_storage::open_storage;

use crate::logging::{init_tracing, LogConfig};

#[derive(Debug, Parser)]
#[command(name = "chainsync", about = "Crash-safe ERC-20 Transfer indexer", disable_version_flag = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Backfill from the checkpoint, then follow new blocks.
    Sync(SyncArgs),
    /// Serve the read-only HTTP API.
    Serve(ServeArgs),
    /// Print the checkpoint of every tracked contract.
    Status(StatusArgs),
    /// Print version.
    Version,
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// HTTP JSON-RPC endpoint (derived from the WebSocket URL when omitted).
    #[arg(long, env = "RPC_URL")]
    rpc_url: Option<String>,
    /// WebSocket JSON-RPC endpoint; without it live blocks are polled.
    #[arg(long, env = "RPC_WSS_URL")]
    ws_url: Option<String>,
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
    /// ERC-20 contract to index.
    #[arg(long, env = "CONTRACT_ADDRESS")]
    contract: String,
    /// First block to index when no checkpoint exists.
    #[arg(long, env = "START_BLOCK", default_value_t = 0)]
    start_block: u64,
    /// Blocks per catch-up range.
    #[arg(long, env = "BATCH_WINDOW", default_value_t = 10)]
    batch_window: u64,
    /// Retries for transient RPC or database failures before aborting.
    #[arg(long, env = "MAX_RETRIES", default_value_t = 8)]
    max_retries: u32,
    /// Times to re-enter catch-up after the live subscription dies.
    #[arg(long = "resubscribe", env = "MAX_RESUBSCRIBES", default_value_t = 0)]
    max_resubscribes: u32,
    /// Poll interval when no WebSocket endpoint is configured.
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 4_000)]
    poll_interval_ms: u64,
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
}

#[tokio::main]
async fn main() {
    // A missing .env is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(&LogConfig::from_env());

    let result = match cli.command {
        Command::Sync(args) => cmd_sync(args).await,
        Command::Serve(args) => cmd_serve(args).await,
        Command::Status(args) => cmd_status(args).await,
        Command::Version => {
            println!("chainsync {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        let message = format!("{e:#}");
        error!(error = %message, "chainsync exited with an error");
        eprintln!("error: {message}");
        process::exit(1);
    }
}

async fn cmd_sync(args: SyncArgs) -> anyhow::Result<()> {
    if args.rpc_url.is_none() && args.ws_url.is_none() {
        bail!("either RPC_URL or RPC_WSS_URL must be set");
    }
    let contract = normalize_address(&args.contract).context("invalid CONTRACT_ADDRESS")?;
    let retry = RetryConfig {
        max_retries: args.max_retries,
        ..RetryConfig::default()
    };

    let source = EvmDataSource::new(EvmSourceConfig {
        http_url: args.rpc_url,
        ws_url: args.ws_url,
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        poll_retry: retry.clone(),
        ..EvmSourceConfig::default()
    })
    .context("configuring RPC data source")?;
    let source = Arc::new(source);
    let rpc_url = source.rpc().url().to_string();

    let storage = open_storage(&args.database_url)
        .await
        .context("opening database")?;

    let orchestrator = SyncBuilder::new()
        .start_block(args.start_block)
        .batch_window(args.batch_window)
        .retry(retry)
        .max_resubscribes(args.max_resubscribes)
        .build(source, storage, &contract)?;

    info!(
        contract = orchestrator.contract(),
        rpc = %rpc_url,
        start_block = args.start_block,
        batch_window = args.batch_window,
        "starting sync"
    );

    let progress = orchestrator.progress();
    tokio::select! {
        result = orchestrator.run() => result.context("sync stopped")?,
        _ = tokio::signal::ctrl_c() => {
            info!(
                phase = ?progress.phase(),
                pointer = progress.pointer(),
                "interrupted, shutting down"
            );
        }
    }
    Ok(())
}

async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let storage = open_storage(&args.database_url)
        .await
        .context("opening database")?;
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));

    chainsync_api::serve(addr, storage, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupted, shutting down API");
    })
    .await?;
    Ok(())
}

async fn cmd_status(args: StatusArgs) -> anyhow::Result<()> {
    let storage = open_storage(&args.database_url)
        .await
        .context("opening database")?;
    let checkpoints = storage
        .sync_status()
        .await
        .context("reading checkpoints")?;

    if checkpoints.is_empty() {
        println!("no contracts synced yet");
        return Ok(());
    }
    println!("{:<44} {:>16}", "CONTRACT", "LAST BLOCK");
    for cp in checkpoints {
        println!("{:<44} {:>16}", cp.contract_address, cp.last_synced_block);
    }
    Ok(())
}
