//! # Hyperarb CLI
//!
//! Entry point for the arbitrage engine.
//!
//! ## Commands
//!
//! - `run` (default): start the full engine loop
//! - `analyze-tx <hash>`: decode a transaction's DEX state events
//! - `analyze-routers <from> <to>`: rank active pools over a block range
//! - `debug-arbitrage <hash>`: replay a transaction's pool touches against
//!   the current index
//!
//! Exit codes: 0 success, 1 configuration error, 2 runtime error.

use clap::{Parser, Subcommand};
use ethers::types::H256;
use hyperarb::{ArbitrageBot, Settings};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hyperarb", about = "On-chain cyclic arbitrage engine for HyperEVM chains")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine loop (default)
    Run,
    /// Decode one transaction's DEX state events
    AnalyzeTx { hash: String },
    /// Rank active pools over a block range
    AnalyzeRouters { from_block: u64, to_block: u64 },
    /// Replay a transaction's pool touches against the current index
    DebugArbitrage { hash: String },
}

fn parse_hash(raw: &str) -> Result<H256, String> {
    raw.parse::<H256>()
        .map_err(|e| format!("invalid transaction hash '{}': {}", raw, e))
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    // tracing-log bridge also routes the log-macro modules
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    let bot = match ArbitrageBot::new(settings).await {
        Ok(bot) => Arc::new(bot),
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    let outcome = match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let runner = Arc::clone(&bot);
            let mut loop_handle = tokio::spawn(async move { runner.run().await });

            let join_result = tokio::select! {
                result = &mut loop_handle => result,
                _ = signal::ctrl_c() => {
                    println!("\nreceived Ctrl+C, shutting down…");
                    bot.stop();
                    loop_handle.await
                }
            };
            match join_result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("engine loop failed: {}", e)),
                Err(e) => Err(format!("engine task panicked: {}", e)),
            }
        }
        Command::AnalyzeTx { hash } => match parse_hash(&hash) {
            Ok(hash) => bot
                .analyze_tx(hash)
                .await
                .map(|report| println!("{}", report))
                .map_err(|e| e.to_string()),
            Err(e) => Err(e),
        },
        Command::AnalyzeRouters {
            from_block,
            to_block,
        } => bot
            .analyze_routers(from_block, to_block)
            .await
            .map(|report| println!("{}", report))
            .map_err(|e| e.to_string()),
        Command::DebugArbitrage { hash } => match parse_hash(&hash) {
            Ok(hash) => bot
                .debug_arbitrage(hash)
                .await
                .map(|report| println!("{}", report))
                .map_err(|e| e.to_string()),
            Err(e) => Err(e),
        },
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{}", message);
            ExitCode::from(2)
        }
    }
}
