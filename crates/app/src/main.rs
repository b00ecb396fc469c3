//! Aphrodite - synchronized watch parties
//!
//! One binary for both sides: `serve` runs the session server, `host` and
//! `watch` join a session with a simulated player driven from the terminal.

use std::path::PathBuf;

use anyhow::Context;
use aphrodite_core::Config;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod notifier;

#[derive(Parser)]
#[command(name = "aphrodite", about = "Synchronized watch parties", version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading config")?;

    // RUST_LOG wins over the configured filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Aphrodite");

    commands::run(cli.command, config).await
}
