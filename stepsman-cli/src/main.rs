//! Stepsman CLI
//!
//! Command-line interface for starting scripted runs and walking their steps
//! against the local store.

mod commands;
mod config;
mod id_resolver;
mod types;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "stepsman")]
#[command(about = "Step-by-step runbook manager", long_about = None)]
struct Cli {
    /// Directory holding the store (defaults to ~/.stepsman)
    #[arg(long, env = "STEPSMAN_HOME")]
    store_dir: Option<PathBuf>,

    /// Database URL, overrides --store-dir
    #[arg(long, env = "STEPSMAN_DATABASE_URL")]
    database_url: Option<String>,

    /// Seconds without a heartbeat before an in-progress step is stale
    #[arg(long, env = "STEPSMAN_STALE_AFTER", default_value = "60")]
    stale_after: u64,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stepsman=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config::resolve(cli.store_dir, cli.database_url, cli.stale_after)?;
    tracing::debug!("Using store at {}", config.database_url);

    handle_command(cli.command, &config).await
}
