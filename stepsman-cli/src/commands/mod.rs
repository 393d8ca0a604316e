//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod run;
mod step;

pub use run::RunCommands;
pub use step::StepCommands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use sqlx::SqlitePool;
use stepsman_store::db;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start a new run from a Lua script
    Start {
        /// Path to the script file
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Run inspection and bookkeeping
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Step transitions
    Step {
        #[command(subcommand)]
        command: StepCommands,
    },
}

/// Handle a CLI command
///
/// Opens the store, which brings its schema up to date, then routes the
/// command to the appropriate handler module. A store that fails to migrate
/// aborts the command.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let pool = open_store(config).await?;

    let result = match command {
        Commands::Start { file } => run::start_run(&pool, &file).await,
        Commands::Run { command } => run::handle_run_command(command, &pool).await,
        Commands::Step { command } => step::handle_step_command(command, &pool, config).await,
    };

    pool.close().await;
    result
}

async fn open_store(config: &Config) -> Result<SqlitePool> {
    db::open(&config.database_url, &config.store_options)
        .await
        .with_context(|| format!("Failed to open store at {}", config.database_url))
}
