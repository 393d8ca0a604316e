//! Step command handlers
//!
//! Moves individual steps through their lifecycle and reports steps whose
//! heartbeat went quiet.

use anyhow::{Result, bail};
use clap::Subcommand;
use colored::*;
use sqlx::SqlitePool;
use stepsman_core::domain::run::Run;
use stepsman_core::dto::step::StepTransition;
use stepsman_store::StoreError;
use stepsman_store::service::run_service;

use crate::commands::run::{colorize_step_status, print_step_details};
use crate::config::Config;
use crate::id_resolver::resolve_run;
use crate::types::IdOrPrefix;

/// Step subcommands
#[derive(Subcommand)]
pub enum StepCommands {
    /// Start a pending step
    Start {
        /// Run id, UUID or unambiguous UUID prefix
        run: String,
        /// Step number
        step: i64,
    },
    /// Refresh the heartbeat of an in-progress step
    Heartbeat {
        /// Run id, UUID or unambiguous UUID prefix
        run: String,
        /// Step number
        step: i64,
    },
    /// Complete an in-progress step
    Done {
        /// Run id, UUID or unambiguous UUID prefix
        run: String,
        /// Step number
        step: i64,
    },
    /// Skip a pending or in-progress step
    Skip {
        /// Run id, UUID or unambiguous UUID prefix
        run: String,
        /// Step number
        step: i64,
    },
    /// Fail an in-progress step
    Fail {
        /// Run id, UUID or unambiguous UUID prefix
        run: String,
        /// Step number
        step: i64,
    },
    /// List in-progress steps without a recent heartbeat
    Stale,
}

/// Handle step commands
pub async fn handle_step_command(
    command: StepCommands,
    pool: &SqlitePool,
    config: &Config,
) -> Result<()> {
    match command {
        StepCommands::Start { run, step } => {
            apply(pool, &run, |_| Ok(StepTransition::start(step))).await
        }
        StepCommands::Heartbeat { run, step } => {
            apply(pool, &run, |_| Ok(StepTransition::heartbeat(step))).await
        }
        StepCommands::Done { run, step } => {
            apply(pool, &run, |_| Ok(StepTransition::done(step))).await
        }
        StepCommands::Fail { run, step } => {
            apply(pool, &run, |_| Ok(StepTransition::fail(step))).await
        }
        StepCommands::Skip { run, step } => {
            apply(pool, &run, |current| {
                let Some(found) = current.step(step) else {
                    bail!("Step {} not found in run {}", step, current.id);
                };
                Ok(StepTransition::skip(step, found.status))
            })
            .await
        }
        StepCommands::Stale => list_stale(pool, config).await,
    }
}

/// Resolve the run, build the transition from its current state and save it
async fn apply<F>(pool: &SqlitePool, run: &str, build: F) -> Result<()>
where
    F: FnOnce(&Run) -> Result<StepTransition>,
{
    let run_ref = resolve_run(pool, &IdOrPrefix::parse(run)).await?;
    let current = run_service::get_run(pool, run_ref).await?;
    let transition = build(&current)?;
    let step_id = transition.step_id;

    match run_service::save_step_transition(pool, current.id, transition).await {
        Ok(updated) => {
            if let Some(step) = updated.step(step_id) {
                println!(
                    "{} Run {} step {} is now {} (run {})",
                    "✓".green(),
                    updated.id,
                    step_id,
                    colorize_step_status(step.status),
                    updated.status
                );
            }
            Ok(())
        }
        Err(err @ StoreError::Conflict { .. }) => {
            println!(
                "{}",
                "⚠ The step was changed by someone else; re-read the run and retry".yellow()
            );
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

async fn list_stale(pool: &SqlitePool, config: &Config) -> Result<()> {
    let stale =
        run_service::find_stale_steps(pool, chrono::Utc::now(), config.stale_after).await?;

    if stale.is_empty() {
        println!("{}", "No stale steps.".green());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "Found {} stale step(s) (no heartbeat for {}s):",
            stale.len(),
            config.stale_after.num_seconds()
        )
        .bold()
    );
    println!();
    for entry in stale {
        println!(
            "{} Run {} {} ({})",
            "▸".cyan(),
            entry.run_id,
            entry.run_name,
            entry.run_uuid.to_string().dimmed()
        );
        print_step_details(&entry.step, None);
    }

    Ok(())
}
