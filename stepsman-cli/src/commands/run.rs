//! Run command handlers
//!
//! Handles starting runs from scripts, listing and viewing runs, and the
//! audit flag.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use sqlx::SqlitePool;
use stepsman_core::domain::run::{Run, RunStatus};
use stepsman_core::domain::step::{Step, StepStatus};
use stepsman_core::dto::run::RunFilter;
use stepsman_lua::LuaScriptParser;
use stepsman_store::service::run_service;

use crate::id_resolver::resolve_run;
use crate::types::IdOrPrefix;

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// List runs, newest first
    List {
        /// Only runs with this title
        #[arg(short, long)]
        name: Option<String>,

        /// Only runs in this status (pending, in-progress, done, failed)
        #[arg(short, long)]
        status: Option<RunStatus>,
    },
    /// Get run details
    Get {
        /// Run id, UUID or unambiguous UUID prefix
        id: String,
    },
    /// Describe the steps of a run
    Describe {
        /// Run id, UUID or unambiguous UUID prefix
        id: String,

        /// Only describe this step
        #[arg(short, long)]
        step: Option<i64>,
    },
    /// Mark a run as checked
    Check {
        /// Run id, UUID or unambiguous UUID prefix
        id: String,

        /// Clear the flag instead
        #[arg(long)]
        unset: bool,
    },
}

/// Handle run commands
pub async fn handle_run_command(command: RunCommands, pool: &SqlitePool) -> Result<()> {
    match command {
        RunCommands::List { name, status } => list_runs(pool, name, status).await,
        RunCommands::Get { id } => get_run(pool, &id).await,
        RunCommands::Describe { id, step } => describe_run(pool, &id, step).await,
        RunCommands::Check { id, unset } => check_run(pool, &id, !unset).await,
    }
}

/// Create a run from a script file
pub async fn start_run(pool: &SqlitePool, file: &Path) -> Result<()> {
    let script = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read script file: {}", file.display()))?;

    let run = run_service::create_run(pool, &LuaScriptParser, &script)
        .await
        .context("Failed to start run")?;

    println!("{}", "✓ Run started".green().bold());
    println!("  ID:    {}", run.id.to_string().cyan());
    println!("  UUID:  {}", run.uuid.to_string().dimmed());
    println!("  Name:  {}", run.name);
    println!("  Steps: {}", run.steps.len());

    Ok(())
}

async fn list_runs(
    pool: &SqlitePool,
    name: Option<String>,
    status: Option<RunStatus>,
) -> Result<()> {
    let filter = RunFilter { name, status };
    let runs = run_service::list_runs(pool, &filter).await?;

    if runs.is_empty() {
        println!("{}", "No runs found.".yellow());
    } else {
        println!("{}", format!("Found {} run(s):", runs.len()).bold());
        println!();
        for run in runs {
            print_run_summary(&run);
        }
    }

    Ok(())
}

async fn get_run(pool: &SqlitePool, id: &str) -> Result<()> {
    let run_ref = resolve_run(pool, &IdOrPrefix::parse(id)).await?;
    let run = run_service::get_run(pool, run_ref).await?;

    print_run_details(&run);

    Ok(())
}

async fn describe_run(pool: &SqlitePool, id: &str, step: Option<i64>) -> Result<()> {
    let run_ref = resolve_run(pool, &IdOrPrefix::parse(id)).await?;
    let run = run_service::get_run(pool, run_ref).await?;

    let steps: Vec<&Step> = run
        .steps
        .iter()
        .filter(|s| step.is_none_or(|wanted| s.step_id == wanted))
        .collect();

    if steps.is_empty() {
        println!("{}", format!("No such step in run {}.", run.id).yellow());
        return Ok(());
    }

    for s in steps {
        print_step_details(s, Some(run.cursor));
    }

    Ok(())
}

async fn check_run(pool: &SqlitePool, id: &str, checked: bool) -> Result<()> {
    let run_ref = resolve_run(pool, &IdOrPrefix::parse(id)).await?;
    let run = run_service::set_checked(pool, run_ref, checked).await?;

    if run.checked {
        println!("{} Run {} checked", "✓".green(), run.id);
    } else {
        println!("Run {} unchecked", run.id);
    }

    Ok(())
}

fn print_run_summary(run: &Run) {
    let done = run.steps.iter().filter(|s| s.status.is_satisfied()).count();

    println!(
        "  {} Run {} {}",
        "▸".cyan(),
        run.id,
        run.uuid.to_string().dimmed()
    );
    println!("    Name:   {}", run.name);
    println!("    Status: {}", colorize_run_status(run.status));
    println!("    Steps:  {}/{}", done, run.steps.len());
    println!();
}

fn print_run_details(run: &Run) {
    println!("{}", "Run Details:".bold());
    println!("  ID:      {}", run.id.to_string().cyan());
    println!("  UUID:    {}", run.uuid.to_string().dimmed());
    println!("  Name:    {}", run.name);
    println!("  Status:  {}", colorize_run_status(run.status));
    println!("  Cursor:  {}", run.cursor);
    println!("  Checked: {}", if run.checked { "✓".green() } else { "✗".dimmed() });

    println!("\n{}", "Steps:".bold());
    for step in &run.steps {
        let marker = if step.step_id == run.cursor { "▸".cyan() } else { " ".normal() };
        println!(
            "  {} {:>3}. {} [{}]",
            marker,
            step.step_id,
            step.name,
            colorize_step_status(step.status)
        );
    }
}

// Describe layout: one block per step
pub(crate) fn print_step_details(step: &Step, cursor: Option<i64>) {
    let cursor_mark = if cursor == Some(step.step_id) { "True" } else { "" };
    let done_mark = if step.status.is_satisfied() { "True" } else { "[ ]" };
    let heart_beat = match (step.status, step.heart_beat) {
        (StepStatus::InProgress, Some(beat)) => beat.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => String::new(),
    };

    println!("  {:<13}{}", "Id:", step.step_id);
    println!("  {:<13}{}", "Cursor:", cursor_mark.cyan());
    println!("  {:<13}{}", "Name:", step.name.bold());
    println!("  {:<13}{}", "UUID:", step.uuid.to_string().dimmed());
    println!("  {:<13}{}", "Status:", colorize_step_status(step.status));
    println!("  {:<13}{}", "Heartbeat:", heart_beat);
    println!("  {:<13}{}", "Done:", done_mark);
    println!("  {:<13}{}", "Description:", step.description.trim_end());
    println!();
}

fn colorize_run_status(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Pending => status.label().yellow(),
        RunStatus::InProgress => status.label().cyan(),
        RunStatus::Done => status.label().green(),
        RunStatus::Failed => status.label().red(),
    }
}

pub(crate) fn colorize_step_status(status: StepStatus) -> ColoredString {
    match status {
        StepStatus::Pending => status.label().yellow(),
        StepStatus::InProgress => status.label().cyan(),
        StepStatus::Done => status.label().green(),
        StepStatus::Skipped => status.label().dimmed(),
        StepStatus::Failed => status.label().red(),
    }
}
