//! ID resolver module
//!
//! Turns what the user typed into a run reference. UUID prefixes are matched
//! against every stored run and must be unambiguous.

use anyhow::{Context, Result, anyhow};
use sqlx::SqlitePool;
use stepsman_core::domain::run::RunRef;
use stepsman_core::dto::run::RunFilter;
use stepsman_store::service::run_service;

use crate::types::IdOrPrefix;

/// Resolve a run id, UUID or UUID prefix
///
/// # Errors
/// Returns an error if:
/// - No run matches the prefix
/// - Multiple runs match the prefix (ambiguous)
/// - The store cannot be read
pub async fn resolve_run(pool: &SqlitePool, id_or_prefix: &IdOrPrefix) -> Result<RunRef> {
    let prefix = match id_or_prefix {
        IdOrPrefix::Id(id) => return Ok(RunRef::Id(*id)),
        IdOrPrefix::Full(uuid) => return Ok(RunRef::Uuid(*uuid)),
        IdOrPrefix::Prefix(prefix) => prefix,
    };

    let runs = run_service::list_runs(pool, &RunFilter::default())
        .await
        .context("Failed to fetch runs for ID resolution")?;

    let matches: Vec<_> = runs
        .iter()
        .filter(|r| r.uuid.to_string().starts_with(prefix.as_str()))
        .collect();

    match matches.len() {
        0 => Err(anyhow!("No run found with UUID starting with '{}'", prefix)),
        1 => Ok(RunRef::Id(matches[0].id)),
        _ => {
            let ids: Vec<String> = matches.iter().map(|r| r.uuid.to_string()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple runs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
