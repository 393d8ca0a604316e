//! Run Repository
//!
//! Handles all database operations related to runs. Each function issues a
//! single statement against any SQLite executor, so callers decide whether
//! it runs on the pool or inside a transaction.

use sqlx::{QueryBuilder, Sqlite, SqliteExecutor};
use stepsman_core::domain::run::{Run, RunRef, RunStatus};
use stepsman_core::domain::step::Step;
use stepsman_core::dto::run::RunFilter;
use uuid::Uuid;

use crate::error::PersistenceCause;

const SELECT_RUN: &str = r#"
    SELECT id, uuid, name, status, cursor, script, checked, revision, steps
    FROM runs
"#;

/// Insert a new run, returning its assigned id
pub async fn insert<'e, E>(executor: E, run: &Run) -> Result<i64, PersistenceCause>
where
    E: SqliteExecutor<'e>,
{
    let steps = serde_json::to_string(&run.steps)?;

    let result = sqlx::query(
        r#"
        INSERT INTO runs (uuid, name, status, cursor, script, checked, revision, steps)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run.uuid.to_string())
    .bind(&run.name)
    .bind(run.status.code())
    .bind(run.cursor)
    .bind(&run.script)
    .bind(run.checked)
    .bind(run.revision)
    .bind(steps)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Find a run by store id
pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Run>, PersistenceCause>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, RunRow>(&format!("{SELECT_RUN} WHERE id = ?"))
        .bind(id)
        .fetch_optional(executor)
        .await?;

    row.map(Run::try_from).transpose()
}

/// Find a run by UUID
pub async fn find_by_uuid<'e, E>(executor: E, uuid: Uuid) -> Result<Option<Run>, PersistenceCause>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, RunRow>(&format!("{SELECT_RUN} WHERE uuid = ?"))
        .bind(uuid.to_string())
        .fetch_optional(executor)
        .await?;

    row.map(Run::try_from).transpose()
}

pub async fn find<'e, E>(executor: E, run_ref: RunRef) -> Result<Option<Run>, PersistenceCause>
where
    E: SqliteExecutor<'e>,
{
    match run_ref {
        RunRef::Id(id) => find_by_id(executor, id).await,
        RunRef::Uuid(uuid) => find_by_uuid(executor, uuid).await,
    }
}

/// List runs matching a filter, newest first
pub async fn list<'e, E>(executor: E, filter: &RunFilter) -> Result<Vec<Run>, PersistenceCause>
where
    E: SqliteExecutor<'e>,
{
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_RUN);
    query.push(" WHERE 1 = 1");

    if let Some(name) = &filter.name {
        query.push(" AND name = ").push_bind(name.clone());
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.code());
    }
    query.push(" ORDER BY id DESC");

    let rows = query.build_query_as::<RunRow>().fetch_all(executor).await?;

    rows.into_iter().map(Run::try_from).collect()
}

/// Persist status, cursor and steps if nobody else wrote the run since `run.revision`
///
/// Returns `false` when the stored revision moved on, in which case nothing
/// is written.
pub async fn update_progress<'e, E>(executor: E, run: &Run) -> Result<bool, PersistenceCause>
where
    E: SqliteExecutor<'e>,
{
    let steps = serde_json::to_string(&run.steps)?;

    let result = sqlx::query(
        r#"
        UPDATE runs
        SET status = ?, cursor = ?, steps = ?, revision = revision + 1
        WHERE id = ? AND revision = ?
        "#,
    )
    .bind(run.status.code())
    .bind(run.cursor)
    .bind(steps)
    .bind(run.id)
    .bind(run.revision)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Set or clear the audit flag
pub async fn set_checked<'e, E>(executor: E, id: i64, checked: bool) -> Result<bool, PersistenceCause>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("UPDATE runs SET checked = ? WHERE id = ?")
        .bind(checked)
        .bind(id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

// Columns from the first schema version are nullable
#[derive(sqlx::FromRow)]
struct RunRow {
    id: i64,
    uuid: Option<String>,
    name: Option<String>,
    status: Option<i64>,
    cursor: i64,
    script: Option<String>,
    checked: Option<bool>,
    revision: i64,
    steps: String,
}

impl TryFrom<RunRow> for Run {
    type Error = PersistenceCause;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let uuid = row
            .uuid
            .as_deref()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| PersistenceCause::Corrupt(format!("run {} has no valid uuid", row.id)))?;

        let status = row
            .status
            .and_then(RunStatus::from_code)
            .ok_or_else(|| {
                PersistenceCause::Corrupt(format!(
                    "run {} has unknown status {:?}",
                    row.id, row.status
                ))
            })?;

        let mut steps: Vec<Step> = serde_json::from_str(&row.steps)?;
        steps.sort_by_key(|s| s.step_id);

        // Rows that predate embedded steps carry none
        if !steps.iter().any(|s| s.step_id == row.cursor) {
            return Err(PersistenceCause::Corrupt(format!(
                "run {} has no step {} under its cursor ({} steps stored)",
                row.id,
                row.cursor,
                steps.len()
            )));
        }

        Ok(Run {
            id: row.id,
            uuid,
            name: row.name.unwrap_or_default(),
            status,
            cursor: row.cursor,
            script: row.script.unwrap_or_default(),
            checked: row.checked.unwrap_or(false),
            revision: row.revision,
            steps,
        })
    }
}
