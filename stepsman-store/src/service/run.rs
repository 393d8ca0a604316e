//! Run Service
//!
//! Business logic for creating runs and moving their steps through the
//! lifecycle. Every step transition is a read-modify-write of the whole run
//! inside one transaction, guarded by the run revision.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use stepsman_core::domain::run::{Run, RunRef, RunStatus};
use stepsman_core::domain::script::ScriptParser;
use stepsman_core::domain::step::Step;
use stepsman_core::dto::run::RunFilter;
use stepsman_core::dto::step::StepTransition;
use uuid::Uuid;

use crate::error::{PersistContext, PersistenceCause, Result, StoreError};
use crate::repository::run_repository;

/// An in-progress step whose heartbeat went quiet
#[derive(Debug, Clone)]
pub struct StaleStep {
    pub run_id: i64,
    pub run_uuid: Uuid,
    pub run_name: String,
    pub step: Step,
}

/// Parse a script and persist a new run with all its steps pending
///
/// Nothing is written when the script does not parse.
pub async fn create_run(pool: &SqlitePool, parser: &dyn ScriptParser, script: &str) -> Result<Run> {
    let definition = parser.parse(script)?;
    let mut run = Run::draft(definition, script.to_string())?;

    run.id = insert_run(pool, &run).await?;

    tracing::info!(
        "Run created: {} ({}) '{}' with {} steps",
        run.id,
        run.uuid,
        run.name,
        run.steps.len()
    );

    Ok(run)
}

// UUIDs are random, so a collision means something is badly wrong
async fn insert_run(pool: &SqlitePool, run: &Run) -> Result<i64> {
    run_repository::insert(pool, run)
        .await
        .inspect_err(|cause| {
            if cause.is_unique_violation() {
                tracing::error!("Run UUID {} collided with an existing run", run.uuid);
            }
        })
        .during("insert run")
}

/// Get a run by id or UUID
pub async fn get_run(pool: &SqlitePool, run_ref: RunRef) -> Result<Run> {
    run_repository::find(pool, run_ref)
        .await
        .during(format!("load run {}", run_ref))?
        .ok_or(StoreError::NotFound(run_ref))
}

/// Steps of a run in execution order
pub async fn list_steps(pool: &SqlitePool, run_id: i64) -> Result<Vec<Step>> {
    let run = get_run(pool, RunRef::Id(run_id)).await?;
    Ok(run.steps)
}

/// List runs, newest first
pub async fn list_runs(pool: &SqlitePool, filter: &RunFilter) -> Result<Vec<Run>> {
    run_repository::list(pool, filter)
        .await
        .during("list runs")
}

/// Set or clear the audit flag of a run
pub async fn set_checked(pool: &SqlitePool, run_ref: RunRef, checked: bool) -> Result<Run> {
    let mut run = get_run(pool, run_ref).await?;

    let updated = run_repository::set_checked(pool, run.id, checked)
        .await
        .during(format!("update run {}", run.id))?;
    if !updated {
        return Err(StoreError::NotFound(run_ref));
    }

    run.checked = checked;
    tracing::info!("Run {} checked flag set to {}", run.id, checked);

    Ok(run)
}

/// Apply one step transition and persist the run atomically
///
/// The step must still be in `transition.expected`, and the run must not
/// have been written by anyone else between our read and our write;
/// otherwise [`StoreError::Conflict`] is returned and nothing changes.
/// Returns the run as persisted.
pub async fn save_step_transition(
    pool: &SqlitePool,
    run_id: i64,
    transition: StepTransition,
) -> Result<Run> {
    let at = transition.heart_beat.unwrap_or_else(Utc::now);

    let mut tx = pool
        .begin()
        .await
        .during(format!("start transaction for run {}", run_id))?;

    let mut run = run_repository::find_by_id(&mut *tx, run_id)
        .await
        .map_err(|cause| write_error(cause, run_id, &transition, "load run"))?
        .ok_or(StoreError::NotFound(RunRef::Id(run_id)))?;

    run.apply_transition(transition.step_id, transition.expected, transition.target, at)
        .map_err(|err| StoreError::from_transition(run_id, err))?;

    let written = run_repository::update_progress(&mut *tx, &run)
        .await
        .map_err(|cause| write_error(cause, run_id, &transition, "update run"))?;

    if !written {
        tracing::warn!(
            "Run {} changed underneath step {} transition (revision {})",
            run_id,
            transition.step_id,
            run.revision
        );
        return Err(conflict(run_id, &transition));
    }

    tx.commit()
        .await
        .map_err(PersistenceCause::from)
        .map_err(|cause| write_error(cause, run_id, &transition, "commit run"))?;

    run.revision += 1;

    if transition.expected == transition.target {
        tracing::debug!("Heartbeat for run {} step {}", run_id, transition.step_id);
    } else {
        tracing::info!(
            "Run {} step {}: {} -> {} (run {}, cursor {})",
            run_id,
            transition.step_id,
            transition.expected,
            transition.target,
            run.status,
            run.cursor
        );
    }

    Ok(run)
}

/// In-progress steps across all unfinished runs whose heartbeat is older than `threshold`
pub async fn find_stale_steps(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    threshold: Duration,
) -> Result<Vec<StaleStep>> {
    let runs = list_runs(pool, &RunFilter::default()).await?;

    let stale = runs
        .iter()
        .filter(|run| run.status != RunStatus::Done)
        .flat_map(|run| {
            run.stale_steps(now, threshold)
                .into_iter()
                .map(move |step| StaleStep {
                    run_id: run.id,
                    run_uuid: run.uuid,
                    run_name: run.name.clone(),
                    step: step.clone(),
                })
        })
        .collect();

    Ok(stale)
}

// =============================================================================
// Helper Functions
// =============================================================================

fn conflict(run_id: i64, transition: &StepTransition) -> StoreError {
    StoreError::Conflict {
        run_id,
        step_id: transition.step_id,
        expected: transition.expected,
    }
}

// A writer that lost the race to another connection sees SQLITE_BUSY
fn write_error(
    cause: PersistenceCause,
    run_id: i64,
    transition: &StepTransition,
    operation: &str,
) -> StoreError {
    if cause.is_busy() {
        tracing::warn!(
            "Run {} is locked by another writer, step {} transition rejected",
            run_id,
            transition.step_id
        );
        return conflict(run_id, transition);
    }

    StoreError::Persistence {
        operation: format!("{} {}", operation, run_id),
        source: cause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{StoreOptions, create_memory_pool, database_url, open};
    use crate::migrations;
    use stepsman_core::domain::script::{ScriptDefinition, ScriptError};
    use stepsman_core::domain::step::StepStatus;
    use stepsman_lua::LuaScriptParser;

    const RELEASE: &str = r#"
        return script.define {
            title = "Release",
            steps = {
                script.step { name = "tag", description = "Tag the release" },
                script.step { name = "build", description = "Build artifacts" },
                script.step { name = "publish", description = "Upload artifacts" },
            }
        }
    "#;

    struct RejectingParser;

    impl ScriptParser for RejectingParser {
        fn parse(&self, _source: &str) -> std::result::Result<ScriptDefinition, ScriptError> {
            Err(ScriptError::new("no steps"))
        }
    }

    async fn setup() -> SqlitePool {
        let pool = create_memory_pool().await.unwrap();
        migrations::upgrade(&pool).await.unwrap();
        pool
    }

    async fn finish(pool: &SqlitePool, run_id: i64, step_id: i64) -> Run {
        save_step_transition(pool, run_id, StepTransition::start(step_id))
            .await
            .unwrap();
        save_step_transition(pool, run_id, StepTransition::done(step_id))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let pool = setup().await;

        let created = create_run(&pool, &LuaScriptParser, RELEASE).await.unwrap();

        assert!(created.id > 0);
        assert_eq!(created.name, "Release");
        assert_eq!(created.status, RunStatus::Pending);
        assert_eq!(created.cursor, 1);
        assert_eq!(created.script, RELEASE);

        let by_id = get_run(&pool, RunRef::Id(created.id)).await.unwrap();
        assert_eq!(by_id, created);
        let by_uuid = get_run(&pool, RunRef::Uuid(created.uuid)).await.unwrap();
        assert_eq!(by_uuid, created);

        let steps = list_steps(&pool, created.id).await.unwrap();
        let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["tag", "build", "publish"]);
        assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[tokio::test]
    async fn test_invalid_script_persists_nothing() {
        let pool = setup().await;

        let err = create_run(&pool, &RejectingParser, "anything")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidScript(_)));

        let err = create_run(&pool, &LuaScriptParser, "return { title = 'x', steps = {} }")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidScript(_)));

        assert!(list_runs(&pool, &RunFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_uuid_is_a_persistence_error() {
        let pool = setup().await;
        let run = create_run(&pool, &LuaScriptParser, RELEASE).await.unwrap();

        let err = insert_run(&pool, &run).await.unwrap_err();

        match err {
            StoreError::Persistence { operation, source } => {
                assert_eq!(operation, "insert run");
                assert!(source.is_unique_violation());
            }
            other => panic!("expected a persistence error, got {other:?}"),
        }
        assert_eq!(list_runs(&pool, &RunFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let pool = setup().await;

        let err = get_run(&pool, RunRef::Id(99)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(RunRef::Id(99))));

        let err = save_step_transition(&pool, 99, StepTransition::start(1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = get_run(&pool, RunRef::Uuid(Uuid::new_v4())).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_run_without_steps_is_reported_not_walked() {
        let pool = setup().await;
        let id = sqlx::query(
            "INSERT INTO runs (uuid, name, status, checked, script) VALUES (?, 'legacy', 0, 0, '')",
        )
        .bind(Uuid::new_v4().to_string())
        .execute(&pool)
        .await
        .unwrap()
        .last_insert_rowid();

        let err = list_steps(&pool, id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Persistence { source: PersistenceCause::Corrupt(_), .. }
        ));

        let err = save_step_transition(&pool, id, StepTransition::start(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Persistence { .. }));
    }

    #[tokio::test]
    async fn test_completing_all_steps_finishes_run() {
        let pool = setup().await;
        let run = create_run(&pool, &LuaScriptParser, RELEASE).await.unwrap();

        let started = save_step_transition(&pool, run.id, StepTransition::start(1))
            .await
            .unwrap();
        assert_eq!(started.status, RunStatus::InProgress);
        assert!(started.steps[0].heart_beat.is_some());

        let after_first = save_step_transition(&pool, run.id, StepTransition::done(1))
            .await
            .unwrap();
        assert_eq!(after_first.cursor, 2);
        assert_eq!(after_first.status, RunStatus::InProgress);

        finish(&pool, run.id, 2).await;
        let last = finish(&pool, run.id, 3).await;
        assert_eq!(last.status, RunStatus::Done);
        assert_eq!(last.cursor, 3);

        let stored = get_run(&pool, RunRef::Id(run.id)).await.unwrap();
        assert_eq!(stored, last);
        assert_eq!(stored.revision, 6);
    }

    #[tokio::test]
    async fn test_failed_step_fails_run() {
        let pool = setup().await;
        let run = create_run(&pool, &LuaScriptParser, RELEASE).await.unwrap();
        finish(&pool, run.id, 1).await;

        save_step_transition(&pool, run.id, StepTransition::start(2))
            .await
            .unwrap();
        let failed = save_step_transition(&pool, run.id, StepTransition::fail(2))
            .await
            .unwrap();

        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.steps[2].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_invalid_transition_changes_nothing() {
        let pool = setup().await;
        let run = create_run(&pool, &LuaScriptParser, RELEASE).await.unwrap();

        let err = save_step_transition(
            &pool,
            run.id,
            StepTransition::new(1, StepStatus::Pending, StepStatus::Done),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let err = save_step_transition(&pool, run.id, StepTransition::start(7))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StepNotFound { step_id: 7, .. }));

        assert_eq!(get_run(&pool, RunRef::Id(run.id)).await.unwrap(), run);
    }

    #[tokio::test]
    async fn test_stale_expectation_is_a_conflict() {
        let pool = setup().await;
        let run = create_run(&pool, &LuaScriptParser, RELEASE).await.unwrap();
        save_step_transition(&pool, run.id, StepTransition::start(1))
            .await
            .unwrap();

        let err = save_step_transition(&pool, run.id, StepTransition::start(1))
            .await
            .unwrap_err();

        assert!(err.is_retriable());
        assert!(matches!(
            err,
            StoreError::Conflict {
                step_id: 1,
                expected: StepStatus::Pending,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_starts_on_shared_connection() {
        let pool = setup().await;
        let run = create_run(&pool, &LuaScriptParser, RELEASE).await.unwrap();

        let (first, second) = tokio::join!(
            save_step_transition(&pool, run.id, StepTransition::start(1)),
            save_step_transition(&pool, run.id, StepTransition::start(1)),
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, StoreError::Conflict { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_starts_on_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url(&dir.path().join("stepsman.db"));
        let pool = open(&url, &StoreOptions::default()).await.unwrap();
        let run = create_run(&pool, &LuaScriptParser, RELEASE).await.unwrap();
        let run_id = run.id;

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    save_step_transition(&pool, run_id, StepTransition::start(1)).await
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert!(err.is_retriable(), "unexpected error: {err}"),
            }
        }
        assert_eq!(successes, 1);

        let stored = get_run(&pool, RunRef::Id(run.id)).await.unwrap();
        assert_eq!(stored.steps[0].status, StepStatus::InProgress);
        assert_eq!(stored.revision, 1);
    }

    #[tokio::test]
    async fn test_cursor_never_moves_back() {
        let pool = setup().await;
        let run = create_run(&pool, &LuaScriptParser, RELEASE).await.unwrap();

        let skipped = save_step_transition(&pool, run.id, StepTransition::skip(3, StepStatus::Pending))
            .await
            .unwrap();
        assert_eq!(skipped.cursor, 1);

        let after = finish(&pool, run.id, 1).await;
        assert_eq!(after.cursor, 2);

        let after = finish(&pool, run.id, 2).await;
        assert_eq!(after.cursor, 3);
        assert_eq!(after.status, RunStatus::Done);
    }

    #[tokio::test]
    async fn test_heartbeat_uses_supplied_time() {
        let pool = setup().await;
        let run = create_run(&pool, &LuaScriptParser, RELEASE).await.unwrap();
        let started_at = Utc::now() - Duration::minutes(10);
        save_step_transition(&pool, run.id, StepTransition::start(1).at(started_at))
            .await
            .unwrap();

        let beat_at = started_at + Duration::minutes(1);
        let beaten = save_step_transition(&pool, run.id, StepTransition::heartbeat(1).at(beat_at))
            .await
            .unwrap();

        assert_eq!(beaten.steps[0].heart_beat, Some(beat_at));
        assert_eq!(beaten.steps[0].status, StepStatus::InProgress);
    }

    #[tokio::test]
    async fn test_find_stale_steps() {
        let pool = setup().await;
        let quiet = create_run(&pool, &LuaScriptParser, RELEASE).await.unwrap();
        let busy = create_run(&pool, &LuaScriptParser, RELEASE).await.unwrap();
        let now = Utc::now();

        save_step_transition(
            &pool,
            quiet.id,
            StepTransition::start(1).at(now - Duration::minutes(5)),
        )
        .await
        .unwrap();
        save_step_transition(&pool, busy.id, StepTransition::start(1).at(now))
            .await
            .unwrap();

        let stale = find_stale_steps(&pool, now, Duration::minutes(1)).await.unwrap();

        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].run_id, quiet.id);
        assert_eq!(stale[0].step.step_id, 1);
    }

    #[tokio::test]
    async fn test_checked_flag_and_filters() {
        let pool = setup().await;
        let first = create_run(&pool, &LuaScriptParser, RELEASE).await.unwrap();
        let second = create_run(&pool, &LuaScriptParser, RELEASE).await.unwrap();
        finish(&pool, second.id, 1).await;

        let checked = set_checked(&pool, RunRef::Uuid(first.uuid), true).await.unwrap();
        assert!(checked.checked);
        assert!(get_run(&pool, RunRef::Id(first.id)).await.unwrap().checked);

        let pending = list_runs(&pool, &RunFilter::default().with_status(RunStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first.id);

        let releases = list_runs(&pool, &RunFilter::default().with_name("Release"))
            .await
            .unwrap();
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[0].id, second.id);
    }
}
