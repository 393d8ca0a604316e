//! Schema Migrations
//!
//! The schema version lives in a singleton `migration` row (id = 1). On every
//! start, [`upgrade`] applies each registered migration newer than the stored
//! version, in order, inside ONE transaction, and bumps the stored version
//! after each. Either the store ends on the latest version or nothing changes.
//!
//! To evolve the schema, append a [`Migration`] to [`MIGRATIONS`]. Statements
//! must be additive so that a fresh store and an old store converge.

use sqlx::SqlitePool;

use crate::error::{PersistContext, Result, StoreError};

/// One versioned schema upgrade
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version the store is at once this migration is applied
    pub version: i64,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

/// Every known migration, in increasing version order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create runs table and indexes",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT,
                name TEXT,
                status INTEGER,
                checked INTEGER,
                script TEXT
            )
            "#,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_uuid ON runs (uuid)",
            "CREATE INDEX IF NOT EXISTS idx_runs_name_status ON runs (name, status)",
            "CREATE INDEX IF NOT EXISTS idx_runs_status ON runs (status)",
        ],
    },
    Migration {
        version: 2,
        description: "embed step state, cursor and revision in runs",
        statements: &[
            "ALTER TABLE runs ADD COLUMN cursor INTEGER NOT NULL DEFAULT 1",
            "ALTER TABLE runs ADD COLUMN steps TEXT NOT NULL DEFAULT '[]'",
            "ALTER TABLE runs ADD COLUMN revision INTEGER NOT NULL DEFAULT 0",
        ],
    },
];

/// Highest version in a registry, 0 if empty
pub fn latest_version(registry: &[Migration]) -> i64 {
    registry.iter().map(|m| m.version).max().unwrap_or(0)
}

/// Bring the store up to the latest known schema version
///
/// Idempotent; returns the stored version afterwards.
pub async fn upgrade(pool: &SqlitePool) -> Result<i64> {
    upgrade_with(pool, MIGRATIONS).await
}

/// Apply the migrations of `registry` that are newer than the stored version
pub async fn upgrade_with(pool: &SqlitePool, registry: &[Migration]) -> Result<i64> {
    validate_registry(registry)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migration (
            id INTEGER PRIMARY KEY,
            version INTEGER
        )
        "#,
    )
    .execute(pool)
    .await
    .during("verify migration table")?;

    // Dropping the transaction without commit rolls everything back
    let mut tx = pool.begin().await.during("start migration transaction")?;

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM migration")
        .fetch_one(&mut *tx)
        .await
        .during("count migration rows")?;

    if count == 0 {
        sqlx::query("INSERT INTO migration (id, version) VALUES (1, 0)")
            .execute(&mut *tx)
            .await
            .during("add migration row")?;
    }

    let current: i64 = sqlx::query_scalar("SELECT version FROM migration WHERE id = 1")
        .fetch_one(&mut *tx)
        .await
        .during("read schema version")?;

    let latest = latest_version(registry);
    if current > latest {
        tracing::warn!(
            "Store schema version {} is newer than this build knows ({})",
            current,
            latest
        );
    }

    let mut version = current;
    for migration in registry.iter().filter(|m| m.version > current) {
        tracing::info!(
            "Applying migration {}: {}",
            migration.version,
            migration.description
        );

        for statement in migration.statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .during(format!("apply migration {}", migration.version))?;
        }

        sqlx::query("UPDATE migration SET version = ? WHERE id = 1")
            .bind(migration.version)
            .execute(&mut *tx)
            .await
            .during(format!("record migration {}", migration.version))?;

        version = migration.version;
    }

    tx.commit().await.during("commit migration transaction")?;

    if version != current {
        tracing::info!("Schema upgraded from version {} to {}", current, version);
    }

    Ok(version)
}

/// Stored schema version, 0 for a store that was never migrated
pub async fn current_version(pool: &SqlitePool) -> Result<i64> {
    let has_table: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'migration'",
    )
    .fetch_one(pool)
    .await
    .during("look up migration table")?;

    if has_table == 0 {
        return Ok(0);
    }

    let version: Option<i64> = sqlx::query_scalar("SELECT version FROM migration WHERE id = 1")
        .fetch_optional(pool)
        .await
        .during("read schema version")?;

    Ok(version.unwrap_or(0))
}

fn validate_registry(registry: &[Migration]) -> Result<()> {
    let mut previous = 0;
    for migration in registry {
        if migration.version <= previous {
            return Err(StoreError::MigrationRegistry(format!(
                "version {} follows version {}",
                migration.version, previous
            )));
        }
        previous = migration.version;
    }
    Ok(())
}
