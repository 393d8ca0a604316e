use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PersistContext, Result};
use crate::migrations;

/// Connection pool settings
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// How long SQLite waits on a locked database before giving up
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 4,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// `sqlite://` URL for a database file
pub fn database_url(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}

/// Open a file-backed pool, creating the database file if needed
pub async fn create_pool_with(
    database_url: &str,
    options: &StoreOptions,
) -> std::result::Result<SqlitePool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(options.busy_timeout);

    SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .acquire_timeout(options.acquire_timeout)
        .connect_with(connect_options)
        .await
}

/// Private in-memory database, one per call
///
/// A single connection that is never recycled, since every SQLite
/// connection to `:memory:` sees its own database.
pub async fn create_memory_pool() -> std::result::Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Open the store and bring its schema up to date
///
/// Fails if the database cannot be reached or any migration fails; callers
/// must not continue with a store in that state.
pub async fn open(database_url: &str, options: &StoreOptions) -> Result<SqlitePool> {
    let pool = if is_memory_url(database_url) {
        create_memory_pool().await
    } else {
        create_pool_with(database_url, options).await
    }
    .during(format!("open database {}", database_url))?;

    let version = migrations::upgrade(&pool).await?;
    tracing::info!("Store ready at schema version {}", version);

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_file_and_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stepsman.db");
        let url = database_url(&path);

        let pool = open(&url, &StoreOptions::default()).await.unwrap();

        assert!(path.exists());
        let version = migrations::current_version(&pool).await.unwrap();
        assert_eq!(version, migrations::latest_version(migrations::MIGRATIONS));
    }

    #[tokio::test]
    async fn test_open_memory_url_keeps_schema() {
        let pool = open("sqlite::memory:", &StoreOptions::default()).await.unwrap();

        // Later acquires must see the migrated database
        for _ in 0..3 {
            let version = migrations::current_version(&pool).await.unwrap();
            assert_eq!(version, migrations::latest_version(migrations::MIGRATIONS));
        }
        sqlx::query("SELECT steps FROM runs").fetch_all(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_pools_are_isolated() {
        let first = create_memory_pool().await.unwrap();
        let second = create_memory_pool().await.unwrap();

        migrations::upgrade(&first).await.unwrap();

        assert_eq!(migrations::current_version(&second).await.unwrap(), 0);
    }
}
