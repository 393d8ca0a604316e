//! Configuration module
//!
//! Resolves where the store lives and how long a step may stay silent.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use stepsman_store::db::{StoreOptions, database_url};

/// Database file name inside the store directory
pub const DATABASE_FILE: &str = "stepsman.db";

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL of the store
    pub database_url: String,

    /// Heartbeat age after which an in-progress step counts as stale
    pub stale_after: chrono::Duration,

    pub store_options: StoreOptions,
}

impl Config {
    /// Build the configuration from command-line values
    ///
    /// An explicit database URL wins. Otherwise the store lives in
    /// `store_dir` (or `$HOME/.stepsman`), which is created if missing.
    pub fn resolve(
        store_dir: Option<PathBuf>,
        database_url_override: Option<String>,
        stale_after_secs: u64,
    ) -> Result<Self> {
        let database_url = match database_url_override {
            Some(url) => url,
            None => {
                let dir = match store_dir {
                    Some(dir) => dir,
                    None => default_store_dir()?,
                };
                prepare_store_dir(&dir)?;
                database_url(&dir.join(DATABASE_FILE))
            }
        };

        let stale_after_secs =
            i64::try_from(stale_after_secs).context("--stale-after is too large")?;

        Ok(Self {
            database_url,
            stale_after: chrono::Duration::seconds(stale_after_secs),
            store_options: StoreOptions::default(),
        })
    }
}

fn default_store_dir() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .context("HOME is not set; pass --store-dir or set STEPSMAN_HOME")?;
    Ok(PathBuf::from(home).join(".stepsman"))
}

fn prepare_store_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create store directory {}", dir.display()))
}
