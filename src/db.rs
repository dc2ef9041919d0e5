//! SQLite connection pool.
//!
//! Every writer (ingestion, message import, registration) shares one pool.
//! WAL mode lets searches read while a document is being ingested; writers
//! that still collide wait up to [`BUSY_TIMEOUT`] before the statement
//! fails and is reported as a storage conflict.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

use crate::config::Config;

pub const MAX_CONNECTIONS: u32 = 5;
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
}

/// Open the pool for `config.db.path`, creating the file and its parent
/// directory if missing.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options(db_path))
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_connect_creates_file_in_wal_mode() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/recall.sqlite");
        let config: Config =
            toml::from_str(&format!("[db]\npath = \"{}\"\n", path.display())).unwrap();

        let pool = connect(&config).await.unwrap();
        assert!(path.exists());
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        pool.close().await;
    }
}
