//! Database pool, schema migrations, models and queries

pub mod files;
pub mod migrations;
pub mod models;
pub mod songs;
pub mod uploads;

pub use migrations::{run_migrations, schema_version, CURRENT_SCHEMA_VERSION};
pub use models::*;

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Open (creating if needed) the SQLite database at `path`
///
/// Every pooled connection gets foreign keys, WAL journaling and a busy
/// timeout so the HTTP handlers and the task workers can write concurrently.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    let newly_created = !path.exists();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", path.display());
    } else {
        info!("Opened existing database: {}", path.display());
    }

    Ok(pool)
}

/// Connect and bring the schema up to date
pub async fn init_database(path: &Path) -> Result<SqlitePool> {
    let pool = connect(path).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ksdb.db");

        let pool = connect(&path).await.unwrap();
        assert!(path.exists());

        let fk: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(fk, 1);

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
