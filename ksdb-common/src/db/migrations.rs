//! Database schema migrations
//!
//! Versioned migrations tracked in the `schema_version` table. Each
//! `migrate_vN` is idempotent, so re-running a partially applied version is
//! safe.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - databases in the field already ran them
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Use ALTER TABLE** over DROP/CREATE to keep data

use crate::{Error, Result};
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Current schema version of the database
///
/// Returns 0 if the schema_version table doesn't exist or has no rows
pub async fn schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations and return the resulting version
pub async fn run_migrations(pool: &SqlitePool) -> Result<i32> {
    create_schema_version_table(pool).await?;
    let current_version = schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(current_version);
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(current_version);
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    let version = schema_version(pool).await?;
    if version != CURRENT_SCHEMA_VERSION {
        return Err(Error::Migration(format!(
            "expected schema v{} after migrating, found v{}",
            CURRENT_SCHEMA_VERSION, version
        )));
    }
    info!("All migrations completed successfully");
    Ok(version)
}

/// Migration v1: base tables
///
/// Timestamps are written by the application as RFC 3339 text. Every entity
/// table carries `deleted_at` for soft deletion.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: files, uploads, upload_processing_errors, songs");

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id BLOB PRIMARY KEY,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            content_type TEXT NOT NULL,
            size INTEGER NOT NULL CHECK (size >= 0),
            checksum TEXT NOT NULL,
            width INTEGER,
            height INTEGER,
            duration_ms INTEGER
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS uploads (
            id BLOB PRIMARY KEY,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            status TEXT NOT NULL DEFAULT 'open'
                CHECK (status IN ('open', 'pending', 'processing', 'done')),
            songs_total INTEGER NOT NULL DEFAULT 0,
            songs_processed INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS upload_processing_errors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            upload_id BLOB NOT NULL REFERENCES uploads(id) ON DELETE CASCADE,
            file TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS songs (
            id BLOB PRIMARY KEY,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            upload_id BLOB REFERENCES uploads(id),

            title TEXT NOT NULL DEFAULT '',
            artist TEXT NOT NULL DEFAULT '',
            genre TEXT NOT NULL DEFAULT '',
            edition TEXT NOT NULL DEFAULT '',
            language TEXT NOT NULL DEFAULT '',
            year INTEGER,
            creator TEXT NOT NULL DEFAULT '',
            comment TEXT NOT NULL DEFAULT '',
            extra TEXT NOT NULL DEFAULT '{}',

            gap_ms INTEGER NOT NULL DEFAULT 0,
            video_gap_ms INTEGER NOT NULL DEFAULT 0,
            start_ms INTEGER NOT NULL DEFAULT 0,
            end_ms INTEGER,
            preview_start_ms INTEGER,
            medley_start_beat INTEGER,
            medley_end_beat INTEGER,
            no_auto_medley INTEGER NOT NULL DEFAULT 0,
            bpm REAL NOT NULL,
            duet_singer_p1 TEXT,
            duet_singer_p2 TEXT,
            music TEXT NOT NULL,

            audio_file_id BLOB REFERENCES files(id),
            video_file_id BLOB REFERENCES files(id),
            cover_file_id BLOB REFERENCES files(id),
            background_file_id BLOB REFERENCES files(id)
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!("  Created base tables");
    Ok(())
}

/// Migration v2: indexes for listing, orphan lookup and upload recovery
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: indexes");

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_songs_created_at ON songs(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_songs_upload_id ON songs(upload_id)",
        "CREATE INDEX IF NOT EXISTS idx_songs_audio_file ON songs(audio_file_id)",
        "CREATE INDEX IF NOT EXISTS idx_songs_video_file ON songs(video_file_id)",
        "CREATE INDEX IF NOT EXISTS idx_songs_cover_file ON songs(cover_file_id)",
        "CREATE INDEX IF NOT EXISTS idx_songs_background_file ON songs(background_file_id)",
        "CREATE INDEX IF NOT EXISTS idx_files_created_at ON files(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_uploads_status ON uploads(status)",
        "CREATE INDEX IF NOT EXISTS idx_upload_errors_upload_id ON upload_processing_errors(upload_id)",
    ];

    for sql in indexes {
        sqlx::query(sql).execute(pool).await?;
    }

    info!("  Created {} indexes", indexes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect;

    async fn setup_test_db() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = connect(&dir.path().join("migrations.db")).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_schema_version_no_table() {
        let (_dir, pool) = setup_test_db().await;
        assert_eq!(schema_version(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_migrations_complete_flow() {
        let (_dir, pool) = setup_test_db().await;

        let version = run_migrations(&pool).await.unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        for table in ["files", "uploads", "upload_processing_errors", "songs"] {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert!(exists, "table {} missing", table);
        }
    }

    #[tokio::test]
    async fn test_run_migrations_idempotent() {
        let (_dir, pool) = setup_test_db().await;

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, CURRENT_SCHEMA_VERSION as i64);
    }

    #[tokio::test]
    async fn test_resume_from_v1() {
        let (_dir, pool) = setup_test_db().await;

        create_schema_version_table(&pool).await.unwrap();
        migrate_v1(&pool).await.unwrap();
        set_schema_version(&pool, 1).await.unwrap();

        assert_eq!(run_migrations(&pool).await.unwrap(), 2);

        let index_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(index_count, 9);
    }
}
