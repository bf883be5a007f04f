//! File record queries

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::models::File;
use crate::Result;

pub async fn insert(pool: &SqlitePool, file: &File) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO files (
            id, created_at, updated_at, content_type, size, checksum,
            width, height, duration_ms
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(file.id)
    .bind(file.created_at)
    .bind(file.updated_at)
    .bind(&file.content_type)
    .bind(file.size)
    .bind(&file.checksum)
    .bind(file.width)
    .bind(file.height)
    .bind(file.duration_ms)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find(pool: &SqlitePool, id: Uuid) -> Result<Option<File>> {
    let file = sqlx::query_as::<_, File>("SELECT * FROM files WHERE id = ? AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(file)
}

/// Live files no live song links to, created before `cutoff`
///
/// The cutoff keeps freshly ingested files (not yet linked to their song)
/// out of the result. Timestamps are stored as RFC 3339 UTC text, which
/// orders the same as the instants it encodes.
pub async fn find_orphaned(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<Vec<File>> {
    let orphans = sqlx::query_as::<_, File>(
        r#"
        SELECT f.* FROM files f
        WHERE f.deleted_at IS NULL
          AND f.created_at < ?
          AND NOT EXISTS (
            SELECT 1 FROM songs s
            WHERE s.deleted_at IS NULL
              AND (s.audio_file_id = f.id
                OR s.video_file_id = f.id
                OR s.cover_file_id = f.id
                OR s.background_file_id = f.id)
          )
        ORDER BY f.created_at
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    Ok(orphans)
}

/// Soft delete; returns false if the file was already gone
pub async fn soft_delete(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE files SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
