//! Song queries

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::models::{MediaSlot, Song, SongData};
use crate::pagination::PageRequest;
use crate::Result;

pub async fn insert(pool: &SqlitePool, song: &Song) -> Result<()> {
    let d = &song.data;
    sqlx::query(
        r#"
        INSERT INTO songs (
            id, created_at, updated_at, upload_id,
            title, artist, genre, edition, language, year, creator, comment, extra,
            gap_ms, video_gap_ms, start_ms, end_ms, preview_start_ms,
            medley_start_beat, medley_end_beat, no_auto_medley, bpm,
            duet_singer_p1, duet_singer_p2, music,
            audio_file_id, video_file_id, cover_file_id, background_file_id
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(song.id)
    .bind(song.created_at)
    .bind(song.updated_at)
    .bind(song.upload_id)
    .bind(&d.title)
    .bind(&d.artist)
    .bind(&d.genre)
    .bind(&d.edition)
    .bind(&d.language)
    .bind(d.year)
    .bind(&d.creator)
    .bind(&d.comment)
    .bind(&d.extra)
    .bind(d.gap_ms)
    .bind(d.video_gap_ms)
    .bind(d.start_ms)
    .bind(d.end_ms)
    .bind(d.preview_start_ms)
    .bind(d.medley_start_beat)
    .bind(d.medley_end_beat)
    .bind(d.no_auto_medley)
    .bind(d.bpm)
    .bind(&d.duet_singer_p1)
    .bind(&d.duet_singer_p2)
    .bind(&d.music)
    .bind(song.audio_file_id)
    .bind(song.video_file_id)
    .bind(song.cover_file_id)
    .bind(song.background_file_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Live song by id
pub async fn find(pool: &SqlitePool, id: Uuid) -> Result<Option<Song>> {
    let song = sqlx::query_as::<_, Song>("SELECT * FROM songs WHERE id = ? AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(song)
}

/// One page of live songs in creation order, plus the total count
pub async fn list(pool: &SqlitePool, page: PageRequest) -> Result<(Vec<Song>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM songs WHERE deleted_at IS NULL")
        .fetch_one(pool)
        .await?;

    let songs = sqlx::query_as::<_, Song>(
        r#"
        SELECT * FROM songs
        WHERE deleted_at IS NULL
        ORDER BY created_at, rowid
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(page.limit)
    .bind(page.offset)
    .fetch_all(pool)
    .await?;

    Ok((songs, total))
}

/// Replace the metadata and notes of a live song
///
/// Returns false if the song does not exist.
pub async fn update_data(pool: &SqlitePool, id: Uuid, d: &SongData) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE songs SET
            updated_at = ?,
            title = ?, artist = ?, genre = ?, edition = ?, language = ?, year = ?,
            creator = ?, comment = ?, extra = ?,
            gap_ms = ?, video_gap_ms = ?, start_ms = ?, end_ms = ?, preview_start_ms = ?,
            medley_start_beat = ?, medley_end_beat = ?, no_auto_medley = ?, bpm = ?,
            duet_singer_p1 = ?, duet_singer_p2 = ?, music = ?
        WHERE id = ? AND deleted_at IS NULL
        "#,
    )
    .bind(Utc::now())
    .bind(&d.title)
    .bind(&d.artist)
    .bind(&d.genre)
    .bind(&d.edition)
    .bind(&d.language)
    .bind(d.year)
    .bind(&d.creator)
    .bind(&d.comment)
    .bind(&d.extra)
    .bind(d.gap_ms)
    .bind(d.video_gap_ms)
    .bind(d.start_ms)
    .bind(d.end_ms)
    .bind(d.preview_start_ms)
    .bind(d.medley_start_beat)
    .bind(d.medley_end_beat)
    .bind(d.no_auto_medley)
    .bind(d.bpm)
    .bind(&d.duet_singer_p1)
    .bind(&d.duet_singer_p2)
    .bind(&d.music)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Point a media slot at a file (or clear it)
pub async fn set_media(
    pool: &SqlitePool,
    id: Uuid,
    slot: MediaSlot,
    file_id: Option<Uuid>,
) -> Result<bool> {
    // Column names come from a closed enum, never from input.
    let sql = format!(
        "UPDATE songs SET {} = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        slot.column()
    );
    let result = sqlx::query(&sql)
        .bind(file_id)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Soft delete; returns false if the song was already gone
pub async fn soft_delete(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE songs SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Soft delete every live song imported from `upload_id`
pub async fn soft_delete_by_upload(pool: &SqlitePool, upload_id: Uuid) -> Result<u64> {
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE songs SET deleted_at = ?, updated_at = ? WHERE upload_id = ? AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(now)
    .bind(upload_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
