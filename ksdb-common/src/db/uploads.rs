//! Upload and processing error queries

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::models::{ProcessingError, Upload, UploadStatus};
use crate::pagination::PageRequest;
use crate::Result;

const SELECT_UPLOAD: &str = r#"
    SELECT u.*,
        (SELECT COUNT(*) FROM upload_processing_errors e WHERE e.upload_id = u.id) AS errors
    FROM uploads u
"#;

pub async fn insert(pool: &SqlitePool, upload: &Upload) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO uploads (id, created_at, updated_at, status, songs_total, songs_processed)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(upload.id)
    .bind(upload.created_at)
    .bind(upload.updated_at)
    .bind(upload.status)
    .bind(upload.songs_total)
    .bind(upload.songs_processed)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find(pool: &SqlitePool, id: Uuid) -> Result<Option<Upload>> {
    let sql = format!("{} WHERE u.id = ? AND u.deleted_at IS NULL", SELECT_UPLOAD);
    let upload = sqlx::query_as::<_, Upload>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(upload)
}

/// One page of live uploads in creation order, plus the total count
pub async fn list(pool: &SqlitePool, page: PageRequest) -> Result<(Vec<Upload>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM uploads WHERE deleted_at IS NULL")
        .fetch_one(pool)
        .await?;

    let sql = format!(
        "{} WHERE u.deleted_at IS NULL ORDER BY u.created_at, u.rowid LIMIT ? OFFSET ?",
        SELECT_UPLOAD
    );
    let uploads = sqlx::query_as::<_, Upload>(&sql)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(pool)
        .await?;

    Ok((uploads, total))
}

/// Live uploads currently in `status`
pub async fn list_by_status(pool: &SqlitePool, status: UploadStatus) -> Result<Vec<Upload>> {
    let sql = format!(
        "{} WHERE u.status = ? AND u.deleted_at IS NULL ORDER BY u.created_at",
        SELECT_UPLOAD
    );
    let uploads = sqlx::query_as::<_, Upload>(&sql)
        .bind(status)
        .fetch_all(pool)
        .await?;
    Ok(uploads)
}

/// Compare-and-set the status of a live upload
///
/// Returns false when the upload is missing or not in `from`, so two
/// concurrent callers cannot both win the same transition.
pub async fn transition(
    pool: &SqlitePool,
    id: Uuid,
    from: UploadStatus,
    to: UploadStatus,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE uploads SET status = ?, updated_at = ?
        WHERE id = ? AND status = ? AND deleted_at IS NULL
        "#,
    )
    .bind(to)
    .bind(Utc::now())
    .bind(id)
    .bind(from)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_progress(pool: &SqlitePool, id: Uuid, total: i64, processed: i64) -> Result<()> {
    sqlx::query(
        "UPDATE uploads SET songs_total = ?, songs_processed = ?, updated_at = ? WHERE id = ?",
    )
    .bind(total)
    .bind(processed)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Soft delete; returns false if the upload was already gone
pub async fn soft_delete(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE uploads SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn add_error(pool: &SqlitePool, upload_id: Uuid, file: &str, message: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO upload_processing_errors (upload_id, file, message, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(upload_id)
    .bind(file)
    .bind(message)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// One page of an upload's processing errors in insertion order
pub async fn list_errors(
    pool: &SqlitePool,
    upload_id: Uuid,
    page: PageRequest,
) -> Result<(Vec<ProcessingError>, i64)> {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM upload_processing_errors WHERE upload_id = ?")
            .bind(upload_id)
            .fetch_one(pool)
            .await?;

    let errors = sqlx::query_as::<_, ProcessingError>(
        r#"
        SELECT * FROM upload_processing_errors
        WHERE upload_id = ?
        ORDER BY id
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(upload_id)
    .bind(page.limit)
    .bind(page.offset)
    .fetch_all(pool)
    .await?;

    Ok((errors, total))
}

/// Drop errors left by an earlier processing attempt
pub async fn clear_errors(pool: &SqlitePool, upload_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM upload_processing_errors WHERE upload_id = ?")
        .bind(upload_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;

    #[tokio::test]
    async fn test_insert_find_list() {
        let (_dir, pool) = test_pool().await;
        let first = Upload::new();
        let second = Upload::new();
        insert(&pool, &first).await.unwrap();
        insert(&pool, &second).await.unwrap();

        let found = find(&pool, first.id).await.unwrap().unwrap();
        assert_eq!(found.status, UploadStatus::Open);
        assert_eq!(found.errors, 0);

        let (page, total) = list(&pool, PageRequest { limit: 1, offset: 1 }).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page[0].id, second.id);
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let (_dir, pool) = test_pool().await;
        let upload = Upload::new();
        insert(&pool, &upload).await.unwrap();

        assert!(transition(&pool, upload.id, UploadStatus::Open, UploadStatus::Pending)
            .await
            .unwrap());
        assert!(!transition(&pool, upload.id, UploadStatus::Open, UploadStatus::Pending)
            .await
            .unwrap());

        let pending = list_by_status(&pool, UploadStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(list_by_status(&pool, UploadStatus::Open).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_progress_and_errors() {
        let (_dir, pool) = test_pool().await;
        let upload = Upload::new();
        insert(&pool, &upload).await.unwrap();

        set_progress(&pool, upload.id, 3, 2).await.unwrap();
        add_error(&pool, upload.id, "a/song.txt", "line 4: invalid number").await.unwrap();
        add_error(&pool, upload.id, "b/song.txt", "missing #BPM header").await.unwrap();

        let found = find(&pool, upload.id).await.unwrap().unwrap();
        assert_eq!((found.songs_total, found.songs_processed, found.errors), (3, 2, 2));

        let (errors, total) = list_errors(&pool, upload.id, PageRequest { limit: 1, offset: 1 })
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(errors[0].file, "b/song.txt");

        assert_eq!(clear_errors(&pool, upload.id).await.unwrap(), 2);
        assert_eq!(find(&pool, upload.id).await.unwrap().unwrap().errors, 0);
    }

    #[tokio::test]
    async fn test_soft_delete() {
        let (_dir, pool) = test_pool().await;
        let upload = Upload::new();
        insert(&pool, &upload).await.unwrap();

        assert!(soft_delete(&pool, upload.id).await.unwrap());
        assert!(find(&pool, upload.id).await.unwrap().is_none());
        assert!(!transition(&pool, upload.id, UploadStatus::Open, UploadStatus::Pending)
            .await
            .unwrap());
    }
}
