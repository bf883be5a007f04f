//! Database initialization against files on disk

use ksdb_common::db::{init_database, migrations::CURRENT_SCHEMA_VERSION, schema_version};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("ksdb.db");

    let pool = init_database(&db_path).await;
    assert!(pool.is_ok(), "Database initialization failed: {:?}", pool.err());
    assert!(db_path.exists(), "Database file was not created");

    let version = schema_version(&pool.unwrap()).await.unwrap();
    assert_eq!(version, CURRENT_SCHEMA_VERSION);
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("ksdb.db");

    let first = init_database(&db_path).await.unwrap();
    first.close().await;

    // Migrations are idempotent on reopen
    let second = init_database(&db_path).await;
    assert!(second.is_ok(), "Failed to open existing database: {:?}", second.err());
    assert_eq!(
        schema_version(&second.unwrap()).await.unwrap(),
        CURRENT_SCHEMA_VERSION
    );
}

#[tokio::test]
async fn test_tables_exist() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("ksdb.db")).await.unwrap();

    for table in ["songs", "files", "uploads", "upload_processing_errors"] {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists, "missing table {}", table);
    }
}
