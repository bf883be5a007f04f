//! Uploads: staging song files and handing them to the processor

use bytes::Bytes;
use futures::Stream;
use ksdb_common::db::{uploads, ProcessingError, Upload, UploadStatus};
use ksdb_common::pagination::{self, Page, PageRequest};
use sqlx::SqlitePool;
use std::fmt::Display;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::store::{EntryKind, UploadArea, UploadEntry};
use crate::tasks::{Task, TaskQueue};

/// What lives at a path inside an upload
#[derive(Debug)]
pub enum UploadFileInfo {
    File(UploadEntry),
    Directory(Vec<UploadEntry>, Page),
}

#[derive(Clone)]
pub struct UploadService {
    db: SqlitePool,
    area: UploadArea,
    queue: TaskQueue,
}

impl UploadService {
    pub fn new(db: SqlitePool, area: UploadArea, queue: TaskQueue) -> Self {
        Self { db, area, queue }
    }

    pub async fn create(&self) -> ApiResult<Upload> {
        let upload = Upload::new();
        self.area.create_dir(upload.id).await?;
        uploads::insert(&self.db, &upload).await?;
        info!(upload_id = %upload.id, "Created upload");
        Ok(upload)
    }

    pub async fn list(&self, request: PageRequest) -> ApiResult<(Vec<Upload>, Page)> {
        let (items, total) = uploads::list(&self.db, request).await?;
        let page = Page::new(request, items.len(), total);
        Ok((items, page))
    }

    pub async fn get(&self, id: Uuid) -> ApiResult<Upload> {
        uploads::find(&self.db, id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Upload not found: {}", id)))
    }

    /// Soft delete the upload and drop its staged files
    ///
    /// Songs already imported from it stay in the library.
    pub async fn delete(&self, id: Uuid) -> ApiResult<()> {
        if uploads::soft_delete(&self.db, id).await? {
            info!(upload_id = %id, "Deleted upload");
        }
        self.area.remove_all(id).await?;
        Ok(())
    }

    pub async fn put_file<S, E>(&self, id: Uuid, path: &str, body: S) -> ApiResult<UploadEntry>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
        E: Display,
    {
        self.open_upload(id).await?;
        let entry = self.area.write(id, path, body).await?;
        info!(upload_id = %id, path = %entry.path, size = entry.size, "Stored upload file");
        Ok(entry)
    }

    /// Stat a file, or list a directory page (empty path = upload root)
    pub async fn file_info(
        &self,
        id: Uuid,
        path: &str,
        request: PageRequest,
    ) -> ApiResult<UploadFileInfo> {
        self.get(id).await?;
        let entry = self.area.stat(id, path).await?;
        match entry.kind {
            EntryKind::File => Ok(UploadFileInfo::File(entry)),
            EntryKind::Directory => {
                let entries = self.area.list(id, path).await?;
                let (items, total) = pagination::slice(entries, request);
                let page = Page::new(request, items.len(), total);
                Ok(UploadFileInfo::Directory(items, page))
            }
        }
    }

    /// Remove a staged file or directory; a missing path succeeds
    pub async fn delete_file(&self, id: Uuid, path: &str) -> ApiResult<()> {
        self.open_upload(id).await?;
        if self.area.remove(id, path).await? {
            info!(upload_id = %id, path = %path, "Removed upload file");
        }
        Ok(())
    }

    /// Close the upload and queue it for processing
    pub async fn begin_processing(&self, id: Uuid) -> ApiResult<Upload> {
        let upload = self.get(id).await?;
        if !uploads::transition(&self.db, id, UploadStatus::Open, UploadStatus::Pending).await? {
            return Err(not_open(&upload, "only open uploads can be processed"));
        }
        self.queue.enqueue(Task::ProcessUpload { upload_id: id });
        info!(upload_id = %id, "Upload queued for processing");
        self.get(id).await
    }

    pub async fn errors(
        &self,
        id: Uuid,
        request: PageRequest,
    ) -> ApiResult<(Vec<ProcessingError>, Page)> {
        self.get(id).await?;
        let (items, total) = uploads::list_errors(&self.db, id, request).await?;
        let page = Page::new(request, items.len(), total);
        Ok((items, page))
    }

    async fn open_upload(&self, id: Uuid) -> ApiResult<Upload> {
        let upload = self.get(id).await?;
        if !upload.is_open() {
            return Err(not_open(&upload, "files can only change while it is open"));
        }
        Ok(upload)
    }
}

fn not_open(upload: &Upload, rule: &str) -> ApiError {
    ApiError::Conflict(format!("Upload {} is {}; {}", upload.id, upload.status, rule))
}
