//! Media blob storage and upload staging
//!
//! Blobs are addressed by the id of their `files` row. [`FsStore`] keeps them
//! on the local filesystem, sharded by the first two hex characters of the
//! id so no single directory grows unbounded.

pub mod ingest;
pub mod probe;
pub mod uploads;

pub use ingest::{ingest, parse_content_digest, Digest};
pub use uploads::{EntryKind, UploadArea, UploadEntry};

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Blob storage keyed by file id
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Create (or truncate) the blob for `id`
    async fn create(&self, id: Uuid) -> io::Result<BoxWriter>;

    /// Open the blob for `id`; `NotFound` if it does not exist
    async fn open(&self, id: Uuid) -> io::Result<BoxReader>;

    /// Remove the blob; removing a missing blob succeeds
    async fn delete(&self, id: Uuid) -> io::Result<()>;

    /// Local path of the blob, for stores that keep blobs on disk
    fn local_path(&self, id: Uuid) -> Option<PathBuf>;
}

/// Filesystem store: `<root>/<first two hex chars>/<uuid>`
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, id: Uuid) -> PathBuf {
        let name = id.simple().to_string();
        self.root.join(&name[..2]).join(id.to_string())
    }
}

#[async_trait]
impl FileStore for FsStore {
    async fn create(&self, id: Uuid) -> io::Result<BoxWriter> {
        let path = self.path(id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&path).await?;
        Ok(Box::new(file))
    }

    async fn open(&self, id: Uuid) -> io::Result<BoxReader> {
        let file = tokio::fs::File::open(self.path(id)).await?;
        Ok(Box::new(file))
    }

    async fn delete(&self, id: Uuid) -> io::Result<()> {
        match tokio::fs::remove_file(self.path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn local_path(&self, id: Uuid) -> Option<PathBuf> {
        Some(self.path(id))
    }
}
