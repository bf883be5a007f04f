//! Upload staging area
//!
//! Every upload owns a directory `<upload_dir>/<upload id>` into which
//! clients PUT files by relative path before processing starts.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use ksdb_common::{Error, Result};
use serde::Serialize;
use std::fmt::Display;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// A file or directory inside an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEntry {
    /// Path relative to the upload root, `/`-separated; empty for the root
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl UploadEntry {
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub struct UploadArea {
    root: PathBuf,
}

impl UploadArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Staging directory of an upload
    pub fn dir(&self, upload_id: Uuid) -> PathBuf {
        self.root.join(upload_id.to_string())
    }

    pub async fn create_dir(&self, upload_id: Uuid) -> Result<()> {
        tokio::fs::create_dir_all(self.dir(upload_id)).await?;
        Ok(())
    }

    /// Stream `body` into the file at `rel`, replacing an existing file
    ///
    /// A body that fails midway leaves no file behind.
    pub async fn write<S, E>(&self, upload_id: Uuid, rel: &str, mut body: S) -> Result<UploadEntry>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send,
        E: Display,
    {
        let rel_path = sanitize(rel)?;
        if rel_path.as_os_str().is_empty() {
            return Err(Error::InvalidInput("File path must not be empty".to_string()));
        }
        let root = self.dir(upload_id);
        let target = root.join(&rel_path);

        // Every existing ancestor must be a directory.
        let mut ancestor = root.clone();
        for component in rel_path.parent().into_iter().flat_map(Path::components) {
            ancestor.push(component);
            match tokio::fs::metadata(&ancestor).await {
                Ok(meta) if !meta.is_dir() => {
                    return Err(Error::Conflict(format!(
                        "{} is a file",
                        display_path(&ancestor, &root)
                    )))
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            }
        }
        if let Ok(meta) = tokio::fs::metadata(&target).await {
            if meta.is_dir() {
                return Err(Error::Conflict(format!("{} is a directory", rel)));
            }
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&target).await?;
        if let Err(e) = copy_body(file, &mut body).await {
            if let Err(cleanup) = tokio::fs::remove_file(&target).await {
                warn!(path = %target.display(), error = %cleanup, "Failed to remove partial upload file");
            }
            return Err(e.into());
        }

        self.stat(upload_id, rel).await
    }

    /// Describe the entry at `rel` (empty = upload root)
    pub async fn stat(&self, upload_id: Uuid, rel: &str) -> Result<UploadEntry> {
        let rel_path = sanitize(rel)?;
        let path = self.dir(upload_id).join(&rel_path);
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if rel_path.as_os_str().is_empty() {
                    // Root of an upload that has no files yet
                    return Ok(UploadEntry {
                        path: String::new(),
                        kind: EntryKind::Directory,
                        size: 0,
                        modified: None,
                    });
                }
                return Err(Error::NotFound(format!("No such upload file: {}", rel)));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(entry(to_slash(&rel_path), &meta))
    }

    /// Entries of the directory at `rel`, sorted by name
    pub async fn list(&self, upload_id: Uuid, rel: &str) -> Result<Vec<UploadEntry>> {
        let rel_path = sanitize(rel)?;
        let dir = self.dir(upload_id).join(&rel_path);
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound && rel_path.as_os_str().is_empty() => {
                return Ok(Vec::new())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("No such upload directory: {}", rel)))
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(item) = read_dir.next_entry().await? {
            let meta = item.metadata().await?;
            let child = rel_path.join(item.file_name());
            entries.push(entry(to_slash(&child), &meta));
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Remove the file or directory tree at `rel`
    ///
    /// Returns false when nothing was there.
    pub async fn remove(&self, upload_id: Uuid, rel: &str) -> Result<bool> {
        let rel_path = sanitize(rel)?;
        if rel_path.as_os_str().is_empty() {
            return Err(Error::InvalidInput("File path must not be empty".to_string()));
        }
        let path = self.dir(upload_id).join(&rel_path);
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(true)
    }

    /// Remove the whole staging directory of an upload
    pub async fn remove_all(&self, upload_id: Uuid) -> Result<()> {
        match tokio::fs::remove_dir_all(self.dir(upload_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn entry(path: String, meta: &std::fs::Metadata) -> UploadEntry {
    let kind = if meta.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    UploadEntry {
        path,
        kind,
        size: if meta.is_dir() { 0 } else { meta.len() },
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
    }
}

/// Validate a client path and turn it into a relative `PathBuf`
fn sanitize(rel: &str) -> Result<PathBuf> {
    if rel.starts_with('/') || rel.starts_with('\\') {
        return Err(Error::InvalidInput(format!("Path must be relative: {}", rel)));
    }
    let mut path = PathBuf::new();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => {
                if part.to_string_lossy().contains(['\0', '\\']) {
                    return Err(Error::InvalidInput(format!("Invalid path: {}", rel)));
                }
                path.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidInput(format!(
                    "Path must stay inside the upload: {}",
                    rel
                )))
            }
        }
    }
    Ok(path)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

async fn copy_body<S, E>(mut file: tokio::fs::File, body: &mut S) -> io::Result<()>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send,
    E: Display,
{
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| io::Error::other(format!("Failed to read body: {}", e)))?;
        file.write_all(&chunk).await?;
    }
    file.shutdown().await
}

fn display_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).map(to_slash).unwrap_or_default()
}
