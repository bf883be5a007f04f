//! Song media slots

use bytes::Bytes;
use futures::Stream;
use ksdb_common::db::{files, songs, File, MediaSlot};
use sqlx::SqlitePool;
use std::fmt::Display;
use std::io;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::store::{self, BoxReader, Digest, FileStore};
use crate::tasks::{Task, TaskQueue};

#[derive(Clone)]
pub struct MediaService {
    db: SqlitePool,
    store: Arc<dyn FileStore>,
    queue: TaskQueue,
}

impl MediaService {
    pub fn new(db: SqlitePool, store: Arc<dyn FileStore>, queue: TaskQueue) -> Self {
        Self { db, store, queue }
    }

    /// File record and content of a song's media slot
    pub async fn get(&self, song_id: Uuid, slot: MediaSlot) -> ApiResult<(File, BoxReader)> {
        let file = self.current(song_id, slot).await?;
        let reader = match self.store.open(file.id).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ApiError::Internal(format!(
                    "Content of file {} is missing from the store",
                    file.id
                )))
            }
            Err(e) => return Err(e.into()),
        };
        Ok((file, reader))
    }

    /// File record of a song's media slot
    pub async fn current(&self, song_id: Uuid, slot: MediaSlot) -> ApiResult<File> {
        let song = songs::find(&self.db, song_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Song not found: {}", song_id)))?;
        let file_id = song
            .file_id(slot)
            .ok_or_else(|| ApiError::NotFound(format!("Song has no {}", slot)))?;
        files::find(&self.db, file_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Song has no {}", slot)))
    }

    /// Store `body` as the new content of `slot`
    ///
    /// The declared content type is checked before anything is written; a
    /// sniffed type is checked again afterwards.
    pub async fn replace<S, E>(
        &self,
        song_id: Uuid,
        slot: MediaSlot,
        declared_type: Option<&str>,
        expected: Option<Digest>,
        body: S,
    ) -> ApiResult<File>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
        E: Display,
    {
        let song = songs::find(&self.db, song_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Song not found: {}", song_id)))?;

        if let Some(declared) = declared_type.filter(|ct| !is_generic(ct)) {
            if !slot.accepts(declared) {
                return Err(wrong_family(slot, declared));
            }
        }

        let file = store::ingest(self.store.as_ref(), declared_type, expected, body).await?;
        if !slot.accepts(&file.content_type) {
            self.discard(&file).await;
            return Err(wrong_family(slot, &file.content_type));
        }

        // Without its row the blob would be invisible to media:prune
        if let Err(e) = files::insert(&self.db, &file).await {
            self.discard(&file).await;
            return Err(e.into());
        }
        if !songs::set_media(&self.db, song_id, slot, Some(file.id)).await? {
            // Song deleted meanwhile; the new file is now an orphan
            self.queue.enqueue(Task::PruneMedia);
            return Err(ApiError::NotFound(format!("Song not found: {}", song_id)));
        }

        info!(
            song_id = %song_id,
            slot = %slot,
            file_id = %file.id,
            size = file.size,
            "Replaced song media"
        );
        if song.file_id(slot).is_some() {
            self.queue.enqueue(Task::PruneMedia);
        }
        Ok(file)
    }

    async fn discard(&self, file: &File) {
        if let Err(e) = self.store.delete(file.id).await {
            warn!(file_id = %file.id, error = %e, "Failed to remove rejected blob");
        }
    }

    /// Clear a media slot; clearing an empty slot succeeds
    pub async fn delete(&self, song_id: Uuid, slot: MediaSlot) -> ApiResult<()> {
        let song = songs::find(&self.db, song_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Song not found: {}", song_id)))?;
        if song.file_id(slot).is_none() {
            return Ok(());
        }

        songs::set_media(&self.db, song_id, slot, None).await?;
        info!(song_id = %song_id, slot = %slot, "Removed song media");
        self.queue.enqueue(Task::PruneMedia);
        Ok(())
    }
}

fn is_generic(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    essence.is_empty() || essence.eq_ignore_ascii_case("application/octet-stream")
}

fn wrong_family(slot: MediaSlot, content_type: &str) -> ApiError {
    ApiError::UnsupportedMediaType(format!(
        "{} must be {}/*, got {}",
        slot,
        slot.family(),
        content_type
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_generic() {
        assert!(is_generic("application/octet-stream"));
        assert!(is_generic("Application/Octet-Stream; x=y"));
        assert!(is_generic(""));
        assert!(!is_generic("image/png"));
    }

    /// A blob whose file row cannot be written is removed again
    #[tokio::test]
    async fn test_failed_file_insert_removes_blob() {
        use crate::tasks::test_support::test_context;
        use ksdb_common::db::{Song, SongData};
        use ksdb_common::ultrastar::TxtSong;

        let (dir, ctx, _rx) = test_context().await;
        let song = Song::new(
            SongData::from(TxtSong {
                bpm: 100.0,
                ..Default::default()
            }),
            None,
        );
        songs::insert(&ctx.db, &song).await.unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_files BEFORE INSERT ON files \
             BEGIN SELECT RAISE(ABORT, 'database is full'); END",
        )
        .execute(&ctx.db)
        .await
        .unwrap();

        let service = MediaService::new(ctx.db.clone(), ctx.store.clone(), ctx.queue.clone());
        let body = futures::stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"ID3 audio"))]);
        let err = service
            .replace(song.id, MediaSlot::Audio, Some("audio/mpeg"), None, body)
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);

        let blobs = walkdir::WalkDir::new(dir.path().join("media"))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
        assert_eq!(blobs, 0);
        let current = songs::find(&ctx.db, song.id).await.unwrap().unwrap();
        assert_eq!(current.audio_file_id, None);
    }

    #[test]
    fn test_wrong_family_is_415() {
        let err = wrong_family(MediaSlot::Cover, "audio/mpeg");
        assert_eq!(err.status(), axum::http::StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(err.to_string(), "cover must be image/*, got audio/mpeg");
    }
}
