//! Response bodies
//!
//! Database models are mapped to these before rendering so the wire format
//! does not follow schema changes by accident.

use chrono::{DateTime, Utc};
use ksdb_common::db::{File, ProcessingError, Song, Upload, UploadStatus};
use ksdb_common::ultrastar::Music;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::negotiate::XmlName;
use crate::store::{EntryKind, UploadEntry};

#[derive(Debug, Clone, Serialize)]
pub struct SongSchema {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<Uuid>,

    pub title: String,
    pub artist: String,
    pub genre: String,
    pub edition: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub creator: String,
    pub comment: String,
    pub extra: BTreeMap<String, String>,

    pub bpm: f64,
    pub gap_ms: i64,
    pub video_gap_ms: i64,
    pub start_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_start_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medley_start_beat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medley_end_beat: Option<i64>,
    pub no_auto_medley: bool,

    pub duet: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duet_singer_p1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duet_singer_p2: Option<String>,

    pub media: MediaLinks,

    /// Notes; left out of collection listings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub music: Option<Music>,
}

/// File ids currently linked to the song's media slots
#[derive(Debug, Clone, Default, Serialize)]
pub struct MediaLinks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<Uuid>,
}

impl SongSchema {
    /// Everything including the notes
    pub fn full(song: &Song) -> Self {
        let mut schema = Self::summary(song);
        schema.music = Some(song.data.music.0.clone());
        schema
    }

    /// Metadata only, as used in listings
    pub fn summary(song: &Song) -> Self {
        let d = &song.data;
        Self {
            id: song.id,
            created_at: song.created_at,
            updated_at: song.updated_at,
            upload_id: song.upload_id,
            title: d.title.clone(),
            artist: d.artist.clone(),
            genre: d.genre.clone(),
            edition: d.edition.clone(),
            language: d.language.clone(),
            year: d.year,
            creator: d.creator.clone(),
            comment: d.comment.clone(),
            extra: d.extra.0.clone(),
            bpm: d.bpm,
            gap_ms: d.gap_ms,
            video_gap_ms: d.video_gap_ms,
            start_ms: d.start_ms,
            end_ms: d.end_ms,
            preview_start_ms: d.preview_start_ms,
            medley_start_beat: d.medley_start_beat,
            medley_end_beat: d.medley_end_beat,
            no_auto_medley: d.no_auto_medley,
            duet: d.music.0.is_duet(),
            duet_singer_p1: d.duet_singer_p1.clone(),
            duet_singer_p2: d.duet_singer_p2.clone(),
            media: MediaLinks {
                audio: song.audio_file_id,
                video: song.video_file_id,
                cover: song.cover_file_id,
                background: song.background_file_id,
            },
            music: None,
        }
    }
}

impl XmlName for SongSchema {
    const ROOT: &'static str = "song";
    const LIST: &'static str = "songs";
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSchema {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub content_type: String,
    pub size: i64,
    /// Hex SHA-256, also served as the `ETag`
    pub checksum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl From<&File> for FileSchema {
    fn from(file: &File) -> Self {
        Self {
            id: file.id,
            created_at: file.created_at,
            content_type: file.content_type.clone(),
            size: file.size,
            checksum: file.checksum.clone(),
            width: file.width,
            height: file.height,
            duration_ms: file.duration_ms,
        }
    }
}

impl XmlName for FileSchema {
    const ROOT: &'static str = "file";
    const LIST: &'static str = "files";
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadSchema {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: UploadStatus,
    pub songs_total: i64,
    pub songs_processed: i64,
    pub errors: i64,
}

impl From<&Upload> for UploadSchema {
    fn from(upload: &Upload) -> Self {
        Self {
            id: upload.id,
            created_at: upload.created_at,
            updated_at: upload.updated_at,
            status: upload.status,
            songs_total: upload.songs_total,
            songs_processed: upload.songs_processed,
            errors: upload.errors,
        }
    }
}

impl XmlName for UploadSchema {
    const ROOT: &'static str = "upload";
    const LIST: &'static str = "uploads";
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingErrorSchema {
    pub id: i64,
    /// Path of the offending file inside the upload
    pub file: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ProcessingError> for ProcessingErrorSchema {
    fn from(error: &ProcessingError) -> Self {
        Self {
            id: error.id,
            file: error.file.clone(),
            message: error.message.clone(),
            created_at: error.created_at,
        }
    }
}

impl XmlName for ProcessingErrorSchema {
    const ROOT: &'static str = "error";
    const LIST: &'static str = "errors";
}

#[derive(Debug, Clone, Serialize)]
pub struct EntrySchema {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl From<&UploadEntry> for EntrySchema {
    fn from(entry: &UploadEntry) -> Self {
        Self {
            path: entry.path.clone(),
            name: entry.name().to_string(),
            kind: entry.kind,
            size: entry.size,
            modified: entry.modified,
        }
    }
}

impl XmlName for EntrySchema {
    const ROOT: &'static str = "entry";
    const LIST: &'static str = "entries";
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `unavailable` when the database cannot be reached
    pub status: String,
    pub module: String,
    pub version: String,
    pub git_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<i32>,
    pub uptime_seconds: u64,
}

impl XmlName for HealthResponse {
    const ROOT: &'static str = "health";
    const LIST: &'static str = "health";
}
