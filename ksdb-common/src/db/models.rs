//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::ultrastar::{Music, TxtSong};

/// Stored media blob
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct File {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub content_type: String,
    pub size: i64,
    /// Lower-case hex SHA-256 of the content
    pub checksum: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration_ms: Option<i64>,
}

impl File {
    /// Record for a blob about to be written under a fresh id
    pub fn new(content_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            content_type: content_type.into(),
            size: 0,
            checksum: String::new(),
            width: None,
            height: None,
            duration_ms: None,
        }
    }
}

/// Song fields that are not identity or media links
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct SongData {
    pub title: String,
    pub artist: String,
    pub genre: String,
    pub edition: String,
    pub language: String,
    pub year: Option<i32>,
    pub creator: String,
    pub comment: String,
    pub extra: Json<BTreeMap<String, String>>,

    pub gap_ms: i64,
    pub video_gap_ms: i64,
    pub start_ms: i64,
    pub end_ms: Option<i64>,
    pub preview_start_ms: Option<i64>,
    pub medley_start_beat: Option<i64>,
    pub medley_end_beat: Option<i64>,
    pub no_auto_medley: bool,
    pub bpm: f64,

    pub duet_singer_p1: Option<String>,
    pub duet_singer_p2: Option<String>,

    pub music: Json<Music>,
}

impl From<TxtSong> for SongData {
    fn from(txt: TxtSong) -> Self {
        Self {
            title: txt.title,
            artist: txt.artist,
            genre: txt.genre,
            edition: txt.edition,
            language: txt.language,
            year: txt.year,
            creator: txt.creator,
            comment: txt.comment,
            extra: Json(txt.extra),
            gap_ms: txt.gap_ms,
            video_gap_ms: txt.video_gap_ms,
            start_ms: txt.start_ms,
            end_ms: txt.end_ms,
            preview_start_ms: txt.preview_start_ms,
            medley_start_beat: txt.medley_start_beat,
            medley_end_beat: txt.medley_end_beat,
            no_auto_medley: txt.no_auto_medley,
            bpm: txt.bpm,
            duet_singer_p1: txt.duet_singer_p1,
            duet_singer_p2: txt.duet_singer_p2,
            music: Json(txt.music),
        }
    }
}

impl SongData {
    /// Convert back into TXT form; media references are left empty
    pub fn to_txt(&self) -> TxtSong {
        TxtSong {
            title: self.title.clone(),
            artist: self.artist.clone(),
            genre: self.genre.clone(),
            edition: self.edition.clone(),
            language: self.language.clone(),
            year: self.year,
            creator: self.creator.clone(),
            comment: self.comment.clone(),
            extra: self.extra.0.clone(),
            audio: None,
            video: None,
            cover: None,
            background: None,
            bpm: self.bpm,
            gap_ms: self.gap_ms,
            video_gap_ms: self.video_gap_ms,
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            preview_start_ms: self.preview_start_ms,
            medley_start_beat: self.medley_start_beat,
            medley_end_beat: self.medley_end_beat,
            no_auto_medley: self.no_auto_medley,
            duet_singer_p1: self.duet_singer_p1.clone(),
            duet_singer_p2: self.duet_singer_p2.clone(),
            music: self.music.0.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Song {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Upload the song was imported from, if any
    pub upload_id: Option<Uuid>,
    #[sqlx(flatten)]
    pub data: SongData,
    pub audio_file_id: Option<Uuid>,
    pub video_file_id: Option<Uuid>,
    pub cover_file_id: Option<Uuid>,
    pub background_file_id: Option<Uuid>,
}

impl Song {
    pub fn new(data: SongData, upload_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            upload_id,
            data,
            audio_file_id: None,
            video_file_id: None,
            cover_file_id: None,
            background_file_id: None,
        }
    }

    pub fn file_id(&self, slot: MediaSlot) -> Option<Uuid> {
        match slot {
            MediaSlot::Audio => self.audio_file_id,
            MediaSlot::Video => self.video_file_id,
            MediaSlot::Cover => self.cover_file_id,
            MediaSlot::Background => self.background_file_id,
        }
    }

    pub fn set_file_id(&mut self, slot: MediaSlot, id: Option<Uuid>) {
        match slot {
            MediaSlot::Audio => self.audio_file_id = id,
            MediaSlot::Video => self.video_file_id = id,
            MediaSlot::Cover => self.cover_file_id = id,
            MediaSlot::Background => self.background_file_id = id,
        }
    }
}

/// The four media files a song can link to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSlot {
    Audio,
    Video,
    Cover,
    Background,
}

impl MediaSlot {
    pub const ALL: [MediaSlot; 4] = [
        MediaSlot::Audio,
        MediaSlot::Video,
        MediaSlot::Cover,
        MediaSlot::Background,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MediaSlot::Audio => "audio",
            MediaSlot::Video => "video",
            MediaSlot::Cover => "cover",
            MediaSlot::Background => "background",
        }
    }

    /// Column of the `songs` table holding the file id
    pub fn column(self) -> &'static str {
        match self {
            MediaSlot::Audio => "audio_file_id",
            MediaSlot::Video => "video_file_id",
            MediaSlot::Cover => "cover_file_id",
            MediaSlot::Background => "background_file_id",
        }
    }

    /// Top-level MIME type accepted in this slot
    pub fn family(self) -> &'static str {
        match self {
            MediaSlot::Audio => "audio",
            MediaSlot::Video => "video",
            MediaSlot::Cover | MediaSlot::Background => "image",
        }
    }

    /// Whether `content_type` belongs to this slot's family
    ///
    /// Parameters such as `; charset=...` are ignored.
    pub fn accepts(self, content_type: &str) -> bool {
        let essence = content_type.split(';').next().unwrap_or("").trim();
        match essence.split_once('/') {
            Some((top, sub)) => top.eq_ignore_ascii_case(self.family()) && !sub.is_empty(),
            None => false,
        }
    }
}

impl fmt::Display for MediaSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload lifecycle: `open -> pending -> processing -> done`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Open,
    Pending,
    Processing,
    Done,
}

impl UploadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Open => "open",
            UploadStatus::Pending => "pending",
            UploadStatus::Processing => "processing",
            UploadStatus::Done => "done",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Upload {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub status: UploadStatus,
    pub songs_total: i64,
    pub songs_processed: i64,
    /// Number of recorded processing errors (computed by the query)
    pub errors: i64,
}

impl Upload {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            status: UploadStatus::Open,
            songs_total: 0,
            songs_processed: 0,
            errors: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == UploadStatus::Open
    }
}

impl Default for Upload {
    fn default() -> Self {
        Self::new()
    }
}

/// A song of an upload that could not be imported (or imported partially)
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ProcessingError {
    pub id: i64,
    pub upload_id: Uuid,
    /// Path of the offending file relative to the upload root
    pub file: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
