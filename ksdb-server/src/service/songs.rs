//! Song catalogue operations

use ksdb_common::db::{files, songs, MediaSlot, Song, SongData};
use ksdb_common::pagination::{Page, PageRequest};
use ksdb_common::ultrastar;
use serde::{Deserialize, Deserializer};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::tasks::{Task, TaskQueue};

#[derive(Clone)]
pub struct SongService {
    db: SqlitePool,
    queue: TaskQueue,
}

impl SongService {
    pub fn new(db: SqlitePool, queue: TaskQueue) -> Self {
        Self { db, queue }
    }

    pub async fn list(&self, request: PageRequest) -> ApiResult<(Vec<Song>, Page)> {
        let (items, total) = songs::list(&self.db, request).await?;
        let page = Page::new(request, items.len(), total);
        Ok((items, page))
    }

    /// Create a song from the text of an UltraStar file
    ///
    /// Media references in the file are ignored; media is uploaded
    /// separately per slot.
    pub async fn create_from_txt(&self, text: &str) -> ApiResult<Song> {
        let txt = ultrastar::parse(text).map_err(ksdb_common::Error::from)?;
        let song = Song::new(SongData::from(txt), None);
        songs::insert(&self.db, &song).await?;
        info!(song_id = %song.id, title = %song.data.title, "Created song");
        Ok(song)
    }

    pub async fn get(&self, id: Uuid) -> ApiResult<Song> {
        songs::find(&self.db, id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Song not found: {}", id)))
    }

    pub async fn update(&self, id: Uuid, patch: SongPatch) -> ApiResult<Song> {
        let mut song = self.get(id).await?;
        patch.apply(&mut song.data)?;
        if !songs::update_data(&self.db, id, &song.data).await? {
            return Err(ApiError::NotFound(format!("Song not found: {}", id)));
        }
        self.get(id).await
    }

    /// Soft delete; deleting a missing song succeeds
    pub async fn delete(&self, id: Uuid) -> ApiResult<()> {
        if songs::soft_delete(&self.db, id).await? {
            info!(song_id = %id, "Deleted song");
            self.queue.enqueue(Task::PruneMedia);
        }
        Ok(())
    }

    /// Render the song as an UltraStar file
    ///
    /// Media is referenced under the names it is served as, e.g. `audio.mp3`.
    pub async fn txt(&self, id: Uuid) -> ApiResult<String> {
        let song = self.get(id).await?;
        let mut txt = song.data.to_txt();

        for slot in MediaSlot::ALL {
            let Some(file_id) = song.file_id(slot) else {
                continue;
            };
            let Some(file) = files::find(&self.db, file_id).await? else {
                continue;
            };
            let name = Some(format!("{}.{}", slot, extension_for(&file.content_type)));
            match slot {
                MediaSlot::Audio => txt.audio = name,
                MediaSlot::Video => txt.video = name,
                MediaSlot::Cover => txt.cover = name,
                MediaSlot::Background => txt.background = name,
            }
        }

        Ok(ultrastar::write(&txt))
    }
}

/// File extension used when naming media of `content_type`
fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/ogg" | "audio/vorbis" => "ogg",
        "audio/opus" => "opus",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/wav" | "audio/x-wav" | "audio/vnd.wave" => "wav",
        "audio/mp4" | "audio/x-m4a" | "audio/m4a" => "m4a",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/x-matroska" => "mkv",
        "video/x-msvideo" => "avi",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|exts| exts.first().copied())
            .unwrap_or("bin"),
    }
}

/// Partial update of song metadata
///
/// Absent fields are left alone. Nullable fields are cleared with `null`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SongPatch {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub edition: Option<String>,
    pub language: Option<String>,
    #[serde(default, deserialize_with = "some")]
    pub year: Option<Option<i32>>,
    pub creator: Option<String>,
    pub comment: Option<String>,
    /// Replaces all unknown TXT tags
    pub extra: Option<BTreeMap<String, String>>,

    pub bpm: Option<f64>,
    pub gap_ms: Option<i64>,
    pub video_gap_ms: Option<i64>,
    pub start_ms: Option<i64>,
    #[serde(default, deserialize_with = "some")]
    pub end_ms: Option<Option<i64>>,
    #[serde(default, deserialize_with = "some")]
    pub preview_start_ms: Option<Option<i64>>,
    #[serde(default, deserialize_with = "some")]
    pub medley_start_beat: Option<Option<i64>>,
    #[serde(default, deserialize_with = "some")]
    pub medley_end_beat: Option<Option<i64>>,
    pub no_auto_medley: Option<bool>,

    #[serde(default, deserialize_with = "some")]
    pub duet_singer_p1: Option<Option<String>>,
    #[serde(default, deserialize_with = "some")]
    pub duet_singer_p2: Option<Option<String>>,
}

/// Distinguishes an explicit `null` (`Some(None)`) from an absent field (`None`)
fn some<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl SongPatch {
    /// Validate the patch and merge it into `data`
    ///
    /// Text fields end up as `#KEY:VALUE` header lines, so they are trimmed
    /// and must not contain control characters. Nothing is changed when the
    /// patch is rejected.
    pub fn apply(self, data: &mut SongData) -> ApiResult<()> {
        if let Some(bpm) = self.bpm {
            if !(bpm.is_finite() && bpm > 0.0) {
                return Err(ApiError::BadRequest("bpm must be a positive number".to_string()));
            }
        }
        let extra = self.extra.map(extra_tags).transpose()?;
        let title = header_text("title", self.title)?;
        let artist = header_text("artist", self.artist)?;
        let genre = header_text("genre", self.genre)?;
        let edition = header_text("edition", self.edition)?;
        let language = header_text("language", self.language)?;
        let creator = header_text("creator", self.creator)?;
        let comment = header_text("comment", self.comment)?;
        let duet_singer_p1 = singer("duet_singer_p1", self.duet_singer_p1)?;
        let duet_singer_p2 = singer("duet_singer_p2", self.duet_singer_p2)?;

        set(&mut data.bpm, self.bpm);
        if let Some(extra) = extra {
            data.extra.0 = extra;
        }
        set(&mut data.title, title);
        set(&mut data.artist, artist);
        set(&mut data.genre, genre);
        set(&mut data.edition, edition);
        set(&mut data.language, language);
        set(&mut data.year, self.year);
        set(&mut data.creator, creator);
        set(&mut data.comment, comment);
        set(&mut data.gap_ms, self.gap_ms);
        set(&mut data.video_gap_ms, self.video_gap_ms);
        set(&mut data.start_ms, self.start_ms);
        set(&mut data.end_ms, self.end_ms);
        set(&mut data.preview_start_ms, self.preview_start_ms);
        set(&mut data.medley_start_beat, self.medley_start_beat);
        set(&mut data.medley_end_beat, self.medley_end_beat);
        set(&mut data.no_auto_medley, self.no_auto_medley);
        set(&mut data.duet_singer_p1, duet_singer_p1);
        set(&mut data.duet_singer_p2, duet_singer_p2);
        Ok(())
    }
}

fn clean(field: &str, value: &str) -> ApiResult<String> {
    if value.chars().any(char::is_control) {
        return Err(ApiError::BadRequest(format!(
            "{} must not contain control characters",
            field
        )));
    }
    Ok(value.trim().to_string())
}

fn header_text(field: &str, value: Option<String>) -> ApiResult<Option<String>> {
    value.map(|v| clean(field, &v)).transpose()
}

/// Empty singer names clear the field, as they would in a TXT file
fn singer(field: &str, value: Option<Option<String>>) -> ApiResult<Option<Option<String>>> {
    match value {
        Some(Some(name)) => {
            let name = clean(field, &name)?;
            Ok(Some((!name.is_empty()).then_some(name)))
        }
        other => Ok(other),
    }
}

/// Normalize unknown tags to the form the TXT parser produces
fn extra_tags(tags: BTreeMap<String, String>) -> ApiResult<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for (key, value) in tags {
        let name = key.trim().to_ascii_uppercase();
        if name.is_empty() {
            return Err(ApiError::BadRequest("extra tag names must not be empty".to_string()));
        }
        if name.contains(|c: char| c == ':' || c.is_whitespace() || c.is_control()) {
            return Err(ApiError::BadRequest(format!("invalid extra tag name: {:?}", key)));
        }
        if ultrastar::KNOWN_TAGS.contains(&name.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "extra tag {} has a dedicated field",
                name
            )));
        }
        let value = clean(&format!("extra tag {}", name), &value)?;
        if out.insert(name.clone(), value).is_some() {
            return Err(ApiError::BadRequest(format!("duplicate extra tag: {}", name)));
        }
    }
    Ok(out)
}

fn set<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksdb_common::ultrastar::TxtSong;

    fn data() -> SongData {
        SongData::from(TxtSong {
            title: "Old".to_string(),
            year: Some(1999),
            bpm: 100.0,
            ..Default::default()
        })
    }

    #[test]
    fn test_patch_distinguishes_null_from_absent() {
        let mut song = data();
        let patch: SongPatch = serde_json::from_str(r#"{"title":"New"}"#).unwrap();
        patch.apply(&mut song).unwrap();
        assert_eq!(song.title, "New");
        assert_eq!(song.year, Some(1999));

        let patch: SongPatch = serde_json::from_str(r#"{"year":null,"end_ms":90000}"#).unwrap();
        patch.apply(&mut song).unwrap();
        assert_eq!(song.year, None);
        assert_eq!(song.end_ms, Some(90000));
    }

    #[test]
    fn test_patch_rejects_unknown_fields_and_bad_bpm() {
        assert!(serde_json::from_str::<SongPatch>(r#"{"tempo":1}"#).is_err());

        let mut song = data();
        let patch: SongPatch = serde_json::from_str(r#"{"bpm":0}"#).unwrap();
        assert!(matches!(patch.apply(&mut song), Err(ApiError::BadRequest(_))));
        assert_eq!(song.bpm, 100.0);
    }

    #[test]
    fn test_patch_rejects_line_breaks_in_header_text() {
        for body in [
            r#"{"title":"Hi\n#BPM:1"}"#,
            r#"{"artist":"a\rb"}"#,
            r#"{"comment":"tab\there"}"#,
            r#"{"duet_singer_p2":"Bob\n"}"#,
            r#"{"extra":{"X-NOTE":"one\ntwo"}}"#,
        ] {
            let mut song = data();
            let patch: SongPatch = serde_json::from_str(body).unwrap();
            assert!(
                matches!(patch.apply(&mut song), Err(ApiError::BadRequest(_))),
                "{}",
                body
            );
            assert_eq!(song, data(), "{}", body);
        }
    }

    #[test]
    fn test_patch_rejects_bad_extra_tag_names() {
        for body in [
            r#"{"extra":{"A:B":"x"}}"#,
            r#"{"extra":{"MY TAG":"x"}}"#,
            r#"{"extra":{"bpm":"1"}}"#,
            r#"{"extra":{"Title":"x"}}"#,
            r#"{"extra":{"x-a":"1","X-A":"2"}}"#,
        ] {
            let mut song = data();
            let patch: SongPatch = serde_json::from_str(body).unwrap();
            assert!(
                matches!(patch.apply(&mut song), Err(ApiError::BadRequest(_))),
                "{}",
                body
            );
        }
    }

    #[test]
    fn test_patched_song_survives_txt_round_trip() {
        let mut song = data();
        let patch: SongPatch = serde_json::from_str(
            r#"{"title":"  Spaced  ","extra":{"x-tag":" v ","X-EMPTY":""},"duet_singer_p1":" "}"#,
        )
        .unwrap();
        patch.apply(&mut song).unwrap();
        assert_eq!(song.title, "Spaced");
        assert_eq!(song.duet_singer_p1, None);
        assert_eq!(song.extra.0.get("X-TAG").map(String::as_str), Some("v"));

        song.music.0.voices = vec![ultrastar::Voice {
            notes: vec![ultrastar::Note {
                note_type: ultrastar::NoteType::Normal,
                start: 0,
                duration: 1,
                pitch: 0,
                text: "a".to_string(),
            }],
            line_breaks: vec![],
        }];
        let txt = song.to_txt();
        let parsed = ultrastar::parse(&ultrastar::write(&txt)).unwrap();
        assert_eq!(parsed, txt);
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("audio/mpeg"), "mp3");
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("application/x-unknown-thing"), "bin");
    }
}
