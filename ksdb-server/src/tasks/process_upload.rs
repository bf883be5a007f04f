//! `upload:process`: import the songs staged in an upload
//!
//! Archives are unpacked next to themselves, then every `.txt` below the
//! upload root is treated as one song. Media references resolve relative
//! to the TXT's directory. A song that cannot be imported is recorded as a
//! processing error and the upload carries on with the next one.

use anyhow::Context as _;
use ksdb_common::db::{files, songs, uploads, File, MediaSlot, Song, SongData, UploadStatus};
use ksdb_common::ultrastar;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::{Task, TaskContext, TaskError};
use crate::store;

enum Outcome {
    Imported { warnings: Vec<String> },
    Rejected(String),
}

pub async fn run(ctx: &TaskContext, upload_id: Uuid) -> Result<(), TaskError> {
    let Some(upload) = uploads::find(&ctx.db, upload_id).await? else {
        debug!(%upload_id, "Upload is gone, nothing to process");
        return Ok(());
    };

    match upload.status {
        UploadStatus::Pending => {
            if !uploads::transition(
                &ctx.db,
                upload_id,
                UploadStatus::Pending,
                UploadStatus::Processing,
            )
            .await?
            {
                debug!(%upload_id, "Upload left pending before processing started");
                return Ok(());
            }
        }
        // An earlier attempt failed or the server stopped midway
        UploadStatus::Processing => {}
        UploadStatus::Open | UploadStatus::Done => {
            debug!(%upload_id, status = %upload.status, "Upload is not waiting for processing");
            return Ok(());
        }
    }

    info!(%upload_id, "Processing upload");

    // Start over from a clean slate so retries do not duplicate songs.
    uploads::clear_errors(&ctx.db, upload_id).await?;
    if songs::soft_delete_by_upload(&ctx.db, upload_id).await? > 0 {
        ctx.queue.enqueue(Task::PruneMedia);
    }

    let root = ctx.uploads.dir(upload_id);
    for (archive, error) in extract_archives(&root).await? {
        warn!(%upload_id, archive = %archive, error = %error, "Failed to extract archive");
        uploads::add_error(&ctx.db, upload_id, &archive, &error).await?;
    }

    let song_files = find_song_files(&root).await?;
    let total = song_files.len() as i64;
    uploads::set_progress(&ctx.db, upload_id, total, 0).await?;

    let mut imported = 0usize;
    for (done, path) in song_files.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        let rel = relative_name(&root, path);

        match import_song(ctx, upload_id, path).await? {
            Outcome::Imported { warnings } => {
                imported += 1;
                for warning in warnings {
                    uploads::add_error(&ctx.db, upload_id, &rel, &warning).await?;
                }
            }
            Outcome::Rejected(message) => {
                debug!(%upload_id, file = %rel, error = %message, "Song rejected");
                uploads::add_error(&ctx.db, upload_id, &rel, &message).await?;
            }
        }
        uploads::set_progress(&ctx.db, upload_id, total, done as i64 + 1).await?;
    }

    uploads::transition(
        &ctx.db,
        upload_id,
        UploadStatus::Processing,
        UploadStatus::Done,
    )
    .await?;

    info!(%upload_id, imported, total, "Upload processed");
    Ok(())
}

/// Close out an upload whose processing keeps failing
///
/// The upload moves to `done` so clients stop waiting on it, and the failure
/// is recorded as an upload-level error with an empty file name.
pub async fn give_up(ctx: &TaskContext, upload_id: Uuid, error: &TaskError) -> Result<(), TaskError> {
    if !uploads::transition(
        &ctx.db,
        upload_id,
        UploadStatus::Processing,
        UploadStatus::Done,
    )
    .await?
    {
        return Ok(());
    }
    uploads::add_error(&ctx.db, upload_id, "", &format!("Processing failed: {}", error)).await?;
    warn!(%upload_id, error = %error, "Upload marked done after failed processing");
    Ok(())
}

async fn import_song(
    ctx: &TaskContext,
    upload_id: Uuid,
    txt_path: &Path,
) -> Result<Outcome, TaskError> {
    let bytes = match tokio::fs::read(txt_path).await {
        Ok(bytes) => bytes,
        Err(e) => return Ok(Outcome::Rejected(format!("Failed to read file: {}", e))),
    };
    let mut txt = match ultrastar::parse(&ultrastar::decode_text(&bytes)) {
        Ok(txt) => txt,
        Err(e) => return Ok(Outcome::Rejected(format!("Invalid UltraStar file: {}", e))),
    };

    let dir = txt_path.parent().unwrap_or(txt_path);
    let mut warnings = Vec::new();

    // A song is only worth importing when it can be played.
    let Some(audio_ref) = txt.audio.take() else {
        return Ok(Outcome::Rejected("No audio file referenced".to_string()));
    };
    let audio = match locate_media(dir, &audio_ref).await {
        Ok(Some(path)) => match ingest_media(ctx, &path, MediaSlot::Audio).await? {
            Ok(file) => file,
            Err(message) => return Ok(Outcome::Rejected(message)),
        },
        Ok(None) => {
            return Ok(Outcome::Rejected(format!("Audio file not found: {}", audio_ref)))
        }
        Err(message) => return Ok(Outcome::Rejected(message)),
    };

    let optional = [
        (MediaSlot::Video, txt.video.take()),
        (MediaSlot::Cover, txt.cover.take()),
        (MediaSlot::Background, txt.background.take()),
    ];

    let mut song = Song::new(SongData::from(txt), Some(upload_id));
    song.set_file_id(MediaSlot::Audio, Some(audio.id));

    for (slot, reference) in optional {
        let Some(reference) = reference else { continue };
        match locate_media(dir, &reference).await {
            Ok(Some(path)) => match ingest_media(ctx, &path, slot).await? {
                Ok(file) => song.set_file_id(slot, Some(file.id)),
                Err(message) => warnings.push(message),
            },
            Ok(None) => warnings.push(format!("{} file not found: {}", capitalize(slot), reference)),
            Err(message) => warnings.push(message),
        }
    }

    songs::insert(&ctx.db, &song).await?;
    debug!(song_id = %song.id, title = %song.data.title, "Imported song");
    Ok(Outcome::Imported { warnings })
}

/// Store the file at `path` for `slot`
///
/// The outer error aborts the task; the inner one rejects only this file.
async fn ingest_media(
    ctx: &TaskContext,
    path: &Path,
    slot: MediaSlot,
) -> Result<Result<File, String>, TaskError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let guessed = mime_guess::from_path(path).first_raw();
    if let Some(content_type) = guessed {
        if !slot.accepts(content_type) {
            return Ok(Err(format!(
                "{} is {}, not a {} file",
                name,
                content_type,
                slot.family()
            )));
        }
    }

    let reader = match tokio::fs::File::open(path).await {
        Ok(reader) => reader,
        Err(e) => return Ok(Err(format!("Failed to open {}: {}", name, e))),
    };
    let file = match store::ingest(ctx.store.as_ref(), guessed, None, ReaderStream::new(reader)).await
    {
        Ok(file) => file,
        Err(e) => return Ok(Err(format!("Failed to store {}: {}", name, e))),
    };

    if !slot.accepts(&file.content_type) {
        if let Err(e) = ctx.store.delete(file.id).await {
            warn!(file_id = %file.id, error = %e, "Failed to remove rejected blob");
        }
        return Ok(Err(format!(
            "{} is {}, not a {} file",
            name,
            file.content_type,
            slot.family()
        )));
    }

    files::insert(&ctx.db, &file).await?;
    Ok(Ok(file))
}

/// Find the file a TXT header refers to
///
/// Windows separators are accepted and the file name is matched without
/// regard to case when there is no exact match. References that leave the
/// song directory are rejected.
async fn locate_media(dir: &Path, reference: &str) -> Result<Option<PathBuf>, String> {
    let normalized = reference.trim().replace('\\', "/");
    if normalized.is_empty() {
        return Ok(None);
    }
    let rel = Path::new(&normalized);
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(format!(
            "Media reference leaves the song directory: {}",
            reference
        ));
    }

    let candidate = dir.join(rel);
    if is_file(&candidate).await {
        return Ok(Some(candidate));
    }

    let (Some(parent), Some(wanted)) = (candidate.parent(), rel.file_name()) else {
        return Ok(None);
    };
    let wanted = wanted.to_string_lossy();
    let Ok(mut entries) = tokio::fs::read_dir(parent).await else {
        return Ok(None);
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().eq_ignore_ascii_case(&wanted)
            && is_file(&entry.path()).await
        {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Unpack every `.zip` below `root` into a directory named after it
///
/// Returns `(archive, error)` for archives that could not be unpacked.
async fn extract_archives(root: &Path) -> Result<Vec<(String, String)>, TaskError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let archives = walk_files(&root, "zip");
        let mut failures = Vec::new();
        for archive in archives {
            let dest = archive.with_extension("");
            match extract_zip(&archive, &dest) {
                Ok(count) => debug!(archive = %archive.display(), count, "Extracted archive"),
                Err(e) => failures.push((relative_name(&root, &archive), format!("{:#}", e))),
            }
        }
        failures
    })
    .await
    .map_err(|e| TaskError::Failed(format!("Archive extraction panicked: {}", e)))
}

fn extract_zip(archive_path: &Path, dest: &Path) -> anyhow::Result<usize> {
    let reader = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(reader).context("Not a readable zip archive")?;

    let mut extracted = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        let Some(rel) = entry.enclosed_name() else {
            warn!(entry = %name, "Skipping archive entry outside the archive root");
            continue;
        };
        let out = dest.join(rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut target = std::fs::File::create(&out)
            .with_context(|| format!("Failed to create {}", name))?;
        io::copy(&mut entry, &mut target).with_context(|| format!("Failed to unpack {}", name))?;
        extracted += 1;
    }
    Ok(extracted)
}

async fn find_song_files(root: &Path) -> Result<Vec<PathBuf>, TaskError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || walk_files(&root, "txt"))
        .await
        .map_err(|e| TaskError::Failed(format!("Directory scan panicked: {}", e)))
}

/// Files below `root` with the given extension (any case), in path order
fn walk_files(root: &Path, extension: &str) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect()
}

fn relative_name(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn capitalize(slot: MediaSlot) -> String {
    let name = slot.as_str();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
