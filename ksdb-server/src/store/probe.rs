//! Duration probing for stored audio/video blobs

use lofty::prelude::*;
use lofty::probe::Probe;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Playing time of the media file at `path` in milliseconds
///
/// Blobs carry no file extension, so the container is guessed from content.
/// Unsupported or unreadable files yield `None`.
pub async fn duration_ms(path: PathBuf) -> Option<i64> {
    match tokio::task::spawn_blocking(move || read_duration(&path)).await {
        Ok(Ok(duration)) => duration,
        Ok(Err(e)) => {
            debug!(error = %e, "No duration for media file");
            None
        }
        Err(e) => {
            warn!(error = %e, "Duration probe task failed");
            None
        }
    }
}

fn read_duration(path: &Path) -> Result<Option<i64>, String> {
    let tagged_file = Probe::open(path)
        .map_err(|e| e.to_string())?
        .guess_file_type()
        .map_err(|e| e.to_string())?
        .read()
        .map_err(|e| e.to_string())?;

    let duration = tagged_file.properties().duration();
    if duration.is_zero() {
        return Ok(None);
    }
    Ok(Some(duration.as_millis() as i64))
}
