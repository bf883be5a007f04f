//! `media:prune`: drop files no live song links to

use chrono::{TimeDelta, Utc};
use ksdb_common::db::files;
use tracing::{debug, info, warn};

use super::{TaskContext, TaskError};

pub async fn run(ctx: &TaskContext) -> Result<(), TaskError> {
    let grace = TimeDelta::from_std(ctx.prune_grace).unwrap_or(TimeDelta::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(grace)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

    let orphans = files::find_orphaned(&ctx.db, cutoff).await?;
    if orphans.is_empty() {
        debug!("No orphaned media files");
        return Ok(());
    }

    let mut removed = 0usize;
    for file in orphans {
        if ctx.cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        if !files::soft_delete(&ctx.db, file.id).await? {
            continue;
        }
        // The record is gone either way; a leftover blob is only wasted space.
        if let Err(e) = ctx.store.delete(file.id).await {
            warn!(file_id = %file.id, error = %e, "Failed to remove media blob");
        }
        removed += 1;
    }

    info!(removed, "Pruned orphaned media files");
    Ok(())
}
