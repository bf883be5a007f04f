//! Periodic scheduling and startup recovery

use ksdb_common::db::{uploads, UploadStatus};
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Task, TaskQueue};

/// Enqueue `media:prune` every `every` until `shutdown` fires
///
/// A zero interval disables the schedule.
pub async fn run_schedule(queue: TaskQueue, every: Duration, shutdown: CancellationToken) {
    if every.is_zero() {
        info!("Periodic media pruning disabled");
        return;
    }
    info!(interval_secs = every.as_secs(), "Periodic media pruning enabled");

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; wait a full interval instead
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                debug!("Scheduling media prune");
                queue.enqueue(Task::PruneMedia);
            }
        }
    }
}

/// Re-enqueue uploads a previous run left unfinished
///
/// Returns how many uploads were queued.
pub async fn recover_uploads(pool: &SqlitePool, queue: &TaskQueue) -> ksdb_common::Result<usize> {
    let mut recovered = 0;

    for upload in uploads::list_by_status(pool, UploadStatus::Processing).await? {
        // Processing restarts from scratch, so put it back in line
        uploads::transition(pool, upload.id, UploadStatus::Processing, UploadStatus::Pending)
            .await?;
        queue.enqueue(Task::ProcessUpload {
            upload_id: upload.id,
        });
        recovered += 1;
    }
    for upload in uploads::list_by_status(pool, UploadStatus::Pending).await? {
        queue.enqueue(Task::ProcessUpload {
            upload_id: upload.id,
        });
        recovered += 1;
    }

    if recovered > 0 {
        info!(recovered, "Re-queued unfinished uploads");
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::test_support::test_context;
    use ksdb_common::db::Upload;

    #[tokio::test]
    async fn test_recover_uploads() {
        let (_dir, ctx, mut rx) = test_context().await;

        let open = Upload::new();
        let mut pending = Upload::new();
        pending.status = UploadStatus::Pending;
        let mut processing = Upload::new();
        processing.status = UploadStatus::Processing;
        for upload in [&open, &pending, &processing] {
            uploads::insert(&ctx.db, upload).await.unwrap();
        }

        assert_eq!(recover_uploads(&ctx.db, &ctx.queue).await.unwrap(), 2);

        let stuck = uploads::find(&ctx.db, processing.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, UploadStatus::Pending);

        let mut queued = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        queued.sort_by_key(|t| t.to_string());
        let mut expected = vec![
            Task::ProcessUpload { upload_id: pending.id },
            Task::ProcessUpload { upload_id: processing.id },
        ];
        expected.sort_by_key(|t| t.to_string());
        assert_eq!(queued, expected);
    }

    #[tokio::test]
    async fn test_schedule_enqueues_prune() {
        let (_dir, ctx, mut rx) = test_context().await;
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_schedule(
            ctx.queue.clone(),
            Duration::from_millis(20),
            shutdown.clone(),
        ));

        let task = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(task, Some(Task::PruneMedia));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_disables_schedule() {
        let (_dir, ctx, _rx) = test_context().await;
        // Returns immediately instead of looping
        run_schedule(ctx.queue.clone(), Duration::ZERO, CancellationToken::new()).await;
    }
}
