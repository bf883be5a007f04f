//! Background tasks
//!
//! Handlers and the scheduler push [`Task`]s onto a [`TaskQueue`]; a single
//! [`TaskWorker`] drains the queue and runs up to `tasks.concurrency` tasks
//! at once. Failed attempts are retried with a linear backoff. On shutdown
//! the worker stops taking new tasks, cancels the running ones and waits
//! for them to return.

pub mod process_upload;
pub mod prune;
pub mod scheduler;

use ksdb_common::config::TaskConfig;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::store::{FileStore, UploadArea};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Task {
    /// Remove files no live song references
    #[serde(rename = "media:prune")]
    PruneMedia,
    /// Import the songs staged in an upload
    #[serde(rename = "upload:process")]
    ProcessUpload { upload_id: Uuid },
}

impl Task {
    pub fn type_name(&self) -> &'static str {
        match self {
            Task::PruneMedia => "media:prune",
            Task::ProcessUpload { .. } => "upload:process",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::PruneMedia => f.write_str(self.type_name()),
            Task::ProcessUpload { upload_id } => write!(f, "{}({})", self.type_name(), upload_id),
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Common(#[from] ksdb_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),

    #[error("Task cancelled")]
    Cancelled,
}

type Queued = Arc<Mutex<HashSet<Task>>>;

/// Sending half of the task queue
///
/// A task that is already waiting in the queue is not queued twice.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
    queued: Queued,
}

/// Receiving half, owned by the [`TaskWorker`]
pub struct TaskReceiver {
    rx: mpsc::UnboundedReceiver<Task>,
    queued: Queued,
}

impl TaskQueue {
    pub fn new() -> (Self, TaskReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queued = Queued::default();
        (
            Self {
                tx,
                queued: queued.clone(),
            },
            TaskReceiver { rx, queued },
        )
    }

    /// Queue a task; returns false if it was already waiting or the worker is gone
    pub fn enqueue(&self, task: Task) -> bool {
        {
            let mut queued = self.queued.lock().unwrap_or_else(PoisonError::into_inner);
            if !queued.insert(task.clone()) {
                debug!(task = %task, "Task already queued");
                return false;
            }
        }

        match self.tx.send(task) {
            Ok(()) => true,
            Err(mpsc::error::SendError(task)) => {
                warn!(task = %task, "Task worker stopped, dropping task");
                self.queued
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&task);
                false
            }
        }
    }
}

impl TaskReceiver {
    pub async fn recv(&mut self) -> Option<Task> {
        let task = self.rx.recv().await?;
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task);
        Some(task)
    }
}

/// Everything a task needs to run
#[derive(Clone)]
pub struct TaskContext {
    pub db: SqlitePool,
    pub store: Arc<dyn FileStore>,
    pub uploads: UploadArea,
    pub queue: TaskQueue,
    /// Minimum age of an unreferenced file before `media:prune` removes it
    pub prune_grace: Duration,
    /// Cancelled when the server shuts down
    pub cancel: CancellationToken,
}

pub struct TaskWorker {
    ctx: Arc<TaskContext>,
    rx: TaskReceiver,
    concurrency: usize,
    max_retries: u32,
    retry_delay: Duration,
}

impl TaskWorker {
    pub fn new(ctx: TaskContext, rx: TaskReceiver, config: &TaskConfig) -> Self {
        Self {
            ctx: Arc::new(ctx),
            rx,
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    /// Run tasks until the context is cancelled or every queue handle is dropped
    pub async fn run(mut self) {
        let cancel = self.ctx.cancel.clone();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut running = JoinSet::new();

        info!(concurrency = self.concurrency, "Task worker started");

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else { break };

            let task = tokio::select! {
                _ = cancel.cancelled() => break,
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Task panicked");
                    }
                    continue;
                }
                task = self.rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let ctx = self.ctx.clone();
            let (max_retries, retry_delay) = (self.max_retries, self.retry_delay);
            running.spawn(async move {
                let _permit = permit;
                execute(&ctx, task, max_retries, retry_delay).await;
            });
        }

        if !running.is_empty() {
            info!(running = running.len(), "Waiting for running tasks");
        }
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Task panicked");
            }
        }
        info!("Task worker stopped");
    }
}

async fn execute(ctx: &TaskContext, task: Task, max_retries: u32, retry_delay: Duration) {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let started = Instant::now();
        debug!(task = %task, attempt, "Running task");

        let result = match &task {
            Task::PruneMedia => prune::run(ctx).await,
            Task::ProcessUpload { upload_id } => process_upload::run(ctx, *upload_id).await,
        };

        match result {
            Ok(()) => {
                info!(
                    task = %task,
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Task finished"
                );
                return;
            }
            Err(TaskError::Cancelled) => {
                info!(task = %task, "Task cancelled");
                return;
            }
            Err(e) if attempt > max_retries => {
                error!(task = %task, attempt, error = %e, "Task failed, giving up");
                if let Task::ProcessUpload { upload_id } = &task {
                    if let Err(record) = process_upload::give_up(ctx, *upload_id, &e).await {
                        error!(task = %task, error = %record, "Failed to record upload failure");
                    }
                }
                return;
            }
            Err(e) => {
                let delay = retry_delay * attempt;
                warn!(
                    task = %task,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Task failed, retrying"
                );
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::store::FsStore;
    use tempfile::TempDir;

    /// Context over a fresh database and storage tree
    pub async fn test_context() -> (TempDir, TaskContext, TaskReceiver) {
        let dir = tempfile::tempdir().unwrap();
        let db = ksdb_common::db::init_database(&dir.path().join("ksdb.db"))
            .await
            .unwrap();
        let (queue, rx) = TaskQueue::new();
        let ctx = TaskContext {
            db,
            store: Arc::new(FsStore::new(dir.path().join("media"))),
            uploads: UploadArea::new(dir.path().join("uploads")),
            queue,
            prune_grace: Duration::ZERO,
            cancel: CancellationToken::new(),
        };
        (dir, ctx, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_serialization() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(Task::ProcessUpload { upload_id: id }).unwrap();
        assert_eq!(json["type"], "upload:process");
        assert_eq!(json["upload_id"], id.to_string());

        let task: Task = serde_json::from_str(r#"{"type":"media:prune"}"#).unwrap();
        assert_eq!(task, Task::PruneMedia);
        assert_eq!(task.type_name(), "media:prune");
    }

    #[tokio::test]
    async fn test_enqueue_deduplicates_waiting_tasks() {
        let (queue, mut rx) = TaskQueue::new();
        assert!(queue.enqueue(Task::PruneMedia));
        assert!(!queue.enqueue(Task::PruneMedia));

        assert_eq!(rx.recv().await, Some(Task::PruneMedia));
        // Dequeued tasks may be queued again
        assert!(queue.enqueue(Task::PruneMedia));
    }

    #[tokio::test]
    async fn test_enqueue_after_worker_gone() {
        let (queue, rx) = TaskQueue::new();
        drop(rx);
        assert!(!queue.enqueue(Task::PruneMedia));
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancel() {
        let (_dir, ctx, rx) = test_support::test_context().await;
        let cancel = ctx.cancel.clone();
        let worker = TaskWorker::new(ctx, rx, &TaskConfig::default());
        let handle = tokio::spawn(worker.run());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_runs_queued_task() {
        let (_dir, ctx, rx) = test_support::test_context().await;
        let queue = ctx.queue.clone();
        let cancel = ctx.cancel.clone();
        let worker = TaskWorker::new(ctx, rx, &TaskConfig::default());
        let handle = tokio::spawn(worker.run());

        assert!(queue.enqueue(Task::PruneMedia));
        // Once dequeued, the dedup set no longer holds the task
        tokio::time::timeout(Duration::from_secs(5), async {
            while !queue.enqueue(Task::PruneMedia) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        handle.await.unwrap();
    }

    /// An upload whose processing fails on every attempt ends up done with
    /// an upload-level error instead of staying in processing forever
    #[tokio::test]
    async fn test_exhausted_upload_task_is_recorded() {
        use ksdb_common::db::{uploads, Upload, UploadStatus};
        use ksdb_common::pagination::PageRequest;

        let (_dir, ctx, rx) = test_support::test_context().await;
        let upload = Upload::new();
        uploads::insert(&ctx.db, &upload).await.unwrap();
        uploads::transition(&ctx.db, upload.id, UploadStatus::Open, UploadStatus::Pending)
            .await
            .unwrap();
        // Every attempt fails when it records progress
        sqlx::query(
            "CREATE TRIGGER fail_progress BEFORE UPDATE OF songs_total ON uploads \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(&ctx.db)
        .await
        .unwrap();

        let (db, queue, cancel) = (ctx.db.clone(), ctx.queue.clone(), ctx.cancel.clone());
        let config = TaskConfig {
            max_retries: 1,
            retry_delay_ms: 1,
            ..Default::default()
        };
        let handle = tokio::spawn(TaskWorker::new(ctx, rx, &config).run());
        assert!(queue.enqueue(Task::ProcessUpload { upload_id: upload.id }));

        let done = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let found = uploads::find(&db, upload.id).await.unwrap().unwrap();
                // The error is recorded right after the status changes
                if found.status == UploadStatus::Done && found.errors > 0 {
                    return found;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(done.errors, 1);

        let (errors, _) = uploads::list_errors(&db, upload.id, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(errors[0].file, "");
        assert!(errors[0].message.contains("disk full"), "{}", errors[0].message);

        cancel.cancel();
        handle.await.unwrap();
    }
}
