//! ksdb server library
//!
//! Exposes the router, state and runtime wiring so the binary and the
//! integration tests start the service the same way.

pub mod api;
pub mod cli;
pub mod error;
pub mod logging;
pub mod service;
pub mod store;
pub mod tasks;

pub use crate::error::{ApiError, ApiResult};

use anyhow::Context;
use axum::{middleware, Router};
use chrono::{DateTime, Utc};
use ksdb_common::config::Config;
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::service::{MediaService, SongService, UploadService};
use crate::store::{FileStore, FsStore, UploadArea};
use crate::tasks::{scheduler, TaskContext, TaskQueue, TaskWorker};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<Config>,
    pub store: Arc<dyn FileStore>,
    pub uploads: UploadArea,
    pub queue: TaskQueue,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn songs(&self) -> SongService {
        SongService::new(self.db.clone(), self.queue.clone())
    }

    pub fn media(&self) -> MediaService {
        MediaService::new(self.db.clone(), self.store.clone(), self.queue.clone())
    }

    pub fn uploads(&self) -> UploadService {
        UploadService::new(self.db.clone(), self.uploads.clone(), self.queue.clone())
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::song_routes())
        .merge(api::media_routes())
        .merge(api::upload_routes())
        .merge(api::health_routes())
        .fallback(api::fallback)
        .layer(middleware::from_fn(api::negotiate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A configured service that has not started serving yet
pub struct Runtime {
    pub state: AppState,
    pub worker: TaskWorker,
    /// Cancelled on shutdown; stops the worker and the scheduler
    pub shutdown: CancellationToken,
}

impl Runtime {
    /// Create storage directories, open and migrate the database, wire the task worker
    pub async fn bootstrap(config: Config) -> anyhow::Result<Self> {
        for dir in [&config.storage.media_dir, &config.storage.upload_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        info!("Database: {}", config.database.path.display());
        let db = ksdb_common::db::init_database(&config.database.path)
            .await
            .context("Failed to initialize database")?;

        let store: Arc<dyn FileStore> = Arc::new(FsStore::new(&config.storage.media_dir));
        let uploads = UploadArea::new(&config.storage.upload_dir);
        let (queue, receiver) = TaskQueue::new();
        let shutdown = CancellationToken::new();

        let context = TaskContext {
            db: db.clone(),
            store: store.clone(),
            uploads: uploads.clone(),
            queue: queue.clone(),
            prune_grace: Duration::from_secs(config.tasks.prune_grace_secs),
            cancel: shutdown.clone(),
        };
        let worker = TaskWorker::new(context, receiver, &config.tasks);

        let state = AppState {
            db,
            config: Arc::new(config),
            store,
            uploads,
            queue,
            startup_time: Utc::now(),
        };

        Ok(Self {
            state,
            worker,
            shutdown,
        })
    }
}

/// Run the task worker, the scheduler and the HTTP server until `signal` resolves
///
/// Running tasks are cancelled and awaited before this returns.
pub async fn serve<F>(runtime: Runtime, listener: TcpListener, signal: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let Runtime {
        state,
        worker,
        shutdown,
    } = runtime;

    let worker = tokio::spawn(worker.run());
    let schedule = tokio::spawn(scheduler::run_schedule(
        state.queue.clone(),
        Duration::from_secs(state.config.tasks.prune_interval_secs),
        shutdown.clone(),
    ));
    scheduler::recover_uploads(&state.db, &state.queue)
        .await
        .context("Failed to recover unfinished uploads")?;

    let app = build_router(state);
    let stop = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            stop.cancel();
        })
        .await;

    shutdown.cancel();
    for (name, handle) in [("task worker", worker), ("scheduler", schedule)] {
        if let Err(e) = handle.await {
            error!(error = %e, "{} ended abnormally", name);
        }
    }

    served.context("Server error")?;
    info!("Server shutdown complete");
    Ok(())
}
