//! In-process ksdb instance for HTTP tests

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use http_body_util::BodyExt;
use ksdb_common::config::Config;
use ksdb_server::store::FileStore;
use ksdb_server::tasks::{prune, TaskWorker};
use ksdb_server::{build_router, AppState, Runtime};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

/// A bootstrapped service backed by a temporary directory
///
/// The task worker only runs after [`TestApp::start_worker`]; without it
/// queued tasks stay queued, which keeps upload state deterministic.
pub struct TestApp {
    pub state: AppState,
    pub shutdown: CancellationToken,
    worker: Option<TaskWorker>,
    handle: Option<JoinHandle<()>>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.database.path = dir.path().join("ksdb.db");
        config.storage.media_dir = dir.path().join("media");
        config.storage.upload_dir = dir.path().join("uploads");
        config.tasks.prune_interval_secs = 0;
        config.tasks.prune_grace_secs = 0;
        config.tasks.retry_delay_ms = 10;
        config.api.default_limit = 2;
        config.api.max_limit = 5;

        let runtime = Runtime::bootstrap(config).await.unwrap();
        Self {
            state: runtime.state,
            shutdown: runtime.shutdown,
            worker: Some(runtime.worker),
            handle: None,
            _dir: dir,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Spawn the task worker; it stops when the app is dropped
    pub fn start_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.handle = Some(tokio::spawn(worker.run()));
        }
    }

    /// Run `media:prune` inline; only valid before the worker is started
    pub async fn run_prune(&self) {
        let worker = self.worker.as_ref().expect("worker already started");
        prune::run(worker.context()).await.unwrap();
    }

    /// Whether the blob of file `id` is still in the media store
    pub fn blob_exists(&self, id: &str) -> bool {
        let id = Uuid::parse_str(id).unwrap();
        self.state.store.local_path(id).unwrap().exists()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(request("GET", uri, None, Body::empty())).await
    }

    /// POST a TXT body and return the created song's JSON
    pub async fn create_song(&self, txt: &str) -> serde_json::Value {
        let response = self
            .send(request("POST", "/v1/songs", Some("text/plain"), Body::from(txt.to_string())))
            .await;
        assert_eq!(response.status(), 201, "creating song failed");
        body_json(response).await
    }

    pub async fn create_upload(&self) -> String {
        let response = self
            .send(request("POST", "/v1/uploads", None, Body::empty()))
            .await;
        assert_eq!(response.status(), 201, "creating upload failed");
        body_json(response).await["id"].as_str().unwrap().to_string()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Build a request with an optional `Content-Type`
pub fn request(method: &str, uri: &str, content_type: Option<&str>, body: Body) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    builder.body(body).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
