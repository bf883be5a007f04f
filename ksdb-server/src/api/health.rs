//! Health check endpoint

use axum::{extract::State, http::StatusCode, routing::get, Router};
use chrono::Utc;
use ksdb_common::db::schema_version;
use tracing::warn;

use super::schema::HealthResponse;
use super::{Format, Reply};
use crate::AppState;

/// GET /health
///
/// 200 with the schema version while the database answers, 503 otherwise.
pub async fn health_check(State(state): State<AppState>, format: Format) -> Reply<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let (status, code, version) = match schema_version(&state.db).await {
        Ok(version) => ("ok", StatusCode::OK, Some(version)),
        Err(e) => {
            warn!(error = %e, "Health check could not reach the database");
            ("unavailable", StatusCode::SERVICE_UNAVAILABLE, None)
        }
    };

    Reply::one(
        format,
        HealthResponse {
            status: status.to_string(),
            module: "ksdb".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            git_hash: env!("GIT_HASH").to_string(),
            schema_version: version,
            uptime_seconds,
        },
    )
    .status(code)
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
