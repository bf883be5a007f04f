//! Song endpoints

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use ksdb_common::ultrastar;

use super::schema::SongSchema;
use super::{content_type, parse_id, Format, Pagination, Reply};
use crate::error::{ApiError, ApiResult};
use crate::service::SongPatch;
use crate::AppState;

pub fn song_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/songs", get(list_songs).post(create_song))
        .route(
            "/v1/songs/:id",
            get(get_song).patch(update_song).delete(delete_song),
        )
        .route("/v1/songs/:id/txt", get(song_txt))
}

/// GET /v1/songs
async fn list_songs(
    State(state): State<AppState>,
    format: Format,
    Pagination(request): Pagination,
) -> ApiResult<Reply<SongSchema>> {
    let (songs, page) = state.songs().list(request).await?;
    let items = songs.iter().map(SongSchema::summary).collect();
    Ok(Reply::page(format, items, page))
}

/// POST /v1/songs
///
/// Body is an UltraStar TXT file sent as `text/plain`.
async fn create_song(
    State(state): State<AppState>,
    format: Format,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Reply<SongSchema>> {
    match content_type(&headers).as_deref() {
        Some("text/plain") => {}
        other => {
            return Err(ApiError::UnsupportedMediaType(format!(
                "Expected text/plain, got {}",
                other.unwrap_or("no content type")
            )))
        }
    }

    let text = ultrastar::decode_text(&body);
    let song = state.songs().create_from_txt(&text).await?;
    Ok(Reply::one(format, SongSchema::full(&song))
        .status(StatusCode::CREATED)
        .location(&format!("/v1/songs/{}", song.id)))
}

/// GET /v1/songs/:id
async fn get_song(
    State(state): State<AppState>,
    format: Format,
    Path(id): Path<String>,
) -> ApiResult<Reply<SongSchema>> {
    let song = state.songs().get(parse_id(&id)?).await?;
    Ok(Reply::one(format, SongSchema::full(&song)))
}

/// PATCH /v1/songs/:id
async fn update_song(
    State(state): State<AppState>,
    format: Format,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Reply<SongSchema>> {
    let id = parse_id(&id)?;
    let is_json = content_type(&headers)
        .map(|ct| ct == "application/json" || ct.ends_with("+json"))
        .unwrap_or(false);
    if !is_json {
        return Err(ApiError::UnsupportedMediaType(
            "Expected an application/json body".to_string(),
        ));
    }

    let patch: SongPatch = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid song update: {}", e)))?;
    let song = state.songs().update(id, patch).await?;
    Ok(Reply::one(format, SongSchema::full(&song)))
}

/// DELETE /v1/songs/:id
async fn delete_song(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.songs().delete(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/songs/:id/txt
async fn song_txt(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let txt = state.songs().txt(parse_id(&id)?).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], txt))
}
