//! Song media endpoints: `/v1/songs/:id/{audio,video,cover,background}`

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, MethodRouter},
    Router,
};
use ksdb_common::db::MediaSlot;
use tokio_util::io::ReaderStream;

use super::schema::FileSchema;
use super::{parse_id, Format, Reply};
use crate::error::{ApiError, ApiResult};
use crate::store::parse_content_digest;
use crate::AppState;

const CONTENT_DIGEST: &str = "content-digest";

pub fn media_routes() -> Router<AppState> {
    MediaSlot::ALL
        .into_iter()
        .fold(Router::new(), |router, slot| {
            router.route(&format!("/v1/songs/:id/{}", slot), media_route(slot))
        })
}

fn media_route(slot: MediaSlot) -> MethodRouter<AppState> {
    get(
        move |State(state): State<AppState>, Path(id): Path<String>, headers: HeaderMap| {
            get_media(state, id, headers, slot)
        },
    )
    .put(
        move |State(state): State<AppState>,
              format: Format,
              Path(id): Path<String>,
              headers: HeaderMap,
              body: Body| { put_media(state, format, id, headers, body, slot) },
    )
    .delete(
        move |State(state): State<AppState>, Path(id): Path<String>| {
            delete_media(state, id, slot)
        },
    )
}

/// GET: stream the stored content
async fn get_media(
    state: AppState,
    id: String,
    headers: HeaderMap,
    slot: MediaSlot,
) -> ApiResult<Response> {
    let (file, reader) = state.media().get(parse_id(&id)?, slot).await?;
    let etag = format!("\"{}\"", file.checksum);
    let etag_value = HeaderValue::from_str(&etag)
        .map_err(|e| ApiError::Internal(format!("Invalid checksum for ETag: {}", e)))?;

    if if_none_match(&headers, &etag) {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag_value)]).into_response());
    }

    let content_type = HeaderValue::from_str(&file.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let mut response = Body::from_stream(ReaderStream::new(reader)).into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(header::CONTENT_TYPE, content_type);
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size));
    response_headers.insert(header::ETAG, etag_value);
    Ok(response)
}

/// PUT: replace the slot's content with the request body
async fn put_media(
    state: AppState,
    format: Format,
    id: String,
    headers: HeaderMap,
    body: Body,
    slot: MediaSlot,
) -> ApiResult<Reply<FileSchema>> {
    let id = parse_id(&id)?;
    let declared = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let expected = match headers.get(CONTENT_DIGEST) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| ApiError::BadRequest("Content-Digest is not ASCII".to_string()))?;
            parse_content_digest(value)?
        }
        None => None,
    };

    let file = state
        .media()
        .replace(id, slot, declared, expected, body.into_data_stream())
        .await?;
    Ok(Reply::one(format, FileSchema::from(&file)))
}

/// DELETE: unlink the slot
async fn delete_media(state: AppState, id: String, slot: MediaSlot) -> ApiResult<StatusCode> {
    state.media().delete(parse_id(&id)?, slot).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Whether `If-None-Match` names `etag` (weak comparison)
fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|tag| tag.trim())
        .any(|tag| tag == "*" || tag.trim_start_matches("W/") == etag)
}
