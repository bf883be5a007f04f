//! Upload endpoints

use axum::{
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};

use super::schema::{EntrySchema, ProcessingErrorSchema, UploadSchema};
use super::{parse_id, Format, Pagination, Reply};
use crate::error::ApiResult;
use crate::service::UploadFileInfo;
use crate::AppState;

pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/uploads", get(list_uploads).post(create_upload))
        .route("/v1/uploads/:id", get(get_upload).delete(delete_upload))
        .route("/v1/uploads/:id/files", get(upload_root))
        .route(
            "/v1/uploads/:id/files/*path",
            get(upload_file_info).put(put_upload_file).delete(delete_upload_file),
        )
        .route("/v1/uploads/:id/beginProcessing", post(begin_processing))
        .route("/v1/uploads/:id/errors", get(upload_errors))
}

/// GET /v1/uploads
async fn list_uploads(
    State(state): State<AppState>,
    format: Format,
    Pagination(request): Pagination,
) -> ApiResult<Reply<UploadSchema>> {
    let (uploads, page) = state.uploads().list(request).await?;
    let items = uploads.iter().map(UploadSchema::from).collect();
    Ok(Reply::page(format, items, page))
}

/// POST /v1/uploads
async fn create_upload(
    State(state): State<AppState>,
    format: Format,
) -> ApiResult<Reply<UploadSchema>> {
    let upload = state.uploads().create().await?;
    Ok(Reply::one(format, UploadSchema::from(&upload))
        .status(StatusCode::CREATED)
        .location(&format!("/v1/uploads/{}", upload.id)))
}

/// GET /v1/uploads/:id
async fn get_upload(
    State(state): State<AppState>,
    format: Format,
    Path(id): Path<String>,
) -> ApiResult<Reply<UploadSchema>> {
    let upload = state.uploads().get(parse_id(&id)?).await?;
    Ok(Reply::one(format, UploadSchema::from(&upload)))
}

/// DELETE /v1/uploads/:id
async fn delete_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.uploads().delete(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/uploads/:id/files
async fn upload_root(
    State(state): State<AppState>,
    format: Format,
    Pagination(request): Pagination,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    file_info(state, format, request, &id, "").await
}

/// GET /v1/uploads/:id/files/*path
async fn upload_file_info(
    State(state): State<AppState>,
    format: Format,
    Pagination(request): Pagination,
    Path((id, path)): Path<(String, String)>,
) -> ApiResult<Response> {
    file_info(state, format, request, &id, &path).await
}

async fn file_info(
    state: AppState,
    format: Format,
    request: ksdb_common::pagination::PageRequest,
    id: &str,
    path: &str,
) -> ApiResult<Response> {
    let info = state.uploads().file_info(parse_id(id)?, path, request).await?;
    Ok(match info {
        UploadFileInfo::File(entry) => Reply::one(format, EntrySchema::from(&entry)).into_response(),
        UploadFileInfo::Directory(entries, page) => {
            let items = entries.iter().map(EntrySchema::from).collect();
            Reply::page(format, items, page).into_response()
        }
    })
}

/// PUT /v1/uploads/:id/files/*path
async fn put_upload_file(
    State(state): State<AppState>,
    format: Format,
    Path((id, path)): Path<(String, String)>,
    body: Body,
) -> ApiResult<Reply<EntrySchema>> {
    let id = parse_id(&id)?;
    let entry = state
        .uploads()
        .put_file(id, &path, body.into_data_stream())
        .await?;
    Ok(Reply::one(format, EntrySchema::from(&entry))
        .status(StatusCode::CREATED)
        .location(&format!("/v1/uploads/{}/files/{}", id, entry.path)))
}

/// DELETE /v1/uploads/:id/files/*path
async fn delete_upload_file(
    State(state): State<AppState>,
    Path((id, path)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.uploads().delete_file(parse_id(&id)?, &path).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/uploads/:id/beginProcessing
async fn begin_processing(
    State(state): State<AppState>,
    format: Format,
    Path(id): Path<String>,
) -> ApiResult<Reply<UploadSchema>> {
    let upload = state.uploads().begin_processing(parse_id(&id)?).await?;
    Ok(Reply::one(format, UploadSchema::from(&upload)).status(StatusCode::ACCEPTED))
}

/// GET /v1/uploads/:id/errors
async fn upload_errors(
    State(state): State<AppState>,
    format: Format,
    Pagination(request): Pagination,
    Path(id): Path<String>,
) -> ApiResult<Reply<ProcessingErrorSchema>> {
    let (errors, page) = state.uploads().errors(parse_id(&id)?, request).await?;
    let items = errors.iter().map(ProcessingErrorSchema::from).collect();
    Ok(Reply::page(format, items, page))
}
