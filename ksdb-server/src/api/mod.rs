//! HTTP API
//!
//! Resources live under `/v1`; `/health` sits at the root. Every structured
//! body is rendered in the format picked by [`negotiate`] from `Accept`.

pub mod health;
pub mod media;
pub mod negotiate;
pub mod pagination;
pub mod schema;
pub mod songs;
pub mod uploads;

pub use health::health_routes;
pub use media::media_routes;
pub use negotiate::{negotiate, Format, Reply};
pub use pagination::Pagination;
pub use songs::song_routes;
pub use uploads::upload_routes;

use axum::http::{header, HeaderMap};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Parse an id path segment; malformed ids are a client error, not a 404
pub fn parse_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid id: {}", raw)))
}

/// Handler for unknown routes
pub async fn fallback() -> ApiError {
    ApiError::NotFound("No such resource".to_string())
}

/// Essence of the request `Content-Type`, lower-cased
fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
        assert!(matches!(parse_id("not-a-uuid"), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_content_type_essence() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_type(&headers), None);
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("Text/Plain; charset=UTF-8"),
        );
        assert_eq!(content_type(&headers).as_deref(), Some("text/plain"));
    }
}
