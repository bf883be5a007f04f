//! Error types for the HTTP API
//!
//! Every error is rendered as an RFC 7807 problem document. The JSON form is
//! produced here; the negotiation middleware re-renders it as XML when the
//! client asked for XML (see [`crate::api::negotiate`]).

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("{0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("{0}")]
    BadRequest(String),

    /// Resource state forbids the operation (409), e.g. upload not open
    #[error("{0}")]
    Conflict(String),

    /// Request body has the wrong media type (415)
    #[error("{0}")]
    UnsupportedMediaType(String),

    /// No acceptable response representation (406)
    #[error("{0}")]
    NotAcceptable(String),

    /// Internal server error (500)
    #[error("{0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

impl From<ksdb_common::Error> for ApiError {
    fn from(err: ksdb_common::Error) -> Self {
        use ksdb_common::Error as E;
        match err {
            E::NotFound(msg) => ApiError::NotFound(msg),
            E::Conflict(msg) => ApiError::Conflict(msg),
            E::InvalidInput(msg) => ApiError::BadRequest(msg),
            E::Txt(e) => ApiError::BadRequest(format!("Invalid UltraStar file: {}", e)),
            E::Io(e) => ApiError::Io(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            ApiError::Internal(_) | ApiError::Io(_) | ApiError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Problem type slug, the last segment of the `type` URI
    fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not-found",
            ApiError::BadRequest(_) => "bad-request",
            ApiError::Conflict(_) => "conflict",
            ApiError::UnsupportedMediaType(_) => "unsupported-media-type",
            ApiError::NotAcceptable(_) => "not-acceptable",
            ApiError::Internal(_) | ApiError::Io(_) | ApiError::Other(_) => "internal-error",
        }
    }

    pub fn to_problem(&self) -> Problem {
        let status = self.status();
        Problem {
            problem_type: format!("urn:ksdb:problem:{}", self.kind()),
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            status: status.as_u16(),
            detail: self.to_string(),
        }
    }
}

/// RFC 7807 problem details
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
}

pub const PROBLEM_JSON: &str = "application/problem+json";
pub const PROBLEM_XML: &str = "application/problem+xml";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let problem = self.to_problem();
        let body = serde_json::to_vec(&problem).unwrap_or_default();
        let mut response = (status, body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROBLEM_JSON),
        );
        response.extensions_mut().insert(problem);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_error_mapping() {
        let err: ApiError = ksdb_common::Error::NotFound("song x".into()).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err: ApiError = ksdb_common::Error::Conflict("closed".into()).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err: ApiError = ksdb_common::Error::InvalidInput("limit".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: ApiError = ksdb_common::Error::Migration("boom".into()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_problem_fields() {
        let problem = ApiError::UnsupportedMediaType("expected text/plain".into()).to_problem();
        assert_eq!(problem.status, 415);
        assert_eq!(problem.problem_type, "urn:ksdb:problem:unsupported-media-type");
        assert_eq!(problem.title, "Unsupported Media Type");
        assert_eq!(problem.detail, "expected text/plain");
    }

    #[test]
    fn test_into_response_carries_problem() {
        let response = ApiError::NotFound("nothing here".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            PROBLEM_JSON
        );
        assert!(response.extensions().get::<Problem>().is_some());
    }
}
