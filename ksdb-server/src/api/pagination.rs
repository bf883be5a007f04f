//! Pagination query extraction and response headers

use axum::{
    extract::{FromRequestParts, Query},
    http::{request::Parts, HeaderMap, HeaderName, HeaderValue},
};
use ksdb_common::pagination::{Page, PageRequest};
use serde::Deserialize;

use crate::error::ApiError;
use crate::AppState;

pub const PAGINATION_OFFSET: &str = "pagination-offset";
pub const PAGINATION_LIMIT: &str = "pagination-limit";
pub const PAGINATION_COUNT: &str = "pagination-count";
pub const PAGINATION_TOTAL: &str = "pagination-total";

/// Raw values; parsed by [`PageRequest::parse`] so bad numbers become 400
#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<String>,
    offset: Option<String>,
}

/// `limit`/`offset` query parameters, validated against the API config
#[derive(Debug, Clone, Copy)]
pub struct Pagination(pub PageRequest);

#[axum::async_trait]
impl FromRequestParts<AppState> for Pagination {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Query(query) = Query::<PageQuery>::try_from_uri(&parts.uri)
            .map_err(|e| ApiError::BadRequest(format!("Invalid query string: {}", e)))?;

        let request = PageRequest::parse(
            query.limit.as_deref(),
            query.offset.as_deref(),
            state.config.api.default_limit,
            state.config.api.max_limit,
        )?;
        Ok(Pagination(request))
    }
}

/// `Pagination-*` headers describing a returned page
pub fn page_headers(page: &Page) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in [
        (PAGINATION_OFFSET, page.offset),
        (PAGINATION_LIMIT, page.limit),
        (PAGINATION_COUNT, page.count),
        (PAGINATION_TOTAL, page.total),
    ] {
        headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
    }
    headers
}
