//! Pagination utilities
//!
//! Collections are paged with `limit`/`offset` query parameters. The
//! resulting [`Page`] describes what was actually returned so the HTTP layer
//! can emit the `Pagination-*` headers.

use serde::Serialize;

use crate::{Error, Result};

/// Default page size when the client does not send `limit`
pub const DEFAULT_LIMIT: i64 = 25;

/// Upper bound for `limit`; larger requests are clamped
pub const MAX_LIMIT: i64 = 100;

/// A validated pagination request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum number of items to return
    pub limit: i64,
    /// Number of items to skip
    pub offset: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl PageRequest {
    /// Parse raw `limit` and `offset` query values
    ///
    /// Missing values fall back to `default_limit` and `0`. Non-numeric or
    /// negative values are rejected. A limit above `max_limit` is clamped.
    ///
    /// # Examples
    /// ```
    /// use ksdb_common::pagination::PageRequest;
    ///
    /// let req = PageRequest::parse(Some("500"), Some("20"), 25, 100).unwrap();
    /// assert_eq!(req.limit, 100);
    /// assert_eq!(req.offset, 20);
    ///
    /// assert!(PageRequest::parse(Some("-1"), None, 25, 100).is_err());
    /// ```
    pub fn parse(
        limit: Option<&str>,
        offset: Option<&str>,
        default_limit: i64,
        max_limit: i64,
    ) -> Result<Self> {
        let limit = match limit {
            Some(raw) => parse_non_negative("limit", raw)?.min(max_limit),
            None => default_limit,
        };
        let offset = match offset {
            Some(raw) => parse_non_negative("offset", raw)?,
            None => 0,
        };

        Ok(Self { limit, offset })
    }
}

fn parse_non_negative(name: &str, raw: &str) -> Result<i64> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::InvalidInput(format!("{} must be an integer, got {:?}", name, raw)))?;
    if value < 0 {
        return Err(Error::InvalidInput(format!(
            "{} must not be negative, got {}",
            name, value
        )));
    }
    Ok(value)
}

/// Pagination metadata for a returned page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    /// Offset that was applied
    pub offset: i64,
    /// Limit that was applied (after clamping)
    pub limit: i64,
    /// Number of items in this page
    pub count: i64,
    /// Total number of items in the collection
    pub total: i64,
}

impl Page {
    /// Describe a page produced for `request`
    pub fn new(request: PageRequest, count: usize, total: i64) -> Self {
        Self {
            offset: request.offset,
            limit: request.limit,
            count: count as i64,
            total,
        }
    }
}

/// Slice an in-memory collection the way a LIMIT/OFFSET query would
pub fn slice<T>(items: Vec<T>, request: PageRequest) -> (Vec<T>, i64) {
    let total = items.len() as i64;
    let page = items
        .into_iter()
        .skip(request.offset as usize)
        .take(request.limit as usize)
        .collect();
    (page, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let req = PageRequest::parse(None, None, DEFAULT_LIMIT, MAX_LIMIT).unwrap();
        assert_eq!(req, PageRequest::default());
    }

    #[test]
    fn test_limit_clamped_to_max() {
        let req = PageRequest::parse(Some("1000"), None, DEFAULT_LIMIT, MAX_LIMIT).unwrap();
        assert_eq!(req.limit, MAX_LIMIT);
    }

    #[test]
    fn test_zero_limit_allowed() {
        let req = PageRequest::parse(Some("0"), Some("3"), DEFAULT_LIMIT, MAX_LIMIT).unwrap();
        assert_eq!(req.limit, 0);
        assert_eq!(req.offset, 3);
    }

    #[test]
    fn test_rejects_non_numeric() {
        let err = PageRequest::parse(Some("ten"), None, DEFAULT_LIMIT, MAX_LIMIT).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_rejects_negative_offset() {
        let err = PageRequest::parse(None, Some("-5"), DEFAULT_LIMIT, MAX_LIMIT).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_page_describes_request() {
        let req = PageRequest { limit: 10, offset: 20 };
        let page = Page::new(req, 5, 25);
        assert_eq!((page.offset, page.limit, page.count, page.total), (20, 10, 5, 25));
    }

    #[test]
    fn test_slice_beyond_end() {
        let (items, total) = slice(vec![1, 2, 3], PageRequest { limit: 5, offset: 10 });
        assert!(items.is_empty());
        assert_eq!(total, 3);
    }

    #[test]
    fn test_slice_middle() {
        let (items, total) = slice((1..=10).collect::<Vec<_>>(), PageRequest { limit: 3, offset: 4 });
        assert_eq!(items, vec![5, 6, 7]);
        assert_eq!(total, 10);
    }
}
