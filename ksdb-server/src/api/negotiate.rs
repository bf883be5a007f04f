//! Content negotiation
//!
//! The [`negotiate`] middleware picks a response format from the `Accept`
//! header and stores it as a request extension. Handlers that produce a
//! structured body extract [`Format`]; extraction fails with 406 when the
//! client accepts neither JSON nor XML. Problem responses leaving the router
//! are re-rendered as XML when XML was negotiated.

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use ksdb_common::pagination::Page;
use serde::ser::{Serialize, SerializeStruct, Serializer};

use super::pagination::page_headers;
use crate::error::{ApiError, Problem, PROBLEM_XML};

/// Structured response format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Xml,
}

const JSON_TYPES: &[&str] = &["application/json"];
const XML_TYPES: &[&str] = &["application/xml", "text/xml"];

impl Format {
    pub fn content_type(self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Xml => "application/xml",
        }
    }

    /// Choose a format for an `Accept` header value
    ///
    /// A missing or empty header means JSON. Each format takes the quality
    /// of the most specific range matching one of its media types; the best
    /// quality wins, ties go to the range listed first and then to JSON.
    /// Returns `None` when both formats end up with quality zero.
    pub fn from_accept(accept: Option<&str>) -> Option<Format> {
        let accept = match accept.map(str::trim) {
            None | Some("") => return Some(Format::Json),
            Some(a) => a,
        };
        let ranges: Vec<MediaRange> = accept.split(',').filter_map(MediaRange::parse).collect();

        let json = best_match(&ranges, JSON_TYPES);
        let xml = best_match(&ranges, XML_TYPES);

        match (json, xml) {
            (None, None) => None,
            (Some(_), None) => Some(Format::Json),
            (None, Some(_)) => Some(Format::Xml),
            (Some((jq, jpos)), Some((xq, xpos))) => {
                if xq > jq || (xq == jq && xpos < jpos) {
                    Some(Format::Xml)
                } else {
                    Some(Format::Json)
                }
            }
        }
    }
}

struct MediaRange {
    kind: String,
    subtype: String,
    quality: f32,
}

impl MediaRange {
    fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let (kind, subtype) = parts.next()?.trim().split_once('/')?;
        let mut quality = 1.0;
        for param in parts {
            if let Some((name, value)) = param.split_once('=') {
                if name.trim().eq_ignore_ascii_case("q") {
                    quality = value.trim().parse().unwrap_or(0.0);
                }
            }
        }
        Some(Self {
            kind: kind.trim().to_ascii_lowercase(),
            subtype: subtype.trim().to_ascii_lowercase(),
            quality,
        })
    }

    /// 3 = exact, 2 = `type/*`, 1 = `*/*`, 0 = no match
    fn specificity(&self, media_type: &str) -> u8 {
        let Some((kind, subtype)) = media_type.split_once('/') else {
            return 0;
        };
        match (self.kind.as_str(), self.subtype.as_str()) {
            ("*", "*") => 1,
            (k, "*") if k == kind => 2,
            (k, s) if k == kind && s == subtype => 3,
            _ => 0,
        }
    }
}

/// Best (quality, position) for any of `types`; `None` if unacceptable
fn best_match(ranges: &[MediaRange], types: &[&str]) -> Option<(f32, usize)> {
    let mut best: Option<(f32, usize)> = None;
    for media_type in types {
        let chosen = ranges
            .iter()
            .enumerate()
            .map(|(pos, r)| (r.specificity(media_type), pos, r))
            .filter(|(spec, _, _)| *spec > 0)
            .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
        let Some((_, pos, range)) = chosen else {
            continue;
        };
        let better = best.map_or(true, |(q, p)| range.quality > q || (range.quality == q && pos < p));
        if range.quality > 0.0 && better {
            best = Some((range.quality, pos));
        }
    }
    best
}

/// Outcome of negotiation, stored as a request extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated(pub Option<Format>);

/// Middleware storing the negotiated format and converting problems to XML
pub async fn negotiate(mut req: Request, next: Next) -> Response {
    let accept = req
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok());
    let format = Format::from_accept(accept);
    req.extensions_mut().insert(Negotiated(format));

    let response = next.run(req).await;

    if format != Some(Format::Xml) {
        return response;
    }
    let Some(problem) = response.extensions().get::<Problem>().cloned() else {
        return response;
    };
    problem_as_xml(response, &problem)
}

fn problem_as_xml(response: Response, problem: &Problem) -> Response {
    let Ok(xml) = quick_xml::se::to_string_with_root("problem", problem) else {
        return response;
    };
    let (mut parts, _) = response.into_parts();
    parts.headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_XML));
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(xml))
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Format
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Negotiated>() {
            Some(Negotiated(Some(format))) => Ok(*format),
            Some(Negotiated(None)) => Err(ApiError::NotAcceptable(
                "Supported response types: application/json, application/xml".to_string(),
            )),
            // Router built without the middleware
            None => Ok(Format::Json),
        }
    }
}

/// Element names used when a resource is rendered as XML
pub trait XmlName {
    /// Root element of a single resource
    const ROOT: &'static str;
    /// Root element of a collection
    const LIST: &'static str;
}

/// Collection wrapper: `<LIST><ROOT>..</ROOT><ROOT>..</ROOT></LIST>`
struct XmlList<'a, T> {
    item: &'static str,
    items: &'a [T],
}

impl<T: Serialize> Serialize for XmlList<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("list", 1)?;
        s.serialize_field(self.item, self.items)?;
        s.end()
    }
}

enum ReplyBody<T> {
    One(T),
    Many(Vec<T>),
}

/// A structured response in the negotiated format
pub struct Reply<T> {
    format: Format,
    status: StatusCode,
    headers: HeaderMap,
    body: ReplyBody<T>,
}

impl<T> Reply<T> {
    pub fn one(format: Format, item: T) -> Self {
        Self {
            format,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: ReplyBody::One(item),
        }
    }

    /// A page of a collection, with `Pagination-*` headers
    pub fn page(format: Format, items: Vec<T>, page: Page) -> Self {
        Self {
            format,
            status: StatusCode::OK,
            headers: page_headers(&page),
            body: ReplyBody::Many(items),
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn location(mut self, location: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(location) {
            self.headers.insert(header::LOCATION, value);
        }
        self
    }
}

impl<T> Reply<T>
where
    T: Serialize + XmlName,
{
    fn render(&self) -> Result<Vec<u8>, ApiError> {
        let rendered = match (self.format, &self.body) {
            (Format::Json, ReplyBody::One(item)) => serde_json::to_vec(item),
            (Format::Json, ReplyBody::Many(items)) => serde_json::to_vec(items),
            (Format::Xml, ReplyBody::One(item)) => {
                return quick_xml::se::to_string_with_root(T::ROOT, item)
                    .map(String::into_bytes)
                    .map_err(|e| ApiError::Internal(format!("XML serialization failed: {}", e)));
            }
            (Format::Xml, ReplyBody::Many(items)) => {
                let list = XmlList {
                    item: T::ROOT,
                    items,
                };
                return quick_xml::se::to_string_with_root(T::LIST, &list)
                    .map(String::into_bytes)
                    .map_err(|e| ApiError::Internal(format!("XML serialization failed: {}", e)));
            }
        };
        rendered.map_err(|e| ApiError::Internal(format!("JSON serialization failed: {}", e)))
    }
}

impl<T> IntoResponse for Reply<T>
where
    T: Serialize + XmlName,
{
    fn into_response(self) -> Response {
        let body = match self.render() {
            Ok(body) => body,
            Err(e) => return e.into_response(),
        };
        let mut response = (self.status, self.headers, body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.format.content_type()),
        );
        response
    }
}
