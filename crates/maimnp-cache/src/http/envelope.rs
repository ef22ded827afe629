//! Stored form of a cached HTTP response.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Headers never replayed from the cache.
const SKIPPED_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "etag",
    "keep-alive",
    "set-cookie",
    "transfer-encoding",
    "x-cache",
    "x-response-time",
];

/// JSON envelope stored under an HTTP cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub content: String,
    pub status_code: u16,
    /// Header name/value pairs in response order. Repeated headers such as
    /// `Vary` or `Link` keep one pair per value.
    pub headers: Vec<(String, String)>,
    pub media_type: Option<String>,
    pub etag: String,
    pub cached_at: String,
}

impl CachedResponse {
    /// Captures a buffered response. `content` must already be valid UTF-8.
    pub fn capture(status: StatusCode, headers: &HeaderMap, content: String, etag: String) -> Self {
        let media_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let headers = headers
            .iter()
            .filter(|(name, _)| {
                let name = name.as_str();
                name != header::CONTENT_TYPE.as_str() && !SKIPPED_HEADERS.contains(&name)
            })
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            content,
            status_code: status.as_u16(),
            headers,
            media_type,
            etag,
            cached_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        }
    }

    /// Rebuilds the full response.
    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.content));
        *response.status_mut() = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);

        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        if let Some(media_type) = self.media_type.as_deref()
            && let Ok(value) = HeaderValue::from_str(media_type)
        {
            headers.insert(header::CONTENT_TYPE, value);
        }
        if let Ok(etag) = HeaderValue::from_str(&self.etag) {
            headers.insert(header::ETAG, etag);
        }
        response
    }
}

/// Strong ETag derived from the response bytes.
pub fn compute_etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{}\"", hex::encode(&digest[..16]))
}

/// Whether an `If-None-Match` header value matches `etag`.
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    let wanted = etag.trim_start_matches("W/");
    if_none_match.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/") == wanted
    })
}

/// A `304 Not Modified` carrying only the ETag.
pub fn not_modified(etag: &str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    if let Ok(value) = HeaderValue::from_str(etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bodies_share_an_etag() {
        assert_eq!(compute_etag(b"hello"), compute_etag(b"hello"));
        assert_ne!(compute_etag(b"hello"), compute_etag(b"hello!"));
        assert!(compute_etag(b"").starts_with('"'));
    }

    #[test]
    fn if_none_match_forms() {
        let etag = compute_etag(b"x");
        assert!(etag_matches(&etag, &etag));
        assert!(etag_matches(&format!("W/{etag}"), &etag));
        assert!(etag_matches(&format!("\"other\", {etag}"), &etag));
        assert!(etag_matches("*", &etag));
        assert!(!etag_matches("\"other\"", &etag));
    }

    #[test]
    fn capture_skips_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("2"));
        headers.insert("x-custom", HeaderValue::from_static("1"));

        let envelope =
            CachedResponse::capture(StatusCode::OK, &headers, "{}".into(), "\"e\"".into());
        assert_eq!(envelope.media_type.as_deref(), Some("application/json"));
        assert_eq!(envelope.headers, vec![("x-custom".to_string(), "1".to_string())]);
        assert!(envelope.cached_at.ends_with('Z'));

        let response = envelope.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ETAG], "\"e\"");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn repeated_headers_survive_replay() {
        let mut headers = HeaderMap::new();
        headers.append(header::VARY, HeaderValue::from_static("accept"));
        headers.append(header::VARY, HeaderValue::from_static("accept-encoding"));
        headers.append(header::LINK, HeaderValue::from_static("</a>; rel=next"));
        headers.append(header::LINK, HeaderValue::from_static("</b>; rel=prev"));

        let envelope =
            CachedResponse::capture(StatusCode::OK, &headers, "{}".into(), "\"e\"".into());
        let stored = serde_json::to_string(&envelope).unwrap();
        let replayed = serde_json::from_str::<CachedResponse>(&stored).unwrap().into_response();

        let values = |name: header::HeaderName| {
            replayed
                .headers()
                .get_all(name)
                .iter()
                .map(|v| v.to_str().unwrap().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(values(header::VARY), ["accept", "accept-encoding"]);
        assert_eq!(values(header::LINK), ["</a>; rel=next", "</b>; rel=prev"]);
    }

    #[test]
    fn not_modified_has_only_etag() {
        let response = not_modified("\"abc\"");
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers().len(), 1);
    }
}
