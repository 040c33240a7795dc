//! Shared cache/ETag response envelope for the read routes (spec.md §6:
//! `ETag`, `Cache-Control`, `Vary` headers; 304 on `If-None-Match` match).

use crate::model::Event;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

#[derive(Serialize)]
pub struct Page<T: Serialize> {
    pub events: T,
    pub meta: Meta,
}

#[derive(Serialize, Default)]
pub struct Meta {
    pub eose_union: bool,
    pub enrichment_degraded: bool,
    /// Pass as `until` on the next request to page backward past this
    /// page's oldest event (spec.md §4.5). Absent once the page is empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_until: Option<i64>,
}

const SIREN_MEDIA_TYPE: &str = "application/vnd.siren+json";

/// Builds the cacheable JSON response for a query result, honoring
/// `If-None-Match` with a bodyless 304 — spec.md §8 "ETag idempotence":
/// identical result set always produces the same ETag.
///
/// `events` is the actual returned page, not the query that produced it —
/// the ETag is an 8-byte truncated SHA-256 over (first id, last id, count)
/// of that page (spec.md §6), so two pages from the same filter at
/// different points in time get different ETags as new events arrive.
///
/// When the caller's `Accept` header prefers `application/vnd.siren+json`,
/// the body is wrapped in a minimal Siren envelope (`class`, `properties`,
/// `links`) instead of bare JSON — just enough of the content-negotiation
/// contract for a hypermedia-aware client, without this crate owning the
/// full presentation layer (an external collaborator's concern).
pub fn cached_json<T: Serialize>(
    request_headers: &HeaderMap,
    events: &[Event],
    body: &T,
) -> Response {
    let etag = compute_etag(events);
    let quoted = format!("\"{etag}\"");
    if let Some(inm) = request_headers.get(header::IF_NONE_MATCH) {
        if inm.to_str().map(|v| v == quoted).unwrap_or(false) {
            return StatusCode::NOT_MODIFIED.into_response();
        }
    }

    let wants_siren = request_headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains(SIREN_MEDIA_TYPE))
        .unwrap_or(false);

    let mut response = if wants_siren {
        let envelope = json!({
            "class": ["page"],
            "properties": body,
            "links": [{ "rel": ["self"], "href": format!("urn:relaygate:etag:{etag}") }],
        });
        let mut r = axum::Json(envelope).into_response();
        r.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static(SIREN_MEDIA_TYPE));
        r
    } else {
        axum::Json(body).into_response()
    };

    let headers = response.headers_mut();
    headers.insert(header::ETAG, HeaderValue::from_str(&quoted).unwrap());
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=5, stale-while-revalidate=60"),
    );
    headers.insert(header::VARY, HeaderValue::from_static("Accept"));
    if let Some(last_modified) = last_modified_header(events) {
        headers.insert(header::LAST_MODIFIED, last_modified);
    }
    response
}

/// 8-byte truncated SHA-256 over (first id, last id, count) of the page —
/// spec.md §6. An empty page hashes just the (zero) count.
fn compute_etag(events: &[Event]) -> String {
    let mut hasher = Sha256::new();
    if let (Some(first), Some(last)) = (events.first(), events.last()) {
        hasher.update(first.id.to_hex().as_bytes());
        hasher.update(last.id.to_hex().as_bytes());
    }
    hasher.update(events.len().to_le_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// `Last-Modified` per spec.md §6: the newest event's timestamp, HTTP-date
/// formatted. Absent when the page is empty.
fn last_modified_header(events: &[Event]) -> Option<HeaderValue> {
    let newest = events.iter().map(|e| e.created_at).max()?;
    let dt = chrono::DateTime::from_timestamp(newest, 0)?;
    HeaderValue::from_str(&dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()).ok()
}

pub fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (status, axum::Json(json!({ "error": message.into() }))).into_response()
}
