//! Error taxonomy (spec.md §7), rendered to HTTP responses for the
//! downstream surface and to `tracing` events for upstream faults.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("csrf token invalid")]
    CsrfInvalid,

    #[error("not found")]
    NotFound,

    #[error("all targeted relays unhealthy")]
    Unhealthy { retry_after_secs: u64 },

    #[error("backpressure: write queue saturated")]
    Backpressure,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        AppError::InvalidArgument(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            AppError::CsrfInvalid => (StatusCode::FORBIDDEN, "csrf_invalid"),
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Unhealthy { .. } => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
            AppError::Backpressure => (StatusCode::SERVICE_UNAVAILABLE, "backpressure"),
            AppError::Internal(e) => {
                tracing::error!(err = %e, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };

        let body = json!({ "error": code, "message": self.to_string() });
        let mut response = (status, axum::Json(body)).into_response();
        if let AppError::Unhealthy { retry_after_secs } = self {
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                axum::http::HeaderValue::from_str(&retry_after_secs.to_string())
                    .unwrap_or_else(|_| axum::http::HeaderValue::from_static("5")),
            );
        }
        response
    }
}

/// Upstream protocol faults (malformed/oversize frames, failed signature
/// verification). These are contained at the connection boundary per
/// spec.md §7 — they never surface directly to an HTTP caller, only as a
/// counter increment and a connection close.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum UpstreamProtocolError {
    #[error("unknown frame discriminator: {0}")]
    UnknownFrame(String),
    #[error("oversize frame: {0} bytes")]
    OversizeFrame(usize),
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("event id mismatch")]
    EventIdMismatch,
    #[error("event timestamp out of tolerance")]
    TimestampOutOfTolerance,
    #[error("content too large: {0} bytes")]
    ContentTooLarge(usize),
    #[error("signature verification failed")]
    BadSignature,
}
