//! HTTP handlers for the client-facing surface.

pub mod claude;
pub mod models;
pub mod openai;
pub mod quota;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use apogee_types::ProxyError;

/// Which client dialect an error body should be rendered in.
#[derive(Debug, Clone, Copy)]
pub enum Dialect {
    OpenAi,
    Anthropic,
}

/// Render a `ProxyError` as a dialect-correct HTTP response, carrying
/// `x-request-id` and, for rate-limit errors, `Retry-After`.
pub fn error_response(error: &ProxyError, dialect: Dialect, request_id: &str) -> Response {
    let status = StatusCode::from_u16(error.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match dialect {
        Dialect::OpenAi => error.openai_body(),
        Dialect::Anthropic => error.anthropic_body(),
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-request-id", request_id);
    if let Some(secs) = error.retry_after_secs() {
        builder = builder.header(header::RETRY_AFTER, secs.to_string());
    }

    builder.body(Body::from(body.to_string())).unwrap_or_else(|e| {
        tracing::error!("Failed to build error response: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

/// Fresh per-request id surfaced as `x-request-id`.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
