//! API-key gate for the `/v1` surface.
//!
//! OpenAI-style endpoints authenticate with `Authorization: Bearer`,
//! `/v1/messages` with `x-api-key` (matching each dialect's native SDK).
//! With no key configured the proxy is open.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use apogee_types::ProxyError;

use crate::state::AppState;

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.api_key.as_deref() else {
        return next.run(request).await;
    };

    let path = request.uri().path();
    let anthropic_dialect = path == "/v1/messages";

    let presented = if anthropic_dialect {
        request.headers().get("x-api-key").and_then(|v| v.to_str().ok())
    } else {
        request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    };

    if presented == Some(expected) {
        return next.run(request).await;
    }

    tracing::warn!(%path, "Rejected request with missing or invalid API key");
    let error = ProxyError::Upstream { status: 401, message: "invalid API key".into() };
    let body = if anthropic_dialect { error.anthropic_body() } else { error.openai_body() };

    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| StatusCode::UNAUTHORIZED.into_response())
}
