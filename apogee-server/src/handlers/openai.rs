//! `POST /v1/chat/completions`.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use apogee_core::mappers::openai::{
    build_chat_completion, build_upstream_request, openai_sse_stream, ChatCompletionRequest,
};
use apogee_types::ProxyError;

use crate::state::AppState;

use super::{error_response, new_request_id, Dialect};

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    let request_id = new_request_id();
    let started = Instant::now();

    let request: ChatCompletionRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            let error = ProxyError::InvalidRequest { message: e.to_string() };
            return error_response(&error, Dialect::OpenAi, &request_id);
        },
    };

    tracing::info!(
        request_id = %request_id,
        model = %request.model,
        stream = request.stream,
        "chat completion request"
    );

    if request.stream {
        stream_response(&state, request, &request_id).await
    } else {
        unary_response(&state, request, &request_id, started).await
    }
}

async fn unary_response(
    state: &AppState,
    request: ChatCompletionRequest,
    request_id: &str,
    started: Instant,
) -> Response {
    let model = request.model.clone();
    let upstream = state
        .dispatcher
        .unary(Some(&model), |project| build_upstream_request(&request, project))
        .await;

    match upstream {
        Ok(value) => {
            let completion = build_chat_completion(&value, &model);
            let processing_ms = started.elapsed().as_millis();
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-request-id", request_id)
                .header("openai-processing-ms", processing_ms.to_string())
                .body(Body::from(completion.to_string()))
                .unwrap_or_else(|e| {
                    tracing::error!("Failed to build response: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                })
        },
        Err(error) => error_response(&error, Dialect::OpenAi, request_id),
    }
}

async fn stream_response(
    state: &AppState,
    request: ChatCompletionRequest,
    request_id: &str,
) -> Response {
    let model = request.model.clone();
    let upstream = state
        .dispatcher
        .stream(Some(&model), |project| build_upstream_request(&request, project))
        .await;

    match upstream {
        Ok(byte_stream) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .header("x-request-id", request_id)
            .body(Body::from_stream(openai_sse_stream(byte_stream, model)))
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build SSE response: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }),
        // Headers have not been sent yet: errors (including exhaustion
        // with its Retry-After) surface as plain HTTP.
        Err(error) => error_response(&error, Dialect::OpenAi, request_id),
    }
}
