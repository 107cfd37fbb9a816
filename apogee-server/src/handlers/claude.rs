//! `POST /v1/messages`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use apogee_core::mappers::claude::{
    build_message_response, build_upstream_request, claude_sse_stream, MessagesRequest,
};
use apogee_types::ProxyError;

use crate::state::AppState;

use super::{error_response, new_request_id, Dialect};

pub async fn messages(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let request_id = new_request_id();

    let request: MessagesRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            let error = ProxyError::InvalidRequest { message: e.to_string() };
            return error_response(&error, Dialect::Anthropic, &request_id);
        },
    };

    tracing::info!(
        request_id = %request_id,
        model = %request.model,
        stream = request.stream,
        "messages request"
    );

    let model = request.model.clone();

    if request.stream {
        let upstream = state
            .dispatcher
            .stream(Some(&model), |project| build_upstream_request(&request, project))
            .await;

        return match upstream {
            Ok(byte_stream) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::CONNECTION, "keep-alive")
                .header("x-request-id", request_id)
                .body(Body::from_stream(claude_sse_stream(byte_stream, model)))
                .unwrap_or_else(|e| {
                    tracing::error!("Failed to build SSE response: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }),
            Err(error) => error_response(&error, Dialect::Anthropic, &request_id),
        };
    }

    let upstream = state
        .dispatcher
        .unary(Some(&model), |project| build_upstream_request(&request, project))
        .await;

    match upstream {
        Ok(value) => {
            let message = build_message_response(&value, &model);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-request-id", request_id)
                .body(Body::from(message.to_string()))
                .unwrap_or_else(|e| {
                    tracing::error!("Failed to build response: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                })
        },
        Err(error) => error_response(&error, Dialect::Anthropic, &request_id),
    }
}
