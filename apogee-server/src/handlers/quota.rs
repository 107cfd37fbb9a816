//! `GET /v1/quota`: best-effort refresh fan-out, then snapshot.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn quota_snapshot(State(state): State<Arc<AppState>>) -> Json<Value> {
    // Refresh concurrently across ready accounts; individual failures
    // only degrade freshness.
    state.dispatcher.refresh_all_quota().await;

    let accounts = state.dispatcher.pool().list();
    let snapshot = state.dispatcher.quota().snapshot(&accounts);

    Json(json!({ "object": "list", "accounts": snapshot }))
}
