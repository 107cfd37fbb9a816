//! `GET /v1/models`: the static catalog in the OpenAI list shape.

use axum::Json;
use serde_json::{json, Value};

use apogee_types::MODEL_CATALOG;

pub async fn list_models() -> Json<Value> {
    let data: Vec<Value> = MODEL_CATALOG
        .iter()
        .map(|card| {
            json!({
                "id": card.id,
                "object": "model",
                "created": card.created,
                "owned_by": card.owned_by,
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": data }))
}
