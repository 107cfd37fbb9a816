//! Upstream unary response → Anthropic message body.

use serde_json::{json, Value};

use crate::mappers::{
    candidate_finish_reason, candidate_parts, new_tool_use_id, usage_metadata,
};

use super::map_stop_reason;

/// Build the client-facing message from an upstream response.
pub fn build_message_response(upstream: &Value, model: &str) -> Value {
    let mut content: Vec<Value> = Vec::new();
    let mut saw_tool_use = false;

    if let Some(parts) = candidate_parts(upstream) {
        for part in parts {
            let is_thought =
                part.get("thought").and_then(|v| v.as_bool()).unwrap_or(false);

            if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                if is_thought {
                    content.push(json!({ "type": "thinking", "thinking": text }));
                } else {
                    content.push(json!({ "type": "text", "text": text }));
                }
            }

            if let Some(call) = part.get("functionCall") {
                saw_tool_use = true;
                let id = call
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(new_tool_use_id);
                content.push(json!({
                    "type": "tool_use",
                    "id": id,
                    "name": call.get("name").and_then(|v| v.as_str()).unwrap_or_default(),
                    "input": call.get("args").cloned().unwrap_or_else(|| json!({})),
                }));
            }
        }
    }

    let stop_reason = if saw_tool_use {
        "tool_use"
    } else {
        map_stop_reason(candidate_finish_reason(upstream).unwrap_or("STOP"))
    };

    let (input_tokens, output_tokens, _) = usage_metadata(upstream).unwrap_or((0, 0, 0));

    json!({
        "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
        },
    })
}
