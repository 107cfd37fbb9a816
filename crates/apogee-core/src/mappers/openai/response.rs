//! Upstream unary response → OpenAI chat-completion body.

use serde_json::{json, Value};

use crate::mappers::{candidate_finish_reason, candidate_parts, new_call_id, usage_metadata};

use super::map_finish_reason;

/// Build the client-facing chat completion from an upstream response.
pub fn build_chat_completion(upstream: &Value, model: &str) -> Value {
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    if let Some(parts) = candidate_parts(upstream) {
        for part in parts {
            let is_thought =
                part.get("thought").and_then(|v| v.as_bool()).unwrap_or(false);
            if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                if is_thought {
                    reasoning.push_str(text);
                } else {
                    content.push_str(text);
                }
            }
            if let Some(call) = part.get("functionCall") {
                let id = call
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(new_call_id);
                let name = call.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": args.to_string(),
                    }
                }));
            }
        }
    }

    let finish_reason = if tool_calls.is_empty() {
        map_finish_reason(candidate_finish_reason(upstream).unwrap_or("STOP"))
    } else {
        "tool_calls"
    };

    let mut message = json!({ "role": "assistant", "content": content });
    if !reasoning.is_empty() {
        message["reasoning_content"] = json!(reasoning);
    }
    if !tool_calls.is_empty() {
        message["tool_calls"] = json!(tool_calls);
    }

    let mut completion = json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
    });

    if let Some((prompt, candidates, total)) = usage_metadata(upstream) {
        completion["usage"] = json!({
            "prompt_tokens": prompt,
            "completion_tokens": candidates,
            "total_tokens": total,
        });
    }

    completion
}
