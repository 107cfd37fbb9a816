//! Bidirectional protocol transformers between the client dialects and
//! the upstream generate-content format.

pub mod claude;
pub mod openai;
pub mod schema;

use rand::Rng;
use serde_json::{json, Value};

/// `userAgent` field of the upstream request envelope.
pub const ENVELOPE_USER_AGENT: &str = "antigravity";

/// Default safety settings sent with every upstream request.
pub fn safety_settings() -> Value {
    json!([
        { "category": "HARM_CATEGORY_HARASSMENT", "threshold": "OFF" },
        { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "OFF" },
        { "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "OFF" },
        { "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "OFF" },
    ])
}

/// Wrap an inner generate-content request in the upstream metadata
/// envelope. A fresh request id and session id are minted per call.
pub fn wrap_envelope(project: &str, model: &str, mut inner: Value) -> Value {
    inner["sessionId"] = json!(new_session_id());
    json!({
        "project": project,
        "requestId": format!("agent-{}", uuid::Uuid::new_v4()),
        "request": inner,
        "model": model,
        "userAgent": ENVELOPE_USER_AGENT,
    })
}

/// Session ids are negative-prefixed 18-digit decimals, e.g.
/// `-735183646921348267`.
pub fn new_session_id() -> String {
    let n: u64 = rand::thread_rng().gen_range(100_000_000_000_000_000..1_000_000_000_000_000_000);
    format!("-{n}")
}

/// Tool-call ids in the OpenAI dialect: `call_` + 24 hex chars.
pub fn new_call_id() -> String {
    let mut rng = rand::thread_rng();
    let hex: String = (0..24)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect();
    format!("call_{hex}")
}

/// Tool-use ids in the Anthropic dialect: `toolu_` + 24 hex chars.
pub fn new_tool_use_id() -> String {
    let mut rng = rand::thread_rng();
    let hex: String = (0..24)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect();
    format!("toolu_{hex}")
}

/// Upstream payloads sometimes arrive wrapped as `{"response": {...}}`;
/// peel that layer off when present.
pub fn unwrap_response(value: &Value) -> &Value {
    value.get("response").unwrap_or(value)
}

/// First candidate's parts array, if any.
pub fn candidate_parts(value: &Value) -> Option<&Vec<Value>> {
    unwrap_response(value)
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
}

/// First candidate's finish reason, if any.
pub fn candidate_finish_reason(value: &Value) -> Option<&str> {
    unwrap_response(value)
        .pointer("/candidates/0/finishReason")
        .and_then(|v| v.as_str())
}

/// Token counts from `usageMetadata`, if present.
pub fn usage_metadata(value: &Value) -> Option<(u64, u64, u64)> {
    let usage = unwrap_response(value).get("usageMetadata")?;
    let prompt = usage.get("promptTokenCount").and_then(|v| v.as_u64()).unwrap_or(0);
    let candidates = usage.get("candidatesTokenCount").and_then(|v| v.as_u64()).unwrap_or(0);
    let total = usage
        .get("totalTokenCount")
        .and_then(|v| v.as_u64())
        .unwrap_or(prompt + candidates);
    Some((prompt, candidates, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_shape() {
        let id = new_session_id();
        assert!(id.starts_with('-'));
        assert_eq!(id.len(), 19);
        assert!(id[1..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn call_id_shape() {
        let id = new_call_id();
        assert!(id.starts_with("call_"));
        assert_eq!(id.len(), 5 + 24);
    }

    #[test]
    fn envelope_carries_project_model_and_session() {
        let body = wrap_envelope("proj-9", "gemini-3-flash", serde_json::json!({"contents": []}));
        assert_eq!(body["project"], "proj-9");
        assert_eq!(body["model"], "gemini-3-flash");
        assert_eq!(body["userAgent"], ENVELOPE_USER_AGENT);
        assert!(body["requestId"].as_str().unwrap().starts_with("agent-"));
        assert!(body["request"]["sessionId"].as_str().unwrap().starts_with('-'));
    }

    #[test]
    fn response_unwrapping() {
        let wrapped = serde_json::json!({"response": {"candidates": [{"content": {"parts": [{"text": "x"}]}}]}});
        assert_eq!(candidate_parts(&wrapped).unwrap().len(), 1);

        let bare = serde_json::json!({"candidates": [{"content": {"parts": []}, "finishReason": "STOP"}]});
        assert_eq!(candidate_finish_reason(&bare), Some("STOP"));
    }
}
