//! Upstream SSE → OpenAI chat-completion chunk synthesis.
//!
//! One [`OpenAiStreamState`] accumulates per-stream state and turns each
//! upstream event into at most one client chunk. Completion is keyed off
//! the first usage-bearing upstream chunk; when the upstream ends without
//! one, a trailing finish chunk is synthesized so clients always see a
//! finish reason before `[DONE]`.

use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use apogee_types::error::openai_error_kind;

use crate::mappers::{
    candidate_finish_reason, candidate_parts, new_call_id, unwrap_response, usage_metadata,
};
use crate::sse::SseFramer;

use super::map_finish_reason;

#[derive(Debug, Default)]
struct ToolCallAcc {
    id: String,
    name: String,
    arguments: String,
}

/// Stream accumulator for the OpenAI dialect.
pub struct OpenAiStreamState {
    stream_id: String,
    created: i64,
    model: String,
    role_sent: bool,
    text: String,
    reasoning: String,
    tool_calls: BTreeMap<usize, ToolCallAcc>,
    /// Upstream call id → assigned client index. Accumulation is keyed by
    /// the upstream id when it provides one; unidentified calls each get
    /// a fresh index.
    index_by_id: HashMap<String, usize>,
    saw_tool_call: bool,
    finish_reason_seen: Option<String>,
    complete: bool,
}

impl OpenAiStreamState {
    pub fn new(model: String) -> Self {
        Self {
            stream_id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model,
            role_sent: false,
            text: String::new(),
            reasoning: String::new(),
            tool_calls: BTreeMap::new(),
            index_by_id: HashMap::new(),
            saw_tool_call: false,
            finish_reason_seen: None,
            complete: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Accumulated non-thought text (must equal the unary `content` for
    /// the same upstream events).
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Accumulated arguments for the tool call at `index`.
    pub fn tool_arguments(&self, index: usize) -> Option<&str> {
        self.tool_calls.get(&index).map(|acc| acc.arguments.as_str())
    }

    /// `(id, name, accumulated arguments)` per observed tool call, in
    /// index order.
    pub fn tool_call_views(&self) -> Vec<(&str, &str, &str)> {
        self.tool_calls
            .values()
            .map(|acc| (acc.id.as_str(), acc.name.as_str(), acc.arguments.as_str()))
            .collect()
    }

    /// Process one upstream JSON chunk; returns at most one client chunk.
    pub fn process_chunk(&mut self, upstream: &Value) -> Option<Value> {
        if self.complete {
            return None;
        }

        if let Some(reason) = candidate_finish_reason(upstream) {
            self.finish_reason_seen = Some(reason.to_string());
        }

        let mut delta = json!({});
        let mut tool_deltas: Vec<Value> = Vec::new();

        if let Some(parts) = candidate_parts(upstream) {
            for part in parts {
                let is_thought =
                    part.get("thought").and_then(|v| v.as_bool()).unwrap_or(false);

                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    if is_thought {
                        self.reasoning.push_str(text);
                        append_str(&mut delta, "reasoning_content", text);
                    } else {
                        self.text.push_str(text);
                        append_str(&mut delta, "content", text);
                    }
                }

                if let Some(call) = part.get("functionCall") {
                    tool_deltas.push(self.process_function_call(call));
                }
            }
        }

        if !tool_deltas.is_empty() {
            delta["tool_calls"] = json!(tool_deltas);
        }

        // A non-zero candidates token count marks stream completion.
        let finished = usage_metadata(unwrap_response(upstream))
            .is_some_and(|(_, candidates, _)| candidates > 0);

        if finished {
            self.complete = true;
            let (prompt, candidates, total) =
                usage_metadata(unwrap_response(upstream)).unwrap_or((0, 0, 0));
            return Some(self.chunk(
                json!({}),
                Some(self.final_finish_reason()),
                Some(json!({
                    "prompt_tokens": prompt,
                    "completion_tokens": candidates,
                    "total_tokens": total,
                })),
            ));
        }

        if delta.as_object().is_some_and(|m| m.is_empty()) {
            return None;
        }

        if !self.role_sent {
            delta["role"] = json!("assistant");
            self.role_sent = true;
        }
        Some(self.chunk(delta, None, None))
    }

    /// Synthesize the trailing finish chunk when the upstream ended
    /// without a usage-bearing chunk.
    pub fn finalize(&mut self) -> Option<Value> {
        if self.complete {
            return None;
        }
        self.complete = true;
        Some(self.chunk(json!({}), Some(self.final_finish_reason()), None))
    }

    fn process_function_call(&mut self, call: &Value) -> Value {
        self.saw_tool_call = true;

        let upstream_id = call.get("id").and_then(|v| v.as_str());
        let name = call.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        let args_fragment = match call.get("args") {
            Some(Value::String(s)) => s.clone(),
            Some(args) => args.to_string(),
            None => String::new(),
        };

        let known_index = upstream_id.and_then(|id| self.index_by_id.get(id).copied());
        match known_index {
            Some(index) => {
                // Continuation of an already-announced call: arguments
                // concatenate in receipt order.
                if let Some(acc) = self.tool_calls.get_mut(&index) {
                    acc.arguments.push_str(&args_fragment);
                }
                json!({
                    "index": index,
                    "function": { "arguments": args_fragment }
                })
            },
            None => {
                let index = self.tool_calls.len();
                let id = upstream_id.map(str::to_string).unwrap_or_else(new_call_id);
                if let Some(upstream_id) = upstream_id {
                    self.index_by_id.insert(upstream_id.to_string(), index);
                }
                self.tool_calls.insert(
                    index,
                    ToolCallAcc {
                        id: id.clone(),
                        name: name.to_string(),
                        arguments: args_fragment.clone(),
                    },
                );
                json!({
                    "index": index,
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": args_fragment }
                })
            },
        }
    }

    fn final_finish_reason(&self) -> &'static str {
        if self.saw_tool_call {
            "tool_calls"
        } else {
            map_finish_reason(self.finish_reason_seen.as_deref().unwrap_or("STOP"))
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>, usage: Option<Value>) -> Value {
        let mut chunk = json!({
            "id": self.stream_id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        });
        if let Some(usage) = usage {
            chunk["usage"] = usage;
        }
        chunk
    }
}

fn append_str(delta: &mut Value, key: &str, text: &str) {
    match delta.get_mut(key) {
        Some(Value::String(existing)) => existing.push_str(text),
        _ => delta[key] = json!(text),
    }
}

/// Drive an upstream byte stream through the accumulator, yielding
/// client-ready SSE frames terminated by `data: [DONE]`.
pub fn openai_sse_stream(
    upstream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    model: String,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>> {
    let mut upstream = upstream;
    let stream = async_stream::stream! {
        let mut framer = SseFramer::new();
        let mut state = OpenAiStreamState::new(model);

        while let Some(item) = upstream.next().await {
            match item {
                Ok(bytes) => {
                    for payload in framer.feed(&bytes) {
                        let value: Value = match serde_json::from_str(&payload) {
                            Ok(v) => v,
                            Err(e) => {
                                // Malformed chunk: log, skip, keep the stream alive.
                                tracing::warn!(error = %e, "Skipping malformed upstream chunk");
                                continue;
                            },
                        };
                        if let Some(chunk) = state.process_chunk(&value) {
                            yield Ok(sse_frame(&chunk));
                        }
                        if state.is_complete() {
                            yield Ok(Bytes::from("data: [DONE]\n\n"));
                            return;
                        }
                    }
                },
                Err(e) => {
                    tracing::error!(error = %e, "Upstream stream failed mid-flight");
                    let (error_type, code) = openai_error_kind(502);
                    let error_chunk = json!({
                        "error": {
                            "message": format!("upstream stream error: {e}"),
                            "type": error_type,
                            "param": null,
                            "code": code,
                        }
                    });
                    yield Ok(sse_frame(&error_chunk));
                    yield Ok(Bytes::from("data: [DONE]\n\n"));
                    return;
                },
            }
        }

        if let Some(chunk) = state.finalize() {
            yield Ok(sse_frame(&chunk));
        }
        yield Ok(Bytes::from("data: [DONE]\n\n"));
    };

    Box::pin(stream)
}

fn sse_frame(value: &Value) -> Bytes {
    Bytes::from(format!("data: {value}\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappers::openai::build_chat_completion;

    fn text_chunk(text: &str, thought: bool) -> Value {
        let mut part = json!({ "text": text });
        if thought {
            part["thought"] = json!(true);
        }
        json!({ "response": { "candidates": [{ "content": { "parts": [part] } }] } })
    }

    fn usage_chunk(finish: &str, completion_tokens: u64) -> Value {
        json!({
            "response": {
                "candidates": [{ "content": { "parts": [] }, "finishReason": finish }],
                "usageMetadata": {
                    "promptTokenCount": 3,
                    "candidatesTokenCount": completion_tokens,
                    "totalTokenCount": 3 + completion_tokens
                }
            }
        })
    }

    #[test]
    fn tool_call_assembly_scenario() {
        let mut state = OpenAiStreamState::new("gemini-3-flash".into());

        let first = state.process_chunk(&text_chunk("Hi", false)).unwrap();
        assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(first["choices"][0]["delta"]["content"], "Hi");
        assert!(first["choices"][0]["finish_reason"].is_null());

        let call = json!({
            "response": { "candidates": [{ "content": { "parts": [
                { "functionCall": { "name": "lookup", "args": { "q": "x" } } }
            ] } }] }
        });
        let second = state.process_chunk(&call).unwrap();
        let tool_delta = &second["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(tool_delta["index"], 0);
        assert_eq!(tool_delta["type"], "function");
        assert_eq!(tool_delta["function"]["name"], "lookup");
        assert_eq!(tool_delta["function"]["arguments"], "{\"q\":\"x\"}");
        assert!(tool_delta["id"].as_str().unwrap().starts_with("call_"));

        let last = state.process_chunk(&usage_chunk("STOP", 7)).unwrap();
        assert!(last["choices"][0]["delta"].as_object().unwrap().is_empty());
        assert_eq!(last["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(last["usage"]["completion_tokens"], 7);
        assert!(state.is_complete());
        assert!(state.finalize().is_none());
    }

    #[test]
    fn arguments_accumulate_by_upstream_id() {
        let mut state = OpenAiStreamState::new("m".into());

        let opening = json!({
            "candidates": [{ "content": { "parts": [
                { "functionCall": { "id": "fc-1", "name": "lookup", "args": "{\"q\":" } }
            ] } }]
        });
        let continuation = json!({
            "candidates": [{ "content": { "parts": [
                { "functionCall": { "id": "fc-1", "args": "\"x\"}" } }
            ] } }]
        });

        let first = state.process_chunk(&opening).unwrap();
        assert_eq!(first["choices"][0]["delta"]["tool_calls"][0]["index"], 0);

        let second = state.process_chunk(&continuation).unwrap();
        let delta = &second["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(delta["index"], 0);
        assert!(delta.get("id").is_none());
        assert_eq!(delta["function"]["arguments"], "\"x\"}");

        assert_eq!(state.tool_arguments(0), Some("{\"q\":\"x\"}"));
        assert_eq!(state.tool_call_views(), vec![("fc-1", "lookup", "{\"q\":\"x\"}")]);
    }

    #[test]
    fn two_calls_in_one_chunk_get_distinct_indices() {
        let mut state = OpenAiStreamState::new("m".into());
        let chunk = json!({
            "candidates": [{ "content": { "parts": [
                { "functionCall": { "name": "a", "args": {} } },
                { "functionCall": { "name": "b", "args": {} } }
            ] } }]
        });
        let out = state.process_chunk(&chunk).unwrap();
        let calls = out["choices"][0]["delta"]["tool_calls"].as_array().unwrap();
        assert_eq!(calls[0]["index"], 0);
        assert_eq!(calls[1]["index"], 1);
    }

    #[test]
    fn stream_end_without_usage_synthesizes_finish() {
        let mut state = OpenAiStreamState::new("m".into());
        state.process_chunk(&text_chunk("partial", false));

        let trailing = state.finalize().unwrap();
        assert!(trailing["choices"][0]["delta"].as_object().unwrap().is_empty());
        assert_eq!(trailing["choices"][0]["finish_reason"], "stop");
        assert!(trailing.get("usage").is_none());
        assert!(state.is_complete());
    }

    #[test]
    fn max_tokens_maps_to_length_at_finalize() {
        let mut state = OpenAiStreamState::new("m".into());
        let chunk = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "truncat" }] },
                "finishReason": "MAX_TOKENS"
            }]
        });
        state.process_chunk(&chunk);
        let trailing = state.finalize().unwrap();
        assert_eq!(trailing["choices"][0]["finish_reason"], "length");
    }

    #[test]
    fn streamed_content_matches_unary_transform() {
        let events = [
            text_chunk("thinking hard", true),
            text_chunk("Hel", false),
            text_chunk("lo", false),
        ];

        // Stream side.
        let mut state = OpenAiStreamState::new("m".into());
        for event in &events {
            state.process_chunk(event);
        }

        // Unary side: same parts in one response.
        let unary = json!({
            "response": {
                "candidates": [{
                    "content": { "parts": [
                        { "text": "thinking hard", "thought": true },
                        { "text": "Hel" },
                        { "text": "lo" }
                    ]},
                    "finishReason": "STOP"
                }]
            }
        });
        let completion = build_chat_completion(&unary, "m");

        assert_eq!(state.text(), completion["choices"][0]["message"]["content"]);
        assert_eq!(
            state.reasoning(),
            completion["choices"][0]["message"]["reasoning_content"]
        );
    }

    #[test]
    fn thought_text_streams_as_reasoning_content() {
        let mut state = OpenAiStreamState::new("m".into());
        let chunk = state.process_chunk(&text_chunk("pondering", true)).unwrap();
        let delta = &chunk["choices"][0]["delta"];
        assert_eq!(delta["reasoning_content"], "pondering");
        assert!(delta.get("content").is_none());
    }
}
