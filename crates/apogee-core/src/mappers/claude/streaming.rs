//! Upstream SSE → Anthropic event-tagged stream synthesis.
//!
//! The Anthropic dialect frames a streaming response as a lifecycle of
//! named events: `message_start`, per-block `content_block_start` /
//! `content_block_delta` / `content_block_stop`, then `message_delta`
//! and `message_stop`. Text and thinking blocks stay open until the
//! terminal sequence (deltas for an already-open block keep its index);
//! tool-use blocks open, carry one `input_json_delta` and close
//! immediately.

use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use apogee_types::error::anthropic_error_type;

use crate::mappers::{
    candidate_finish_reason, candidate_parts, new_tool_use_id, unwrap_response, usage_metadata,
};
use crate::sse::SseFramer;

use super::map_stop_reason;

/// One named SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub name: String,
    pub data: Value,
}

impl StreamEvent {
    fn new(name: &str, data: Value) -> Self {
        Self { name: name.to_string(), data }
    }

    pub fn to_sse(&self) -> Bytes {
        Bytes::from(format!("event: {}\ndata: {}\n\n", self.name, self.data))
    }
}

/// Stream accumulator for the Anthropic dialect.
pub struct ClaudeStreamState {
    model: String,
    message_id: String,
    message_start_sent: bool,
    next_index: usize,
    open_text: Option<usize>,
    open_thinking: Option<usize>,
    saw_tool_use: bool,
    finish_reason_seen: Option<String>,
    complete: bool,
    input_tokens: u64,
    output_tokens: u64,
}

impl ClaudeStreamState {
    pub fn new(model: String) -> Self {
        Self {
            model,
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            message_start_sent: false,
            next_index: 0,
            open_text: None,
            open_thinking: None,
            saw_tool_use: false,
            finish_reason_seen: None,
            complete: false,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Process one upstream JSON chunk into zero or more client events.
    pub fn process_chunk(&mut self, upstream: &Value) -> Vec<StreamEvent> {
        if self.complete {
            return Vec::new();
        }

        let mut events = Vec::new();

        if !self.message_start_sent {
            events.push(self.message_start());
            self.message_start_sent = true;
        }

        if let Some(reason) = candidate_finish_reason(upstream) {
            self.finish_reason_seen = Some(reason.to_string());
        }

        if let Some((prompt, candidates, _)) = usage_metadata(unwrap_response(upstream)) {
            self.input_tokens = prompt;
            self.output_tokens = candidates;
        }

        if let Some(parts) = candidate_parts(upstream) {
            for part in parts {
                let is_thought =
                    part.get("thought").and_then(|v| v.as_bool()).unwrap_or(false);

                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    if is_thought {
                        events.extend(self.thinking_delta(text));
                    } else {
                        events.extend(self.text_delta(text));
                    }
                }

                if let Some(call) = part.get("functionCall") {
                    events.extend(self.tool_use_block(call));
                }
            }
        }

        let finished = usage_metadata(unwrap_response(upstream))
            .is_some_and(|(_, candidates, _)| candidates > 0);
        if finished {
            events.extend(self.terminal_sequence());
        }

        events
    }

    /// Close the stream when the upstream ended without a usage-bearing
    /// chunk.
    pub fn finalize(&mut self) -> Vec<StreamEvent> {
        if self.complete {
            return Vec::new();
        }
        let mut events = Vec::new();
        if !self.message_start_sent {
            events.push(self.message_start());
            self.message_start_sent = true;
        }
        events.extend(self.terminal_sequence());
        events
    }

    /// An `error` event in the Anthropic shape, for mid-stream failures.
    pub fn error_event(status: u16, message: &str) -> StreamEvent {
        StreamEvent::new(
            "error",
            json!({
                "type": "error",
                "error": { "type": anthropic_error_type(status), "message": message },
            }),
        )
    }

    fn message_start(&self) -> StreamEvent {
        StreamEvent::new(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": { "input_tokens": 0, "output_tokens": 0 },
                }
            }),
        )
    }

    fn text_delta(&mut self, text: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let index = match self.open_text {
            Some(index) => index,
            None => {
                let index = self.take_index();
                self.open_text = Some(index);
                events.push(block_start(index, json!({ "type": "text", "text": "" })));
                index
            },
        };
        events.push(block_delta(index, json!({ "type": "text_delta", "text": text })));
        events
    }

    fn thinking_delta(&mut self, text: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let index = match self.open_thinking {
            Some(index) => index,
            None => {
                let index = self.take_index();
                self.open_thinking = Some(index);
                events.push(block_start(index, json!({ "type": "thinking", "thinking": "" })));
                index
            },
        };
        events.push(block_delta(index, json!({ "type": "thinking_delta", "thinking": text })));
        events
    }

    fn tool_use_block(&mut self, call: &Value) -> Vec<StreamEvent> {
        self.saw_tool_use = true;
        let index = self.take_index();

        let id = call
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(new_tool_use_id);
        let name = call.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        let args = call.get("args").cloned().unwrap_or_else(|| json!({}));

        vec![
            block_start(
                index,
                json!({ "type": "tool_use", "id": id, "name": name, "input": {} }),
            ),
            block_delta(
                index,
                json!({ "type": "input_json_delta", "partial_json": args.to_string() }),
            ),
            block_stop(index),
        ]
    }

    /// Close open non-tool blocks in index order, then emit the final
    /// `message_delta` + `message_stop` pair.
    fn terminal_sequence(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        let mut open: Vec<usize> =
            self.open_thinking.take().into_iter().chain(self.open_text.take()).collect();
        open.sort_unstable();
        for index in open {
            events.push(block_stop(index));
        }

        let stop_reason = if self.saw_tool_use {
            "tool_use"
        } else {
            map_stop_reason(self.finish_reason_seen.as_deref().unwrap_or("STOP"))
        };

        events.push(StreamEvent::new(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": { "stop_reason": stop_reason, "stop_sequence": null },
                "usage": {
                    "input_tokens": self.input_tokens,
                    "output_tokens": self.output_tokens,
                },
            }),
        ));
        events.push(StreamEvent::new("message_stop", json!({ "type": "message_stop" })));

        self.complete = true;
        events
    }

    fn take_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }
}

fn block_start(index: usize, content_block: Value) -> StreamEvent {
    StreamEvent::new(
        "content_block_start",
        json!({ "type": "content_block_start", "index": index, "content_block": content_block }),
    )
}

fn block_delta(index: usize, delta: Value) -> StreamEvent {
    StreamEvent::new(
        "content_block_delta",
        json!({ "type": "content_block_delta", "index": index, "delta": delta }),
    )
}

fn block_stop(index: usize) -> StreamEvent {
    StreamEvent::new(
        "content_block_stop",
        json!({ "type": "content_block_stop", "index": index }),
    )
}

/// Drive an upstream byte stream through the accumulator, yielding
/// event-tagged SSE frames.
pub fn claude_sse_stream(
    upstream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    model: String,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>> {
    let mut upstream = upstream;
    let stream = async_stream::stream! {
        let mut framer = SseFramer::new();
        let mut state = ClaudeStreamState::new(model);

        while let Some(item) = upstream.next().await {
            match item {
                Ok(bytes) => {
                    for payload in framer.feed(&bytes) {
                        let value: Value = match serde_json::from_str(&payload) {
                            Ok(v) => v,
                            Err(e) => {
                                tracing::warn!(error = %e, "Skipping malformed upstream chunk");
                                continue;
                            },
                        };
                        for event in state.process_chunk(&value) {
                            yield Ok::<Bytes, String>(event.to_sse());
                        }
                        if state.is_complete() {
                            return;
                        }
                    }
                },
                Err(e) => {
                    tracing::error!(error = %e, "Upstream stream failed mid-flight");
                    let event = ClaudeStreamState::error_event(
                        502,
                        &format!("upstream stream error: {e}"),
                    );
                    yield Ok(event.to_sse());
                    return;
                },
            }
        }

        for event in state.finalize() {
            yield Ok(event.to_sse());
        }
    };

    Box::pin(stream)
}
