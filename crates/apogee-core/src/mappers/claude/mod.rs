//! Anthropic messages dialect ↔ upstream translation.

mod request;
mod response;
mod streaming;

pub use request::{build_upstream_request, MessageParam, MessagesRequest, ThinkingParam};
pub use response::build_message_response;
pub use streaming::{claude_sse_stream, ClaudeStreamState, StreamEvent};

/// Map an upstream finish reason to the Anthropic stop-reason vocabulary.
pub(crate) fn map_stop_reason(upstream: &str) -> &'static str {
    match upstream {
        "MAX_TOKENS" => "max_tokens",
        _ => "end_turn",
    }
}
