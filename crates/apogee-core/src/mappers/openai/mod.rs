//! OpenAI chat-completions dialect ↔ upstream translation.

mod request;
mod response;
mod streaming;

pub use request::{build_upstream_request, ChatCompletionRequest, ChatMessage};
pub use response::build_chat_completion;
pub use streaming::{openai_sse_stream, OpenAiStreamState};

/// Map an upstream finish reason to the OpenAI vocabulary.
pub(crate) fn map_finish_reason(upstream: &str) -> &'static str {
    match upstream {
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" => "content_filter",
        _ => "stop",
    }
}
