//! Line-oriented SSE framer for upstream `data:` records.
//!
//! The upstream chunks its event stream at arbitrary byte boundaries, so
//! the framer buffers the trailing partial line between `feed` calls.
//! Buffering happens at the byte level: a UTF-8 code point split across
//! two chunks must reassemble identically however the stream is cut.

use bytes::BytesMut;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Stateful byte-stream → `data:` payload framer. One instance per stream.
#[derive(Debug, Default)]
pub struct SseFramer {
    buf: BytesMut,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk, returning every completed `data:` payload.
    /// Empty payloads and the `[DONE]` sentinel are filtered out.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line_raw = self.buf.split_to(pos + 1);
            let Ok(line) = std::str::from_utf8(&line_raw) else {
                continue;
            };
            let line = line.trim();
            if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
                let payload = payload.trim();
                if payload.is_empty() || payload == DONE_SENTINEL {
                    continue;
                }
                payloads.push(payload.to_string());
            }
        }
        payloads
    }

    /// Whether a chunk's textual form contains the stream-end sentinel.
    pub fn saw_done(chunk: &[u8]) -> bool {
        String::from_utf8_lossy(chunk).contains("data: [DONE]")
    }

    /// Drop any buffered partial line.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}
