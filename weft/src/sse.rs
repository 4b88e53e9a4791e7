//! SSE line parsing shared by the upstream drivers.
//!
//! Each upstream frame is `data: <JSON>\n\n`; `data: [DONE]` marks the end of
//! stream for providers that send it. Blank lines, comments, and frames with
//! invalid JSON are skipped silently.

use serde_json::Value;

/// Result of parsing one SSE line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// `data: [DONE]`.
    Done,
    /// A decoded `data:` payload.
    Data(Value),
    /// Blank line, non-data field, or undecodable payload.
    Skip,
}

/// Accumulates body bytes and yields complete lines.
///
/// Upstream chunks arrive at arbitrary byte boundaries; a line is complete
/// only once its `\n` has been read.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes and return the lines it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }
}

/// Parse one line of an SSE body.
pub fn parse_sse_line(line: &str) -> SseFrame {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return SseFrame::Skip;
    }
    if trimmed == "data: [DONE]" {
        return SseFrame::Done;
    }
    let payload = trimmed.strip_prefix("data: ").unwrap_or(trimmed);
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => SseFrame::Data(value),
        Err(_) => SseFrame::Skip,
    }
}
