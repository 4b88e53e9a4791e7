//! SSE frame formatting for outbound streams.

use bytes::Bytes;
use serde_json::Value;

/// Terminates every streamed response.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// `data: <json>\n\n`
pub fn data_frame(value: &Value) -> Bytes {
    Bytes::from(format!("data: {value}\n\n"))
}

/// `event: <name>\ndata: <json>\n\n` (Responses dialect framing).
pub fn event_frame(event: &str, value: &Value) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {value}\n\n"))
}

pub fn done_frame() -> Bytes {
    Bytes::from_static(DONE_FRAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_are_double_newline_terminated() {
        assert_eq!(data_frame(&json!({"a":1})), "data: {\"a\":1}\n\n");
        assert_eq!(
            event_frame("response.created", &json!({})),
            "event: response.created\ndata: {}\n\n"
        );
        assert_eq!(done_frame(), Bytes::from_static(b"data: [DONE]\n\n"));
    }
}
