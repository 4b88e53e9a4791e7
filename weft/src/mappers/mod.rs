//! Wire mappers: translate the internal request into each upstream's request
//! shape and normalize upstream SSE chunks back into internal chunks.

mod gigachat;
mod openai;
mod yandex;

pub use gigachat::GigaChatMapper;
pub use openai::OpenAiMapper;
pub use yandex::YandexMapper;

use serde_json::Value;

use crate::error::GatewayError;
use crate::message::ChatMessage;
use crate::request::ProviderRequest;
use crate::response::ProviderStreamChunk;

/// Request/chunk translation for one upstream wire format.
///
/// SSE line parsing itself is shared ([`crate::sse::parse_sse_line`]); the
/// mapper owns everything after a frame has been decoded.
pub trait WireMapper: Send + Sync {
    /// Serialize the internal request into the upstream JSON body.
    fn map_request(&self, request: &ProviderRequest) -> Result<Value, GatewayError>;

    /// Normalize one decoded upstream frame into an internal chunk.
    fn map_stream_chunk(
        &self,
        chunk: Value,
        model: &str,
        provider_id: &str,
        request_id: &str,
    ) -> Result<ProviderStreamChunk, GatewayError>;
}

/// Drop assistant "preamble" messages that sit between a tool call and its
/// matching tool result.
///
/// Some clients insert a plain assistant message ("let me check that...")
/// after an assistant tool_call turn and before the tool result; several
/// upstreams reject such sequences. A message is a preamble when it is an
/// assistant message without tool_calls, a tool call is pending, and the
/// matching `tool` result appears before any further assistant or user turn.
pub fn collapse_preamble_messages(messages: &[ChatMessage]) -> Vec<&ChatMessage> {
    let mut kept = Vec::with_capacity(messages.len());
    let mut pending_tool_call_id: Option<String> = None;

    for (idx, msg) in messages.iter().enumerate() {
        if is_preamble(messages, idx, pending_tool_call_id.as_deref()) {
            continue;
        }
        match msg {
            ChatMessage::Assistant {
                tool_calls: Some(calls),
                ..
            } if !calls.is_empty() => {
                pending_tool_call_id = calls[0].id.clone();
            }
            ChatMessage::Tool { tool_call_id, .. } => {
                if pending_tool_call_id.as_deref() == Some(tool_call_id.as_str()) {
                    pending_tool_call_id = None;
                }
            }
            _ => {}
        }
        kept.push(msg);
    }
    kept
}

fn is_preamble(messages: &[ChatMessage], idx: usize, pending_tool_call_id: Option<&str>) -> bool {
    let pending = match pending_tool_call_id {
        Some(id) => id,
        None => return false,
    };
    let msg = &messages[idx];
    let is_plain_assistant = matches!(
        msg,
        ChatMessage::Assistant { tool_calls, .. } if tool_calls.as_ref().map_or(true, |c| c.is_empty())
    );
    if !is_plain_assistant {
        return false;
    }

    for future in &messages[idx + 1..] {
        match future {
            ChatMessage::Tool { tool_call_id, .. } if tool_call_id == pending => return true,
            ChatMessage::Assistant { .. } | ChatMessage::User { .. } => return false,
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolCall;

    fn assistant_call(id: &str) -> ChatMessage {
        ChatMessage::Assistant {
            content: None,
            reasoning: None,
            refusal: None,
            tool_calls: Some(vec![ToolCall::function(id, "f", "{}".to_string())]),
            name: None,
        }
    }

    fn assistant_text(text: &str) -> ChatMessage {
        ChatMessage::Assistant {
            content: Some(text.to_string()),
            reasoning: None,
            refusal: None,
            tool_calls: None,
            name: None,
        }
    }

    fn tool_result(id: &str) -> ChatMessage {
        ChatMessage::Tool {
            content: "ok".to_string(),
            tool_call_id: id.to_string(),
            name: Some("f".to_string()),
        }
    }

    #[test]
    fn preamble_between_call_and_result_is_dropped() {
        let messages = vec![
            ChatMessage::user("hi"),
            assistant_call("call_1"),
            assistant_text("let me check"),
            tool_result("call_1"),
        ];
        let kept = collapse_preamble_messages(&messages);
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|m| m.content_text().as_deref() != Some("let me check")));
    }

    #[test]
    fn assistant_after_resolved_call_is_kept() {
        let messages = vec![
            ChatMessage::user("hi"),
            assistant_call("call_1"),
            tool_result("call_1"),
            assistant_text("the answer is 4"),
        ];
        let kept = collapse_preamble_messages(&messages);
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn user_turn_breaks_the_preamble_window() {
        let messages = vec![
            assistant_call("call_1"),
            assistant_text("working on it"),
            ChatMessage::user("never mind"),
            tool_result("call_1"),
        ];
        let kept = collapse_preamble_messages(&messages);
        // The user turn intervenes, so the assistant text is not a preamble.
        assert_eq!(kept.len(), 4);
    }
}
