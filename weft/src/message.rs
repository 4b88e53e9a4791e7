//! Chat message model shared by every dialect and wire format.
//!
//! Messages are discriminated by `role`; content is either a plain string or
//! an array of typed parts (text with optional `cache_control`, image URLs).
//! Clients can send either format without hitting
//! "invalid type: sequence, expected a string".

use serde::{Deserialize, Serialize};

use crate::tools::ToolCall;

/// Cache control marker on a text content part. Only `ephemeral` exists.
///
/// Its presence flags the request as cache-write; the flag propagates into
/// the final usage record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub kind: CacheControlKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheControlKind {
    Ephemeral,
}

/// Image detail level (OpenAI `image_url.detail`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Auto,
    Low,
    High,
}

/// Image reference: URL or base64 data URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<ImageDetail>,
}

/// One part of a multipart message content array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    ImageUrl {
        image_url: ImageUrl,
    },
}

/// Message content: plain string or array of parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Flatten to a single string: the string variant as-is, or text parts
    /// joined with newlines. Image parts are skipped.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text, .. } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// True when any part carries a `cache_control` marker.
    pub fn has_cache_control(&self) -> bool {
        match self {
            MessageContent::Text(_) => false,
            MessageContent::Parts(parts) => parts.iter().any(|p| {
                matches!(
                    p,
                    ContentPart::Text {
                        cache_control: Some(_),
                        ..
                    }
                )
            }),
        }
    }

    /// True when there is no usable content (empty string, or no part with
    /// text or an image URL).
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(s) => s.is_empty(),
            MessageContent::Parts(parts) => !parts.iter().any(|p| match p {
                ContentPart::Text { text, .. } => !text.is_empty(),
                ContentPart::ImageUrl { image_url } => !image_url.url.is_empty(),
            }),
        }
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

/// A conversation message, discriminated by `role`.
///
/// System and user messages require content; assistant messages may instead
/// carry `tool_calls`; tool messages answer a prior tool call by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System {
        content: MessageContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    User {
        content: MessageContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        refusal: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Tool {
        content: String,
        tool_call_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl ChatMessage {
    pub fn user(content: impl Into<MessageContent>) -> Self {
        ChatMessage::User {
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        ChatMessage::System {
            content: content.into(),
            name: None,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            ChatMessage::System { .. } => "system",
            ChatMessage::User { .. } => "user",
            ChatMessage::Assistant { .. } => "assistant",
            ChatMessage::Tool { .. } => "tool",
        }
    }

    /// Content flattened to text, if the message has any.
    pub fn content_text(&self) -> Option<String> {
        match self {
            ChatMessage::System { content, .. } | ChatMessage::User { content, .. } => {
                Some(content.as_text())
            }
            ChatMessage::Assistant { content, .. } => content.clone(),
            ChatMessage::Tool { content, .. } => Some(content.clone()),
        }
    }

    pub fn tool_calls(&self) -> Option<&[ToolCall]> {
        match self {
            ChatMessage::Assistant { tool_calls, .. } => tool_calls.as_deref(),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ChatMessage::System { name, .. }
            | ChatMessage::User { name, .. }
            | ChatMessage::Assistant { name, .. }
            | ChatMessage::Tool { name, .. } => name.as_deref(),
        }
    }

    /// True for user/system messages with a `cache_control` content part.
    pub fn has_cache_control(&self) -> bool {
        match self {
            ChatMessage::System { content, .. } | ChatMessage::User { content, .. } => {
                content.has_cache_control()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_deserializes_from_string_or_parts() {
        let text: MessageContent = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(text.as_text(), "hello");

        let parts: MessageContent = serde_json::from_str(
            r#"[{"type":"text","text":"a"},{"type":"image_url","image_url":{"url":"http://x"}},{"type":"text","text":"b"}]"#,
        )
        .unwrap();
        assert_eq!(parts.as_text(), "a\nb");
    }

    #[test]
    fn cache_control_detected_only_on_parts() {
        let content: MessageContent = serde_json::from_str(
            r#"[{"type":"text","text":"ctx","cache_control":{"type":"ephemeral"}}]"#,
        )
        .unwrap();
        assert!(content.has_cache_control());
        assert!(!MessageContent::from("plain").has_cache_control());
    }

    #[test]
    fn message_roundtrips_by_role() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(msg.role(), "user");

        let msg: ChatMessage = serde_json::from_str(
            r#"{"role":"tool","content":"42","tool_call_id":"call_1","name":"calc"}"#,
        )
        .unwrap();
        assert_eq!(msg.role(), "tool");
        assert_eq!(msg.content_text().as_deref(), Some("42"));
    }

    #[test]
    fn unknown_role_is_rejected() {
        let err = serde_json::from_str::<ChatMessage>(r#"{"role":"oracle","content":"x"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn assistant_message_allows_tool_calls_without_content() {
        let msg: ChatMessage = serde_json::from_str(
            r#"{"role":"assistant","tool_calls":[{"id":"call_1","type":"function","function":{"name":"f","arguments":"{}"}}]}"#,
        )
        .unwrap();
        assert_eq!(msg.tool_calls().unwrap().len(), 1);
        assert!(msg.content_text().is_none());
    }

    #[test]
    fn empty_content_detection() {
        assert!(MessageContent::from("").is_empty());
        let parts: MessageContent =
            serde_json::from_str(r#"[{"type":"text","text":""}]"#).unwrap();
        assert!(parts.is_empty());
        let parts: MessageContent =
            serde_json::from_str(r#"[{"type":"image_url","image_url":{"url":"http://x"}}]"#)
                .unwrap();
        assert!(!parts.is_empty());
    }
}
