//! Internal response model: stream chunks, assembled responses, usage.
//!
//! Wire mappers produce [`ProviderStreamChunk`]s; the completion stage turns
//! them into dialect-facing chunks or a single assembled response.

use serde::{Deserialize, Serialize};

use crate::tools::ToolCall;

/// Object type for assembled responses.
pub const OBJECT_CHAT_COMPLETION: &str = "chat.completion";
/// Object type for stream chunks.
pub const OBJECT_CHAT_COMPLETION_CHUNK: &str = "chat.completion.chunk";

/// Cached-token breakdown of the prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PromptTokensDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u32>,
}

/// Reasoning-token breakdown of the completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CompletionTokensDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

/// Token usage for one completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens_details: Option<CompletionTokensDetails>,
    /// Upstream-reported cost (OpenRouter usage accounting).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Usage {
    /// Copy with detail breakdowns and cost stripped; returned to callers
    /// that did not ask for full usage accounting.
    pub fn basic(&self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
            ..Default::default()
        }
    }

    pub fn cached_tokens(&self) -> u32 {
        self.prompt_tokens_details
            .as_ref()
            .and_then(|d| d.cached_tokens)
            .unwrap_or(0)
    }

    pub fn reasoning_tokens(&self) -> Option<u32> {
        self.completion_tokens_details
            .as_ref()
            .and_then(|d| d.reasoning_tokens)
    }
}

/// Assistant delta inside a stream choice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// One streamed choice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StreamChoice {
    pub index: u32,
    pub delta: Delta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Provider-agnostic stream chunk produced by a wire mapper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderStreamChunk {
    pub id: String,
    pub created: i64,
    pub model: String,
    pub provider_id: String,
    pub request_id: String,
    pub object: String,
    pub choices: Vec<StreamChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ProviderStreamChunk {
    pub fn new(
        request_id: impl Into<String>,
        created: i64,
        model: impl Into<String>,
        provider_id: impl Into<String>,
        choices: Vec<StreamChoice>,
        usage: Option<Usage>,
    ) -> Self {
        let request_id = request_id.into();
        ProviderStreamChunk {
            id: request_id.clone(),
            created,
            model: model.into(),
            provider_id: provider_id.into(),
            request_id,
            object: OBJECT_CHAT_COMPLETION_CHUNK.to_string(),
            choices,
            usage,
        }
    }

    pub fn has_finish_reason(&self) -> bool {
        self.choices.iter().any(|c| c.finish_reason.is_some())
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .iter()
            .find_map(|c| c.finish_reason.as_deref())
    }
}

/// Complete assistant message of an assembled response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Default for ResponseMessage {
    fn default() -> Self {
        ResponseMessage {
            role: "assistant".to_string(),
            content: None,
            reasoning: None,
            refusal: None,
            tool_calls: None,
        }
    }
}

/// One choice of an assembled (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseChoice {
    pub index: u32,
    pub message: ResponseMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Provider-agnostic non-streaming response assembled from chunks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderResponse {
    pub id: String,
    pub created: i64,
    pub model: String,
    pub provider_id: String,
    pub request_id: String,
    pub object: String,
    pub choices: Vec<ResponseChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Unix timestamp in seconds for chunk/response stamping.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_usage_strips_details() {
        let usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            prompt_tokens_details: Some(PromptTokensDetails {
                cached_tokens: Some(4),
            }),
            completion_tokens_details: Some(CompletionTokensDetails {
                reasoning_tokens: Some(2),
            }),
            cost: Some(0.01),
        };
        let basic = usage.basic();
        assert_eq!(basic.total_tokens, 15);
        assert!(basic.prompt_tokens_details.is_none());
        assert!(basic.cost.is_none());
        assert_eq!(usage.cached_tokens(), 4);
        assert_eq!(usage.reasoning_tokens(), Some(2));
    }

    #[test]
    fn finish_reason_scans_choices() {
        let chunk = ProviderStreamChunk::new(
            "req-1",
            0,
            "m",
            "deepseek",
            vec![
                StreamChoice::default(),
                StreamChoice {
                    index: 1,
                    finish_reason: Some("stop".to_string()),
                    ..Default::default()
                },
            ],
            None,
        );
        assert!(chunk.has_finish_reason());
        assert_eq!(chunk.finish_reason(), Some("stop"));
    }

    #[test]
    fn chunk_serializes_without_none_usage() {
        let chunk = ProviderStreamChunk::new("r", 1, "m", "p", vec![], None);
        let json = serde_json::to_value(&chunk).unwrap();
        assert!(json.get("usage").is_none());
        assert_eq!(json["object"], OBJECT_CHAT_COMPLETION_CHUNK);
    }
}
