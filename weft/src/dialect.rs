//! Inbound chat dialects and the caller-facing response shapes.
//!
//! The gateway accepts two chat-completion dialects on the same internal
//! pipeline: plain OpenAI and the richer LLM-Gateway shape (adds `prompt`,
//! `repetition_penalty`, `transforms`, an OpenRouter-style `reasoning`
//! object, and `provider`/`native_finish_reason` on responses). The dialect
//! pair is fixed when the request is accepted and never changes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;
use crate::message::ChatMessage;
use crate::reasoning::{ReasoningConfig, ReasoningEffort};
use crate::request::{StopSequences, UsageOptions};
use crate::response::{Delta, ResponseMessage, Usage};
use crate::tools::{Tool, ToolChoice};

/// Which shape the caller speaks. Fixed per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Gateway,
}

/// Inbound chat-completion request covering both dialects.
///
/// Dialect-specific fields are optional; the transform stage validates that
/// only the active dialect's fields are used.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChatCompletionRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    /// Gateway dialect: plain prompt as an alternative to `messages`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// OpenAI dialect spelling of the completion-token cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// Gateway dialect only, range (0, 2].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Gateway dialect: OpenRouter-style reasoning object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
    /// OpenAI dialect: bare effort level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageOptions>,
    /// Gateway dialect: prompt transforms; only `middle-out` exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transforms: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    /// Accepted for OpenAI compatibility, not forwarded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

impl ChatCompletionRequest {
    /// The effective completion-token cap for either dialect spelling.
    pub fn effective_max_tokens(&self) -> Option<u32> {
        self.max_completion_tokens.or(self.max_tokens)
    }

    /// Gateway `transforms` validation: known values, no duplicates.
    pub fn validate_transforms(&self) -> Result<(), GatewayError> {
        let transforms = match &self.transforms {
            Some(t) => t,
            None => return Ok(()),
        };
        for transform in transforms {
            if transform != "middle-out" {
                return Err(GatewayError::bad_request(
                    format!("Invalid transforms: [{transform:?}]"),
                    "Valid options are: [\"middle-out\"]",
                ));
            }
        }
        let mut seen = std::collections::HashSet::new();
        if !transforms.iter().all(|t| seen.insert(t)) {
            return Err(GatewayError::bad_request(
                "Duplicate transforms are not allowed",
                "Invalid transforms",
            ));
        }
        Ok(())
    }
}

/// One streamed choice in the caller dialect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterStreamChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<String>,
    /// Gateway dialect extras.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Stream chunk in the caller dialect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterStreamChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub system_fingerprint: Option<String>,
    pub choices: Vec<RouterStreamChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Gateway dialect only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// One choice of a non-streaming response in the caller dialect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterChoice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Non-streaming response in the caller dialect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub system_fingerprint: Option<String>,
    pub choices: Vec<RouterChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// What the pipeline yields to the HTTP surface.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterArtifact {
    Chunk(RouterStreamChunk),
    Response(RouterResponse),
}

impl RouterArtifact {
    pub fn usage(&self) -> Option<&Usage> {
        match self {
            RouterArtifact::Chunk(chunk) => chunk.usage.as_ref(),
            RouterArtifact::Response(response) => response.usage.as_ref(),
        }
    }

    pub fn finish_reason(&self) -> Option<&str> {
        match self {
            RouterArtifact::Chunk(chunk) => chunk
                .choices
                .iter()
                .find_map(|c| c.finish_reason.as_deref()),
            RouterArtifact::Response(response) => response
                .choices
                .iter()
                .find_map(|c| c.finish_reason.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_max_tokens_prefers_openai_spelling() {
        let request: ChatCompletionRequest = serde_json::from_str(
            r#"{"model":"m","messages":[],"max_tokens":10,"max_completion_tokens":20}"#,
        )
        .unwrap();
        assert_eq!(request.effective_max_tokens(), Some(20));
    }

    #[test]
    fn transforms_validation() {
        let mut request: ChatCompletionRequest =
            serde_json::from_str(r#"{"model":"m","messages":[]}"#).unwrap();
        assert!(request.validate_transforms().is_ok());

        request.transforms = Some(vec!["middle-out".to_string()]);
        assert!(request.validate_transforms().is_ok());

        request.transforms = Some(vec!["inside-out".to_string()]);
        assert_eq!(request.validate_transforms().unwrap_err().code, 400);

        request.transforms = Some(vec!["middle-out".to_string(), "middle-out".to_string()]);
        assert_eq!(request.validate_transforms().unwrap_err().code, 400);
    }

    #[test]
    fn gateway_chunk_serializes_provider_and_null_fingerprint() {
        let chunk = RouterStreamChunk {
            id: "gen_1".to_string(),
            object: crate::response::OBJECT_CHAT_COMPLETION_CHUNK.to_string(),
            created: 1,
            model: "deepseek/deepseek-chat".to_string(),
            system_fingerprint: None,
            choices: vec![],
            usage: None,
            provider: Some("deepseek".to_string()),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert!(json["system_fingerprint"].is_null());
        assert_eq!(json["provider"], "deepseek");

        let openai_chunk = RouterStreamChunk {
            provider: None,
            ..chunk
        };
        let json = serde_json::to_value(&openai_chunk).unwrap();
        assert!(json.get("provider").is_none());
    }
}
