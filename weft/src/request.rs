//! Provider-agnostic chat request built by the transform stage.

use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;
use crate::reasoning::ReasoningConfig;
use crate::tools::{Tool, ToolChoice};

/// `usage: {include}` accounting option (OpenRouter style).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UsageOptions {
    #[serde(default)]
    pub include: bool,
}

/// Stop sequences: a single string or a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

/// The internal request every provider driver consumes.
///
/// `model` is the clean upstream model id (after registry resolution);
/// `request_id` threads through SSE chunk mapping for tracing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderRequest {
    pub model: String,
    pub request_id: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageOptions>,
}

impl ProviderRequest {
    /// Minimal request for tests and internal callers.
    pub fn new(model: impl Into<String>, request_id: impl Into<String>) -> Self {
        ProviderRequest {
            model: model.into(),
            request_id: request_id.into(),
            messages: Vec::new(),
            temperature: None,
            top_p: None,
            max_tokens: None,
            stream: true,
            stop: None,
            frequency_penalty: None,
            presence_penalty: None,
            repetition_penalty: None,
            tools: None,
            tool_choice: None,
            reasoning: None,
            usage: None,
        }
    }
}
