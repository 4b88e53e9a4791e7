//! Reasoning-token configuration (OpenRouter-style `reasoning` object).

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

/// Reasoning configuration: either an effort level or a token budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReasoningConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Use reasoning internally but drop it from the response.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exclude: bool,
}

impl ReasoningConfig {
    pub fn with_effort(effort: ReasoningEffort) -> Self {
        ReasoningConfig {
            effort: Some(effort),
            ..Default::default()
        }
    }

    /// Reject effort+max_tokens together; default to medium effort when
    /// neither is given.
    pub fn normalized(mut self) -> Result<Self, GatewayError> {
        if self.effort.is_some() && self.max_tokens.is_some() {
            return Err(GatewayError::bad_request(
                "Cannot specify both 'effort' and 'max_tokens' in reasoning config",
                "Invalid reasoning config",
            ));
        }
        if self.effort.is_none() && self.max_tokens.is_none() {
            self.effort = Some(ReasoningEffort::Medium);
        }
        Ok(self)
    }
}
