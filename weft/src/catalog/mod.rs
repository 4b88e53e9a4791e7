//! Model catalog: the provider-model shape, per-provider model mappers, and
//! the aggregating catalog service.

mod mappers;
mod service;

pub use mappers::{
    model_mapper_for, AgentsModelMapper, GigaChatModelMapper, ModelMapper, OllamaModelMapper,
    OpenAiListModelMapper, OpenRouterModelMapper, YandexModelMapper, ZaiModelMapper,
};
pub use service::ModelCatalog;

use serde::{Deserialize, Serialize};

/// Architecture descriptor for a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelArchitecture {
    pub modality: String,
    pub tokenizer: String,
    pub instruct_type: String,
}

impl ModelArchitecture {
    pub fn text(tokenizer: impl Into<String>) -> Self {
        ModelArchitecture {
            modality: "text->text".to_string(),
            tokenizer: tokenizer.into(),
            instruct_type: "none".to_string(),
        }
    }

    /// Vision support is inferred from the modality string.
    pub fn is_vision(&self) -> bool {
        self.modality.contains("image")
    }
}

/// Capability limits and feature flags for a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ModelCapabilities {
    pub context_length: u32,
    pub max_completion_tokens: u32,
    pub is_moderated: bool,
    pub is_tool_calls: bool,
    pub is_vision: bool,
}

/// One model as seen by the gateway.
///
/// `model_id` is what the upstream provider understands;
/// `external_model_id` is the caller-visible id (filled by the catalog after
/// normalization, e.g. `deepseek/deepseek-chat`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderModel {
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_model_id: Option<String>,
    pub provider_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub context_length: u32,
    pub architecture: ModelArchitecture,
    pub capabilities: ModelCapabilities,
}

impl ProviderModel {
    /// Caller-visible id, falling back to the raw model id before the catalog
    /// rewrite has happened.
    pub fn external_id(&self) -> &str {
        self.external_model_id.as_deref().unwrap_or(&self.model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_inferred_from_modality() {
        let mut arch = ModelArchitecture::text("unknown");
        assert!(!arch.is_vision());
        arch.modality = "text+image->text".to_string();
        assert!(arch.is_vision());
    }
}
