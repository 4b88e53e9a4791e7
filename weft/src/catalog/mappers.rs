//! Per-provider model mappers: convert an upstream model-list payload into
//! [`ProviderModel`]s, or hard-code the list for providers without a models
//! endpoint (Yandex, Z.AI, Agents).

use serde_json::Value;

use super::{ModelArchitecture, ModelCapabilities, ProviderModel};
use crate::providers::{self, ProviderConfig};
use crate::settings::Settings;

/// Catalog-shape mapper for one provider.
pub trait ModelMapper: Send + Sync {
    /// True when the provider has no models endpoint and [`Self::map_models`]
    /// ignores its input.
    fn is_static(&self) -> bool {
        false
    }

    /// Convert the upstream response (or nothing, for static mappers) into
    /// provider models.
    fn map_models(&self, data: &Value) -> Vec<ProviderModel>;
}

fn default_tokenizer(model_id: &str) -> &'static str {
    if model_id.contains("anthropic") {
        "anthropic"
    } else if model_id.contains("google") {
        "google"
    } else {
        "unknown"
    }
}

/// Maps an OpenAI-style `{"data": [{"id", "context_length", ...}]}` list.
///
/// Used for DeepSeek, GigaChat, Ollama, and the in-house gateway upstream;
/// fields the upstream omits get conservative defaults.
pub struct OpenAiListModelMapper {
    provider_id: String,
}

impl OpenAiListModelMapper {
    pub fn new(provider_id: impl Into<String>) -> Self {
        OpenAiListModelMapper {
            provider_id: provider_id.into(),
        }
    }

    fn map_entry(&self, entry: &Value) -> Option<ProviderModel> {
        let model_id = entry.get("id")?.as_str()?.to_string();
        if model_id.is_empty() {
            return None;
        }
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(&model_id)
            .to_string();
        let context_length = entry
            .get("context_length")
            .and_then(Value::as_u64)
            .unwrap_or(4096) as u32;
        let modality = entry
            .pointer("/architecture/modality")
            .and_then(Value::as_str)
            .unwrap_or("text->text")
            .to_string();
        let architecture = ModelArchitecture {
            modality: modality.clone(),
            tokenizer: entry
                .pointer("/architecture/tokenizer")
                .and_then(Value::as_str)
                .unwrap_or_else(|| default_tokenizer(&model_id))
                .to_string(),
            instruct_type: "none".to_string(),
        };
        Some(ProviderModel {
            capabilities: ModelCapabilities {
                context_length,
                max_completion_tokens: entry
                    .get("max_completion_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(4096) as u32,
                is_moderated: true,
                is_tool_calls: true,
                is_vision: architecture.is_vision(),
            },
            model_id,
            external_model_id: None,
            provider_id: self.provider_id.clone(),
            name,
            description: entry
                .get("description")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            context_length,
            architecture,
        })
    }
}

impl ModelMapper for OpenAiListModelMapper {
    fn map_models(&self, data: &Value) -> Vec<ProviderModel> {
        data.get("data")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(|e| self.map_entry(e)).collect())
            .unwrap_or_default()
    }
}

/// OpenRouter exposes everything; only the whitelisted subset is surfaced.
pub struct OpenRouterModelMapper {
    provider_id: String,
    supported_models: Vec<String>,
}

impl OpenRouterModelMapper {
    pub fn new(provider_id: impl Into<String>, supported_models: Vec<String>) -> Self {
        OpenRouterModelMapper {
            provider_id: provider_id.into(),
            supported_models,
        }
    }
}

impl ModelMapper for OpenRouterModelMapper {
    fn map_models(&self, data: &Value) -> Vec<ProviderModel> {
        let entries = match data.get("data").and_then(Value::as_array) {
            Some(entries) => entries,
            None => return Vec::new(),
        };
        let mut models = Vec::new();
        for entry in entries {
            let model_id = match entry.get("id").and_then(Value::as_str) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => continue,
            };
            if !self.supported_models.iter().any(|m| m == &model_id) {
                continue;
            }
            let context_length = entry
                .get("context_length")
                .and_then(Value::as_u64)
                .unwrap_or(4096) as u32;
            let modality = entry
                .pointer("/architecture/modality")
                .and_then(Value::as_str)
                .unwrap_or("text->text")
                .to_string();
            let tokenizer = entry
                .pointer("/architecture/tokenizer")
                .and_then(Value::as_str)
                .map(|s| s.to_string())
                .unwrap_or_else(|| default_tokenizer(&model_id).to_string());
            let top_provider = entry.get("top_provider").cloned().unwrap_or(Value::Null);
            let architecture = ModelArchitecture {
                modality,
                tokenizer,
                instruct_type: "none".to_string(),
            };
            models.push(ProviderModel {
                capabilities: ModelCapabilities {
                    context_length: top_provider
                        .get("context_length")
                        .and_then(Value::as_u64)
                        .unwrap_or(context_length as u64) as u32,
                    max_completion_tokens: top_provider
                        .get("max_completion_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(4096) as u32,
                    is_moderated: top_provider
                        .get("is_moderated")
                        .and_then(Value::as_bool)
                        .unwrap_or(true),
                    is_tool_calls: true,
                    is_vision: architecture.is_vision(),
                },
                model_id: model_id.clone(),
                external_model_id: None,
                provider_id: self.provider_id.clone(),
                name: entry
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(&model_id)
                    .to_string(),
                description: entry
                    .get("description")
                    .and_then(Value::as_str)
                    .map(|s| s.to_string()),
                context_length,
                architecture,
            });
        }
        models
    }
}

fn static_model(
    provider_id: &str,
    model_id: &str,
    name: &str,
    description: &str,
    context_length: u32,
    tokenizer: &str,
    is_tool_calls: bool,
) -> ProviderModel {
    ProviderModel {
        model_id: model_id.to_string(),
        external_model_id: None,
        provider_id: provider_id.to_string(),
        name: name.to_string(),
        description: Some(description.to_string()),
        context_length,
        architecture: ModelArchitecture::text(tokenizer),
        capabilities: ModelCapabilities {
            context_length,
            max_completion_tokens: 4096,
            is_moderated: true,
            is_tool_calls,
            is_vision: false,
        },
    }
}

/// Yandex has no models endpoint; the list is baked in.
pub struct YandexModelMapper {
    provider_id: String,
}

impl YandexModelMapper {
    pub fn new(provider_id: impl Into<String>) -> Self {
        YandexModelMapper {
            provider_id: provider_id.into(),
        }
    }
}

impl ModelMapper for YandexModelMapper {
    fn is_static(&self) -> bool {
        true
    }

    fn map_models(&self, _data: &Value) -> Vec<ProviderModel> {
        vec![
            static_model(
                &self.provider_id,
                "yandexgpt5-pro:latest",
                "YandexGPT5 Pro",
                "YandexGPT Pro 5 model with 32K context window.",
                32_768,
                "yandex",
                true,
            ),
            static_model(
                &self.provider_id,
                "yandexgpt5.1-pro:rc",
                "YandexGPT Pro 5.1",
                "YandexGPT Pro 5.1 RC model with 32K context window.",
                32_768,
                "yandex",
                true,
            ),
            static_model(
                &self.provider_id,
                "yandexgpt-lite5:latest",
                "YandexGPT Lite 5",
                "YandexGPT Lite 5 model with 32K context window.",
                32_768,
                "yandex",
                false,
            ),
            static_model(
                &self.provider_id,
                "aliceai-llm:latest",
                "Alice AI LLM",
                "Alice AI LLM text generation model.",
                32_768,
                "yandex",
                false,
            ),
        ]
    }
}

/// Z.AI model list is baked in (the upstream list API is not public).
pub struct ZaiModelMapper {
    provider_id: String,
}

impl ZaiModelMapper {
    pub fn new(provider_id: impl Into<String>) -> Self {
        ZaiModelMapper {
            provider_id: provider_id.into(),
        }
    }
}

impl ModelMapper for ZaiModelMapper {
    fn is_static(&self) -> bool {
        true
    }

    fn map_models(&self, _data: &Value) -> Vec<ProviderModel> {
        vec![
            static_model(
                &self.provider_id,
                "glm-5",
                "GLM-5",
                "Zhipu GLM-5 flagship model with thinking mode support.",
                204_800,
                "unknown",
                true,
            ),
            static_model(
                &self.provider_id,
                "glm-4.7",
                "GLM-4.7",
                "Zhipu GLM-4.7 model with thinking mode support.",
                131_072,
                "unknown",
                true,
            ),
            static_model(
                &self.provider_id,
                "glm-4.7-flash",
                "GLM-4.7 Flash",
                "Fast and affordable Zhipu GLM-4.7 variant.",
                131_072,
                "unknown",
                true,
            ),
        ]
    }
}

/// In-house Agents provider: fixed list, used as the fallback upstream in
/// OpenAI-compatible mode.
pub struct AgentsModelMapper {
    provider_id: String,
}

impl AgentsModelMapper {
    pub fn new(provider_id: impl Into<String>) -> Self {
        AgentsModelMapper {
            provider_id: provider_id.into(),
        }
    }
}

impl ModelMapper for AgentsModelMapper {
    fn is_static(&self) -> bool {
        true
    }

    fn map_models(&self, _data: &Value) -> Vec<ProviderModel> {
        let mut models = vec![
            static_model(
                &self.provider_id,
                "deepseek-r1:70b-32k",
                "DeepSeek R1 70B (32K ctx)",
                "DeepSeek R1 70B reasoning model with a 32K token context window.",
                32_768,
                "llama",
                false,
            ),
            static_model(
                &self.provider_id,
                "qwen2.5-coder:32b-instruct-q8_0-32k",
                "Qwen 2.5 Coder 32B (32K ctx)",
                "Qwen 2.5 Coder 32B coding model with a 32K token context window.",
                32_768,
                "qwen2",
                false,
            ),
            static_model(
                &self.provider_id,
                "llama3.2-vision:90b-32k",
                "Llama 3.2-Vision 90B (32K ctx)",
                "Llama 3.2-Vision 90B multimodal model with a 32K token context window.",
                32_768,
                "llama",
                false,
            ),
        ];
        // The vision variant reports its modality so capability inference
        // picks it up.
        if let Some(vision) = models.last_mut() {
            vision.architecture.modality = "image+text->text".to_string();
            vision.capabilities.is_vision = true;
        }
        models
    }
}

/// Ollama `/api/tags`-style payload: `{"models": [{"name", ...}]}`; context
/// length is not reported, so a conservative default is used.
pub struct OllamaModelMapper {
    provider_id: String,
}

impl OllamaModelMapper {
    pub fn new(provider_id: impl Into<String>) -> Self {
        OllamaModelMapper {
            provider_id: provider_id.into(),
        }
    }
}

impl ModelMapper for OllamaModelMapper {
    fn map_models(&self, data: &Value) -> Vec<ProviderModel> {
        let entries = data
            .get("models")
            .or_else(|| data.get("data"))
            .and_then(Value::as_array);
        let entries = match entries {
            Some(entries) => entries,
            None => return Vec::new(),
        };
        entries
            .iter()
            .filter_map(|entry| {
                let model_id = entry
                    .get("name")
                    .or_else(|| entry.get("id"))
                    .and_then(Value::as_str)?
                    .to_string();
                Some(static_model(
                    &self.provider_id,
                    &model_id,
                    &model_id,
                    "Local Ollama model.",
                    8_192,
                    "unknown",
                    false,
                ))
            })
            .collect()
    }
}

/// GigaChat `/models` payload is OpenAI-shaped.
pub type GigaChatModelMapper = OpenAiListModelMapper;

/// Pick the model mapper for a resolved provider binding.
pub fn model_mapper_for(config: &ProviderConfig, settings: &Settings) -> Box<dyn ModelMapper> {
    match config.provider_id.as_str() {
        providers::PROVIDER_OPENROUTER => Box::new(OpenRouterModelMapper::new(
            config.provider_id.clone(),
            settings.openrouter_supported_models.clone(),
        )),
        providers::PROVIDER_OPENROUTER_PROXY => Box::new(OpenRouterModelMapper::new(
            config.provider_id.clone(),
            settings.openrouter_proxy.supported_models.clone(),
        )),
        providers::PROVIDER_YANDEX => Box::new(YandexModelMapper::new(config.provider_id.clone())),
        providers::PROVIDER_ZAI => Box::new(ZaiModelMapper::new(config.provider_id.clone())),
        providers::PROVIDER_AGENTS => Box::new(AgentsModelMapper::new(config.provider_id.clone())),
        providers::PROVIDER_OLLAMA => Box::new(OllamaModelMapper::new(config.provider_id.clone())),
        _ => Box::new(OpenAiListModelMapper::new(config.provider_id.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn openai_list_maps_entries_with_defaults() {
        let mapper = OpenAiListModelMapper::new("deepseek");
        let models = mapper.map_models(&json!({
            "data": [
                {"id": "deepseek-chat", "context_length": 65536},
                {"id": "", "context_length": 1},
                {"no_id": true}
            ]
        }));
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model_id, "deepseek-chat");
        assert_eq!(models[0].context_length, 65_536);
        assert_eq!(models[0].provider_id, "deepseek");
        assert!(models[0].capabilities.is_tool_calls);
    }

    #[test]
    fn openrouter_filters_by_whitelist() {
        let mapper = OpenRouterModelMapper::new(
            "openrouter",
            vec!["anthropic/claude-sonnet-4.5".to_string()],
        );
        let models = mapper.map_models(&json!({
            "data": [
                {
                    "id": "anthropic/claude-sonnet-4.5",
                    "name": "Claude Sonnet 4.5",
                    "context_length": 200000,
                    "architecture": {"modality": "text+image->text", "tokenizer": "anthropic"},
                    "top_provider": {"max_completion_tokens": 64000, "is_moderated": false}
                },
                {"id": "vendor/unlisted", "context_length": 1000}
            ]
        }));
        assert_eq!(models.len(), 1);
        let model = &models[0];
        assert!(model.capabilities.is_vision);
        assert!(!model.capabilities.is_moderated);
        assert_eq!(model.capabilities.max_completion_tokens, 64_000);
    }

    #[test]
    fn static_mappers_ignore_input() {
        let yandex = YandexModelMapper::new("yandex");
        assert!(yandex.is_static());
        let models = yandex.map_models(&json!(null));
        assert_eq!(models.len(), 4);
        assert!(models.iter().any(|m| m.model_id == "yandexgpt5-pro:latest"));
        let lite = models
            .iter()
            .find(|m| m.model_id == "yandexgpt-lite5:latest")
            .unwrap();
        assert!(!lite.capabilities.is_tool_calls);
    }

    #[test]
    fn ollama_reads_models_array() {
        let mapper = OllamaModelMapper::new("ollama");
        let models = mapper.map_models(&json!({"models": [{"name": "llama3:8b"}]}));
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model_id, "llama3:8b");
    }
}
