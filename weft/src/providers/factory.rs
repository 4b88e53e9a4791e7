//! Provider factory: build the driver + wire mapper + model mapper trio for
//! a resolved provider binding.

use std::sync::Arc;
use std::time::Duration;

use super::{
    GigaChatProvider, OllamaProvider, OpenAiCompatProvider, Provider, ProviderConfig,
    YandexProvider, PROVIDER_AGENTS, PROVIDER_DEEPSEEK, PROVIDER_GIGACHAT, PROVIDER_OLLAMA,
    PROVIDER_OPENROUTER, PROVIDER_OPENROUTER_PROXY, PROVIDER_YANDEX, PROVIDER_ZAI,
};
use crate::cache::Cache;
use crate::catalog::{model_mapper_for, ModelMapper};
use crate::error::GatewayError;
use crate::mappers::{GigaChatMapper, OpenAiMapper, WireMapper, YandexMapper};
use crate::settings::Settings;

/// Proxy upstreams may swap models underneath us; cache their lists briefly.
const PROXY_MODELS_TTL: Duration = Duration::from_secs(300);
const DEFAULT_MODELS_TTL: Duration = Duration::from_secs(86_400);
const STATIC_MODELS_TTL: Duration = Duration::from_secs(3_600);
const PROXY_TIMEOUT_SECS: u64 = 15;

fn wire_mapper_for(config: &ProviderConfig) -> Arc<dyn WireMapper> {
    match config.provider_id.as_str() {
        PROVIDER_DEEPSEEK => Arc::new(OpenAiMapper::deepseek()),
        PROVIDER_ZAI => Arc::new(OpenAiMapper::zai()),
        PROVIDER_OPENROUTER => Arc::new(OpenAiMapper::openrouter("OpenRouter")),
        PROVIDER_OPENROUTER_PROXY => Arc::new(OpenAiMapper::openrouter("OpenRouter Proxy")),
        PROVIDER_GIGACHAT => Arc::new(GigaChatMapper::new()),
        PROVIDER_YANDEX => Arc::new(YandexMapper::new(config.parameters.folder_id.clone())),
        _ => Arc::new(OpenAiMapper::generic("OpenAI-compatible")),
    }
}

fn models_ttl_for(provider_id: &str) -> Duration {
    match provider_id {
        PROVIDER_OPENROUTER_PROXY => PROXY_MODELS_TTL,
        PROVIDER_ZAI | PROVIDER_AGENTS => STATIC_MODELS_TTL,
        _ => DEFAULT_MODELS_TTL,
    }
}

/// Construct the driver for one request (or one catalog refresh).
pub fn build_provider(
    mut config: ProviderConfig,
    settings: &Settings,
    cache: Arc<dyn Cache>,
) -> Result<Arc<dyn Provider>, GatewayError> {
    let wire_mapper = wire_mapper_for(&config);
    let model_mapper: Arc<dyn ModelMapper> = Arc::from(model_mapper_for(&config, settings));

    let provider: Arc<dyn Provider> = match config.provider_id.as_str() {
        PROVIDER_GIGACHAT => Arc::new(GigaChatProvider::new(
            config,
            wire_mapper,
            model_mapper,
            cache,
            settings.gigachat_scope.clone(),
        )?),
        PROVIDER_YANDEX => Arc::new(YandexProvider::new(
            config,
            wire_mapper,
            model_mapper,
            cache,
        )?),
        PROVIDER_OLLAMA => Arc::new(OllamaProvider::new(
            config,
            wire_mapper,
            model_mapper,
            cache,
        )?),
        provider_id => {
            let ttl = models_ttl_for(provider_id);
            if provider_id == PROVIDER_OPENROUTER_PROXY {
                config.parameters.timeout_secs = PROXY_TIMEOUT_SECS;
            }
            Arc::new(OpenAiCompatProvider::new(
                config,
                wire_mapper,
                model_mapper,
                cache,
                ttl,
            )?)
        }
    };
    Ok(provider)
}
