//! Provider layer: the driver contract, resolution of caller model ids to
//! provider bindings, and the concrete upstream drivers.

mod factory;
mod gigachat;
mod ollama;
mod openai_compat;
mod registry;
mod yandex;

pub use factory::build_provider;
pub use gigachat::GigaChatProvider;
pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use registry::{normalize_model_id, ProviderRegistry};
pub use yandex::YandexProvider;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::catalog::ProviderModel;
use crate::error::GatewayError;
use crate::request::ProviderRequest;
use crate::response::ProviderStreamChunk;

pub const PROVIDER_AGENTS: &str = "agents";
pub const PROVIDER_XROUTER: &str = "xrouter";
pub const PROVIDER_DEEPSEEK: &str = "deepseek";
pub const PROVIDER_OPENROUTER: &str = "openrouter";
pub const PROVIDER_OPENROUTER_PROXY: &str = "openrouter-proxy";
pub const PROVIDER_GIGACHAT: &str = "gigachat";
pub const PROVIDER_YANDEX: &str = "yandex";
pub const PROVIDER_OLLAMA: &str = "ollama";
pub const PROVIDER_ZAI: &str = "zai";

/// Every provider the gateway can route to.
pub const ALL_PROVIDERS: &[&str] = &[
    PROVIDER_AGENTS,
    PROVIDER_XROUTER,
    PROVIDER_DEEPSEEK,
    PROVIDER_OPENROUTER,
    PROVIDER_OPENROUTER_PROXY,
    PROVIDER_GIGACHAT,
    PROVIDER_YANDEX,
    PROVIDER_OLLAMA,
    PROVIDER_ZAI,
];

/// Display name for a provider id.
pub fn provider_name(provider_id: &str) -> &'static str {
    match provider_id {
        PROVIDER_AGENTS => "Agents",
        PROVIDER_XROUTER => "XRouter",
        PROVIDER_DEEPSEEK => "DeepSeek",
        PROVIDER_OPENROUTER => "OpenRouter",
        PROVIDER_OPENROUTER_PROXY => "OpenRouter Proxy",
        PROVIDER_GIGACHAT => "GigaChat",
        PROVIDER_YANDEX => "YandexGPT",
        PROVIDER_OLLAMA => "Ollama",
        PROVIDER_ZAI => "Z.AI",
        _ => "Unknown",
    }
}

/// Proxy tunnel parameters for the OpenRouter-proxy driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyParams {
    /// `host:port` of the proxy endpoint.
    pub address: String,
    pub user: String,
    pub password: String,
    /// `socks5` | `http` | `https`.
    pub scheme: String,
}

/// Per-provider knobs resolved from settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderParams {
    pub timeout_secs: u64,
    pub verify_ssl: bool,
    /// Yandex cloud folder id; required to build `modelUri`.
    pub folder_id: Option<String>,
    pub proxy: Option<ProxyParams>,
}

impl Default for ProviderParams {
    fn default() -> Self {
        ProviderParams {
            timeout_secs: 300,
            verify_ssl: true,
            folder_id: None,
            proxy: None,
        }
    }
}

/// Provider binding produced per request from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub name: String,
    pub credentials: String,
    pub base_url: String,
    pub parameters: ProviderParams,
}

/// Stream of internal chunks from one upstream completion.
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<ProviderStreamChunk, GatewayError>> + Send>>;

/// The contract every upstream driver implements.
///
/// `create_completion` always streams internally; non-streamed upstream APIs
/// are converted to a one-element stream by their driver.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Open the upstream completion and stream normalized chunks.
    fn create_completion(&self, request: ProviderRequest) -> ChunkStream;

    /// List models, consulting the cache first.
    async fn get_models(&self) -> Result<Vec<ProviderModel>, GatewayError>;

    /// Look up one model by its clean id (case-insensitive). 404 on miss.
    async fn get_model(&self, model_id: &str) -> Result<ProviderModel, GatewayError>;

    /// Release driver resources. Called exactly once when the request ends.
    async fn close(&self);
}

/// Terminal-chunk detector for OpenAI-compatible streams.
///
/// A chunk is final when it carries both a finish_reason and usage, or when
/// it carries usage after an earlier chunk carried finish_reason.
#[derive(Debug, Default)]
pub struct FinalChunkDetector {
    has_finish_reason: bool,
}

impl FinalChunkDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns true when it terminates the stream.
    pub fn observe(&mut self, chunk: &ProviderStreamChunk) -> bool {
        let has_finish = chunk.has_finish_reason();
        let has_usage = chunk.usage.is_some();

        if has_finish && has_usage {
            return true;
        }
        if has_usage && self.has_finish_reason {
            return true;
        }
        if has_finish {
            self.has_finish_reason = true;
        }
        false
    }

    pub fn finish_seen(&self) -> bool {
        self.has_finish_reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{StreamChoice, Usage};

    fn chunk(finish: Option<&str>, usage: bool) -> ProviderStreamChunk {
        ProviderStreamChunk::new(
            "req",
            0,
            "m",
            "p",
            vec![StreamChoice {
                finish_reason: finish.map(|s| s.to_string()),
                ..Default::default()
            }],
            usage.then(Usage::default),
        )
    }

    #[test]
    fn finish_and_usage_in_one_chunk_is_final() {
        let mut detector = FinalChunkDetector::new();
        assert!(detector.observe(&chunk(Some("stop"), true)));
    }

    #[test]
    fn usage_after_finish_is_final() {
        let mut detector = FinalChunkDetector::new();
        assert!(!detector.observe(&chunk(None, false)));
        assert!(!detector.observe(&chunk(Some("stop"), false)));
        assert!(detector.observe(&chunk(None, true)));
    }

    #[test]
    fn usage_without_prior_finish_is_not_final() {
        let mut detector = FinalChunkDetector::new();
        assert!(!detector.observe(&chunk(None, true)));
        assert!(!detector.finish_seen());
    }
}
