//! Ollama driver.
//!
//! Ollama speaks the OpenAI wire but never reports usage, so the terminal
//! rule differs: any chunk with a finish_reason ends the logical response,
//! and when the upstream's `[DONE]` arrives a zero-usage terminal chunk is
//! synthesized so billing finalization always sees usage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, info};

use super::openai_compat::{
    build_http_client, cached_models, ensure_ok, find_model, store_models,
};
use super::{ChunkStream, Provider, ProviderConfig};
use crate::cache::Cache;
use crate::catalog::{ModelMapper, ProviderModel};
use crate::error::GatewayError;
use crate::mappers::WireMapper;
use crate::request::ProviderRequest;
use crate::response::{now_unix, ProviderStreamChunk, Usage};
use crate::sse::{parse_sse_line, LineBuffer, SseFrame};

const MODELS_CACHE_TTL: Duration = Duration::from_secs(600);

/// Zero-filled usage for the synthesized terminal chunk.
fn zero_usage() -> Usage {
    Usage {
        prompt_tokens: 0,
        completion_tokens: 0,
        total_tokens: 0,
        prompt_tokens_details: Some(crate::response::PromptTokensDetails {
            cached_tokens: Some(0),
        }),
        completion_tokens_details: Some(crate::response::CompletionTokensDetails {
            reasoning_tokens: Some(0),
        }),
        cost: None,
    }
}

/// Driver for one Ollama server (resolved from the `ollama@server/model` id).
pub struct OllamaProvider {
    config: ProviderConfig,
    mapper: Arc<dyn WireMapper>,
    model_mapper: Arc<dyn ModelMapper>,
    cache: Arc<dyn Cache>,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(
        config: ProviderConfig,
        mapper: Arc<dyn WireMapper>,
        model_mapper: Arc<dyn ModelMapper>,
        cache: Arc<dyn Cache>,
    ) -> Result<Self, GatewayError> {
        let client = build_http_client(&config)?;
        info!(provider_id = %config.provider_id, base_url = %config.base_url, "initialized Ollama provider");
        Ok(OllamaProvider {
            config,
            mapper,
            model_mapper,
            cache,
            client,
        })
    }

    /// Models are cached per server, not per provider alias.
    fn models_cache_id(&self) -> String {
        format!(
            "{}:{}",
            self.config.provider_id,
            self.config.base_url.trim_start_matches("http://").trim_start_matches("https://")
        )
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn create_completion(&self, request: ProviderRequest) -> ChunkStream {
        let mapper = Arc::clone(&self.mapper);
        let config = self.config.clone();
        let client = self.client.clone();

        Box::pin(async_stream::try_stream! {
            let body = mapper.map_request(&request)?;
            debug!(
                request_id = %request.request_id,
                provider_id = %config.provider_id,
                base_url = %config.base_url,
                "starting stream request"
            );
            let mut builder = client
                .post(format!("{}/v1/chat/completions", config.base_url))
                .header("Content-Type", "application/json");
            if !config.credentials.is_empty() {
                builder = builder.header("Authorization", format!("Bearer {}", config.credentials));
            }
            let response = builder.json(&body).send().await.map_err(GatewayError::from)?;
            let response = ensure_ok(response, &config.provider_id).await?;

            let mut finish_seen: Option<ProviderStreamChunk> = None;
            let mut lines = LineBuffer::new();
            let mut byte_stream = response.bytes_stream();
            'stream: while let Some(bytes) = byte_stream.next().await {
                let bytes = bytes.map_err(GatewayError::from)?;
                for line in lines.push(&bytes) {
                    match parse_sse_line(&line) {
                        SseFrame::Skip => continue,
                        SseFrame::Done => {
                            // Ollama never sends usage; close the stream with
                            // a synthesized zero-usage terminal chunk.
                            if let Some(last) = finish_seen.take() {
                                debug!(
                                    request_id = %request.request_id,
                                    "synthesizing zero-usage terminal chunk"
                                );
                                yield ProviderStreamChunk::new(
                                    &request.request_id,
                                    last.created,
                                    &request.model,
                                    &config.provider_id,
                                    vec![crate::response::StreamChoice {
                                        index: 0,
                                        delta: crate::response::Delta {
                                            role: Some("assistant".to_string()),
                                            content: Some(String::new()),
                                            ..Default::default()
                                        },
                                        finish_reason: None,
                                    }],
                                    Some(zero_usage()),
                                );
                            }
                            break 'stream;
                        }
                        SseFrame::Data(frame) => {
                            let chunk = mapper.map_stream_chunk(
                                frame,
                                &request.model,
                                &config.provider_id,
                                &request.request_id,
                            )?;
                            if chunk.has_finish_reason() {
                                finish_seen = Some(chunk.clone());
                            }
                            yield chunk;
                        }
                    }
                }
            }
        })
    }

    async fn get_models(&self) -> Result<Vec<ProviderModel>, GatewayError> {
        let cache_id = self.models_cache_id();
        if let Some(models) = cached_models(&self.cache, &cache_id).await {
            return Ok(models);
        }

        let response = self
            .client
            .get(format!("{}/api/tags", self.config.base_url))
            .send()
            .await
            .map_err(GatewayError::from)?;
        let response = ensure_ok(response, &self.config.provider_id).await?;
        let data = response.json().await.map_err(GatewayError::from)?;
        let models = self.model_mapper.map_models(&data);
        store_models(&self.cache, &cache_id, &models, MODELS_CACHE_TTL).await;
        Ok(models)
    }

    async fn get_model(&self, model_id: &str) -> Result<ProviderModel, GatewayError> {
        let models = self.get_models().await?;
        find_model(
            &self.cache,
            &self.models_cache_id(),
            model_id,
            models,
            MODELS_CACHE_TTL,
        )
        .await
    }

    async fn close(&self) {
        debug!(provider_id = %self.config.provider_id, "closing Ollama HTTP client");
    }
}
