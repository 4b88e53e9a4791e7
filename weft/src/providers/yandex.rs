//! YandexGPT driver.
//!
//! The upstream streams JSON lines with cumulative text per chunk; the wire
//! mapper turns them into deltas and marks the terminal status
//! (`ALTERNATIVE_STATUS_FINAL` / `_TOOL_CALLS`) as a finish_reason, which is
//! what closes the stream here. Yandex sends no `[DONE]` marker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
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
use crate::sse::{parse_sse_line, LineBuffer, SseFrame};

const MODELS_CACHE_TTL: Duration = Duration::from_secs(3_600);

/// Only the Pro family supports function calling.
fn ensure_tools_supported(request: &ProviderRequest) -> Result<(), GatewayError> {
    if request.tools.is_some() && request.model.to_lowercase().contains("lite") {
        return Err(GatewayError::new(
            400,
            "YandexGPT Lite does not support function calling",
            json!({ "error": "Function calling is only supported in YandexGPT Pro models" }),
        ));
    }
    Ok(())
}

/// Yandex Foundation Models driver.
pub struct YandexProvider {
    config: ProviderConfig,
    mapper: Arc<dyn WireMapper>,
    model_mapper: Arc<dyn ModelMapper>,
    cache: Arc<dyn Cache>,
    client: reqwest::Client,
}

impl YandexProvider {
    pub fn new(
        config: ProviderConfig,
        mapper: Arc<dyn WireMapper>,
        model_mapper: Arc<dyn ModelMapper>,
        cache: Arc<dyn Cache>,
    ) -> Result<Self, GatewayError> {
        let client = build_http_client(&config)?;
        info!(provider_id = %config.provider_id, base_url = %config.base_url, "initialized Yandex provider");
        Ok(YandexProvider {
            config,
            mapper,
            model_mapper,
            cache,
            client,
        })
    }
}

#[async_trait]
impl Provider for YandexProvider {
    fn create_completion(&self, request: ProviderRequest) -> ChunkStream {
        let mapper = Arc::clone(&self.mapper);
        let config = self.config.clone();
        let client = self.client.clone();

        Box::pin(async_stream::try_stream! {
            ensure_tools_supported(&request)?;

            let body = mapper.map_request(&request)?;
            debug!(
                request_id = %request.request_id,
                provider_id = %config.provider_id,
                "starting stream request"
            );
            let response = client
                .post(format!("{}/completion", config.base_url))
                .header("Authorization", format!("Api-Key {}", config.credentials))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(GatewayError::from)?;
            let response = ensure_ok(response, &config.provider_id).await?;

            let mut lines = LineBuffer::new();
            let mut byte_stream = response.bytes_stream();
            'stream: while let Some(bytes) = byte_stream.next().await {
                let bytes = bytes.map_err(GatewayError::from)?;
                for line in lines.push(&bytes) {
                    match parse_sse_line(&line) {
                        SseFrame::Skip | SseFrame::Done => continue,
                        SseFrame::Data(frame) => {
                            let chunk = mapper.map_stream_chunk(
                                frame,
                                &request.model,
                                &config.provider_id,
                                &request.request_id,
                            )?;
                            // Terminal status arrives as a finish_reason.
                            let is_final = chunk.has_finish_reason();
                            yield chunk;
                            if is_final {
                                break 'stream;
                            }
                        }
                    }
                }
            }
        })
    }

    async fn get_models(&self) -> Result<Vec<ProviderModel>, GatewayError> {
        let provider_id = &self.config.provider_id;
        if let Some(models) = cached_models(&self.cache, provider_id).await {
            return Ok(models);
        }
        // No models endpoint upstream: the mapper bakes the list in.
        let models = self.model_mapper.map_models(&serde_json::Value::Null);
        store_models(&self.cache, provider_id, &models, MODELS_CACHE_TTL).await;
        Ok(models)
    }

    async fn get_model(&self, model_id: &str) -> Result<ProviderModel, GatewayError> {
        let models = self.get_models().await?;
        find_model(
            &self.cache,
            &self.config.provider_id,
            model_id,
            models,
            MODELS_CACHE_TTL,
        )
        .await
    }

    async fn close(&self) {
        debug!(provider_id = %self.config.provider_id, "closing Yandex HTTP client");
    }
}
