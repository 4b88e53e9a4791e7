//! Generic driver for OpenAI-compatible upstreams.
//!
//! Covers the in-house gateway upstream, DeepSeek, OpenRouter (direct and
//! proxied), Z.AI, and the Agents provider; the differences live in the wire
//! mapper, the model mapper, headers, and the terminal-chunk rule.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use super::{ChunkStream, FinalChunkDetector, Provider, ProviderConfig};
use crate::cache::Cache;
use crate::catalog::{ModelMapper, ProviderModel};
use crate::error::GatewayError;
use crate::mappers::WireMapper;
use crate::request::ProviderRequest;
use crate::sse::{parse_sse_line, LineBuffer, SseFrame};

/// Build the reqwest client for a provider binding.
pub(crate) fn build_http_client(
    config: &ProviderConfig,
) -> Result<reqwest::Client, GatewayError> {
    let mut builder =
        reqwest::Client::builder().timeout(Duration::from_secs(config.parameters.timeout_secs));
    if !config.parameters.verify_ssl {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(proxy) = &config.parameters.proxy {
        let auth = if proxy.user.is_empty() || proxy.password.is_empty() {
            String::new()
        } else {
            format!("{}:{}@", proxy.user, proxy.password)
        };
        let url = format!("{}://{}{}", proxy.scheme, auth, proxy.address);
        let proxy = reqwest::Proxy::all(&url).map_err(|e| {
            GatewayError::internal("Failed to configure upstream proxy", e)
        })?;
        // The tunnel may do SSL inspection; certificates cannot be verified
        // through it.
        builder = builder.proxy(proxy).danger_accept_invalid_certs(true);
    }
    builder
        .build()
        .map_err(|e| GatewayError::internal("Failed to build HTTP client", e))
}

/// Translate an embedded mid-stream `error` object into a gateway error.
///
/// OpenRouter emits these inside an otherwise 200 stream; a geo-block is
/// forced to 403.
pub(crate) fn error_from_stream_frame(
    frame: &Value,
    provider_id: &str,
) -> Option<GatewayError> {
    let error_data = frame.get("error")?;
    let metadata = error_data.get("metadata").cloned().unwrap_or(Value::Null);
    let raw = metadata
        .get("raw")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mut message = if raw.is_empty() {
        error_data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Provider returned error")
            .to_string()
    } else {
        raw.clone()
    };
    let mut code = error_data.get("code").and_then(Value::as_u64).unwrap_or(500) as u16;
    if error_data.to_string().contains("unsupported_country_region_territory")
        || raw.contains("unsupported_country_region_territory")
    {
        code = 403;
        if message.is_empty() {
            message = "Request blocked for this region".to_string();
        }
    }
    let provider_name = metadata
        .get("provider_name")
        .and_then(Value::as_str)
        .unwrap_or(provider_id)
        .to_string();
    Some(GatewayError::new(
        code,
        message,
        json!({
            "error": error_data,
            "provider_id": provider_id,
            "provider_name": provider_name,
        }),
    ))
}

/// Read the body of a failed upstream response into a gateway error.
pub(crate) async fn drain_error_response(
    response: reqwest::Response,
    provider_id: &str,
) -> GatewayError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    error!(provider_id, status, body = %body, "error response from upstream");
    GatewayError::new(
        status,
        format!("{provider_id} API error"),
        json!({ "error": body, "status_code": status }),
    )
}

/// Pass a 2xx/3xx response through; drain anything else into an error.
pub(crate) async fn ensure_ok(
    response: reqwest::Response,
    provider_id: &str,
) -> Result<reqwest::Response, GatewayError> {
    if response.status().as_u16() >= 400 {
        Err(drain_error_response(response, provider_id).await)
    } else {
        Ok(response)
    }
}

/// `?`-able form of [`error_from_stream_frame`] for the driver loops.
pub(crate) fn fail_on_error_frame(frame: &Value, provider_id: &str) -> Result<(), GatewayError> {
    match error_from_stream_frame(frame, provider_id) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Cached model listing shared by all drivers.
pub(crate) async fn cached_models(
    cache: &Arc<dyn Cache>,
    provider_id: &str,
) -> Option<Vec<ProviderModel>> {
    let cached = cache.get(&format!("models:{provider_id}")).await?;
    serde_json::from_value(cached).ok()
}

pub(crate) async fn store_models(
    cache: &Arc<dyn Cache>,
    provider_id: &str,
    models: &[ProviderModel],
    ttl: Duration,
) {
    if let Ok(value) = serde_json::to_value(models) {
        cache
            .set(&format!("models:{provider_id}"), value, Some(ttl))
            .await;
    }
}

/// Case-insensitive lookup in a model list, with per-model cache fill.
pub(crate) async fn find_model(
    cache: &Arc<dyn Cache>,
    provider_id: &str,
    model_id: &str,
    models: Vec<ProviderModel>,
    ttl: Duration,
) -> Result<ProviderModel, GatewayError> {
    let cache_key = format!("model:{provider_id}:{}", model_id.to_lowercase());
    if let Some(cached) = cache.get(&cache_key).await {
        if let Ok(model) = serde_json::from_value(cached) {
            return Ok(model);
        }
    }
    let model = models
        .into_iter()
        .find(|m| m.model_id.eq_ignore_ascii_case(model_id))
        .ok_or_else(|| {
            GatewayError::new(
                404,
                format!("Model {model_id} not found"),
                json!({ "model_id": model_id }),
            )
        })?;
    if let Ok(value) = serde_json::to_value(&model) {
        cache.set(&cache_key, value, Some(ttl)).await;
    }
    Ok(model)
}

/// Driver for any upstream speaking the OpenAI chat-completions wire.
pub struct OpenAiCompatProvider {
    config: ProviderConfig,
    mapper: Arc<dyn WireMapper>,
    model_mapper: Arc<dyn ModelMapper>,
    cache: Arc<dyn Cache>,
    client: reqwest::Client,
    models_cache_ttl: Duration,
    /// OpenRouter wants attribution headers on every request.
    openrouter_headers: bool,
}

impl OpenAiCompatProvider {
    pub fn new(
        config: ProviderConfig,
        mapper: Arc<dyn WireMapper>,
        model_mapper: Arc<dyn ModelMapper>,
        cache: Arc<dyn Cache>,
        models_cache_ttl: Duration,
    ) -> Result<Self, GatewayError> {
        let client = build_http_client(&config)?;
        let openrouter_headers = config.provider_id.contains("openrouter");
        info!(
            provider_id = %config.provider_id,
            base_url = %config.base_url,
            timeout_secs = config.parameters.timeout_secs,
            "initialized OpenAI-compatible provider"
        );
        Ok(OpenAiCompatProvider {
            config,
            mapper,
            model_mapper,
            cache,
            client,
            models_cache_ttl,
            openrouter_headers,
        })
    }

    fn request_builder(&self, url: String) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        if !self.config.credentials.is_empty() {
            builder = builder.header(
                "Authorization",
                format!("Bearer {}", self.config.credentials),
            );
        }
        if self.openrouter_headers {
            builder = builder
                .header("HTTP-Referer", "https://weft.gateway")
                .header("X-Title", "weft");
        }
        builder
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn create_completion(&self, request: ProviderRequest) -> ChunkStream {
        let mapper = Arc::clone(&self.mapper);
        let config = self.config.clone();
        let builder = self.request_builder(format!("{}/chat/completions", config.base_url));

        Box::pin(async_stream::try_stream! {
            let body = mapper.map_request(&request)?;
            debug!(
                request_id = %request.request_id,
                provider_id = %config.provider_id,
                "starting stream request"
            );
            let response = builder.json(&body).send().await.map_err(GatewayError::from)?;
            let response = ensure_ok(response, &config.provider_id).await?;

            let mut detector = FinalChunkDetector::new();
            let mut lines = LineBuffer::new();
            let mut byte_stream = response.bytes_stream();

            'stream: while let Some(bytes) = byte_stream.next().await {
                let bytes = bytes.map_err(GatewayError::from)?;
                for line in lines.push(&bytes) {
                    match parse_sse_line(&line) {
                        SseFrame::Skip => continue,
                        SseFrame::Done => {
                            debug!(request_id = %request.request_id, "received [DONE]");
                            break 'stream;
                        }
                        SseFrame::Data(frame) => {
                            fail_on_error_frame(&frame, &config.provider_id)?;
                            let chunk = mapper.map_stream_chunk(
                                frame,
                                &request.model,
                                &config.provider_id,
                                &request.request_id,
                            )?;
                            let is_final = detector.observe(&chunk);
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

        let data = if self.model_mapper.is_static() {
            Value::Null
        } else {
            let mut builder = self
                .client
                .get(format!("{}/models", self.config.base_url));
            if !self.config.credentials.is_empty() {
                builder = builder.header(
                    "Authorization",
                    format!("Bearer {}", self.config.credentials),
                );
            }
            let response = builder.send().await.map_err(GatewayError::from)?;
            let response = ensure_ok(response, provider_id).await?;
            response.json().await.map_err(GatewayError::from)?
        };

        let models = self.model_mapper.map_models(&data);
        store_models(&self.cache, provider_id, &models, self.models_cache_ttl).await;
        Ok(models)
    }

    async fn get_model(&self, model_id: &str) -> Result<ProviderModel, GatewayError> {
        let models = self.get_models().await?;
        find_model(
            &self.cache,
            &self.config.provider_id,
            model_id,
            models,
            self.models_cache_ttl,
        )
        .await
    }

    async fn close(&self) {
        debug!(provider_id = %self.config.provider_id, "closing provider HTTP client");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_error_prefers_raw_message() {
        let err = error_from_stream_frame(
            &json!({"error": {"message": "boring", "code": 429, "metadata": {"raw": "rate limited", "provider_name": "OpenAI"}}}),
            "openrouter",
        )
        .unwrap();
        assert_eq!(err.code, 429);
        assert_eq!(err.message, "rate limited");
        assert_eq!(err.details["provider_name"], "OpenAI");
    }

    #[test]
    fn geo_block_is_forced_to_403() {
        let err = error_from_stream_frame(
            &json!({"error": {"message": "nope", "code": 400, "metadata": {"raw": "unsupported_country_region_territory"}}}),
            "openrouter",
        )
        .unwrap();
        assert_eq!(err.code, 403);
    }

    #[test]
    fn frames_without_error_pass() {
        assert!(error_from_stream_frame(&json!({"choices": []}), "x").is_none());
    }
}
