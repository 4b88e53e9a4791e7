//! GigaChat driver: OAuth token lifecycle plus the streaming completion loop.
//!
//! GigaChat terminates its own streams with `data: [DONE]`, so the driver
//! honors that marker instead of inferring finality from usage. SSL
//! verification is disabled by configuration (the upstream uses a private
//! CA).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
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

const OAUTH_URL: &str = "https://ngw.devices.sberbank.ru:9443/api/v2/oauth";
const MODELS_CACHE_TTL: Duration = Duration::from_secs(86_400);

/// Refresh this long before the reported expiry.
fn expiry_buffer() -> chrono::Duration {
    chrono::Duration::minutes(5)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Unix milliseconds.
    expires_at: i64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - expiry_buffer()
    }
}

/// Caches the access token and refreshes it near expiry.
///
/// Refresh is serialized by the mutex; a concurrent second refresh would be
/// wasteful but harmless since the result is idempotent.
struct TokenManager {
    client: reqwest::Client,
    base_url: String,
    credentials: String,
    scope: String,
    token: Mutex<Option<AccessToken>>,
}

impl TokenManager {
    async fn ensure_token(&self) -> Result<String, GatewayError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.is_valid(Utc::now()) {
                return Ok(token.token.clone());
            }
            debug!("GigaChat access token near expiry, refreshing");
        }
        let refreshed = self.refresh().await?;
        let token = refreshed.token.clone();
        *guard = Some(refreshed);
        Ok(token)
    }

    async fn refresh(&self) -> Result<AccessToken, GatewayError> {
        if self.credentials.is_empty() {
            return Err(GatewayError::new(
                500,
                "Failed to refresh GigaChat token",
                json!({ "error": "No GigaChat credentials provided" }),
            ));
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let response = if let Some((login, password)) = self.credentials.split_once(':') {
            // login:password credentials go to the token endpoint with basic
            // auth.
            self.client
                .post(format!("{}/token", self.base_url))
                .basic_auth(login, Some(password))
                .header("RqUID", &request_id)
                .send()
                .await
        } else {
            // A bare credential is a service-account key for the OAuth
            // endpoint.
            self.client
                .post(OAUTH_URL)
                .header("Authorization", format!("Basic {}", self.credentials))
                .header("RqUID", &request_id)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .form(&[("scope", self.scope.as_str())])
                .send()
                .await
        }
        .map_err(GatewayError::from)?;

        if response.status().as_u16() >= 400 {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::new(
                status,
                "Failed to refresh GigaChat token",
                json!({ "error": body }),
            ));
        }

        let token: TokenResponse = response.json().await.map_err(GatewayError::from)?;
        let expires_at = Utc
            .timestamp_millis_opt(token.expires_at)
            .single()
            .ok_or_else(|| {
                GatewayError::new(
                    500,
                    "Failed to refresh GigaChat token",
                    json!({ "error": "invalid expires_at timestamp" }),
                )
            })?;
        info!(expires_at = %expires_at, "refreshed GigaChat access token");
        Ok(AccessToken {
            token: token.access_token,
            expires_at,
        })
    }
}

/// GigaChat API driver.
pub struct GigaChatProvider {
    config: ProviderConfig,
    mapper: Arc<dyn WireMapper>,
    model_mapper: Arc<dyn ModelMapper>,
    cache: Arc<dyn Cache>,
    client: reqwest::Client,
    auth: Arc<TokenManager>,
}

impl GigaChatProvider {
    pub fn new(
        mut config: ProviderConfig,
        mapper: Arc<dyn WireMapper>,
        model_mapper: Arc<dyn ModelMapper>,
        cache: Arc<dyn Cache>,
        scope: String,
    ) -> Result<Self, GatewayError> {
        // The upstream certificate chain does not verify.
        config.parameters.verify_ssl = false;
        let client = build_http_client(&config)?;
        let auth = Arc::new(TokenManager {
            client: client.clone(),
            base_url: config.base_url.clone(),
            credentials: config.credentials.clone(),
            scope,
            token: Mutex::new(None),
        });
        info!(provider_id = %config.provider_id, base_url = %config.base_url, "initialized GigaChat provider");
        Ok(GigaChatProvider {
            config,
            mapper,
            model_mapper,
            cache,
            client,
            auth,
        })
    }
}

#[async_trait]
impl Provider for GigaChatProvider {
    fn create_completion(&self, request: ProviderRequest) -> ChunkStream {
        let mapper = Arc::clone(&self.mapper);
        let config = self.config.clone();
        let client = self.client.clone();
        let auth = Arc::clone(&self.auth);

        Box::pin(async_stream::try_stream! {
            let access_token = auth.ensure_token().await?;

            let body = mapper.map_request(&request)?;
            debug!(
                request_id = %request.request_id,
                provider_id = %config.provider_id,
                "starting stream request"
            );
            let response = client
                .post(format!("{}/chat/completions", config.base_url))
                .header("Authorization", format!("Bearer {access_token}"))
                .header("Content-Type", "application/json")
                .header("X-Request-ID", &request.request_id)
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
                        SseFrame::Skip => continue,
                        // GigaChat sends its own [DONE]; honor it.
                        SseFrame::Done => {
                            debug!(request_id = %request.request_id, "received [DONE] from GigaChat");
                            break 'stream;
                        }
                        SseFrame::Data(frame) => {
                            let chunk = mapper.map_stream_chunk(
                                frame,
                                &request.model,
                                &config.provider_id,
                                &request.request_id,
                            )?;
                            yield chunk;
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

        let access_token = self.auth.ensure_token().await?;
        let response = self
            .client
            .get(format!("{}/models", self.config.base_url))
            .header("Authorization", format!("Bearer {access_token}"))
            .send()
            .await
            .map_err(GatewayError::from)?;
        let response = ensure_ok(response, provider_id).await?;
        let data = response.json().await.map_err(GatewayError::from)?;
        let models = self.model_mapper.map_models(&data);
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
        debug!(provider_id = %self.config.provider_id, "closing GigaChat HTTP client");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_validity_respects_expiry_buffer() {
        let now = Utc::now();
        let fresh = AccessToken {
            token: "t".to_string(),
            expires_at: now + chrono::Duration::minutes(30),
        };
        assert!(fresh.is_valid(now));

        // Inside the 5-minute buffer counts as expired.
        let nearly = AccessToken {
            token: "t".to_string(),
            expires_at: now + chrono::Duration::minutes(4),
        };
        assert!(!nearly.is_valid(now));

        let expired = AccessToken {
            token: "t".to_string(),
            expires_at: now - chrono::Duration::minutes(1),
        };
        assert!(!expired.is_valid(now));
    }
}
