//! HTTP client for the billing/usage service.
//!
//! Degradation policy is availability over perfect accounting: retriable
//! failures (5xx, network) return synthetic zero-cost results so the request
//! still completes. 402 always surfaces to the caller.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{
    Cost, CreateGenerationRequest, CreateUsageRequest, Currency, FinalizeHoldResponse,
    HoldResponse, ModelRate, TokenCount,
};
use crate::error::GatewayError;
use crate::settings::Settings;

/// Client for the usage/billing service.
pub struct BillingClient {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl BillingClient {
    pub fn new(settings: &Settings) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| GatewayError::internal("Failed to build billing HTTP client", e))?;
        Ok(BillingClient {
            client,
            base_url: settings.billing_base_url.trim_end_matches('/').to_string(),
            service_key: settings.billing_api_key.clone(),
        })
    }

    /// True for failures worth degrading on instead of failing the request.
    fn should_fallback(error: &GatewayError) -> bool {
        matches!(error.code, 500 | 502 | 503 | 504)
            || error
                .details
                .get("network_error")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    fn fallback_transaction_id() -> String {
        format!("fallback_{}", Uuid::new_v4().simple())
    }

    async fn request(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<Value>,
        api_key: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header("Content-Type", "application/json");
        // User-scoped calls authenticate the caller and the service; rate
        // listing is service-only.
        builder = match api_key {
            Some(key) => builder
                .header("Authorization", format!("Bearer {key}"))
                .header(
                    "X-Service-Authorization",
                    format!("Bearer {}", self.service_key),
                ),
            None => builder.header("Authorization", format!("Bearer {}", self.service_key)),
        };
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        debug!(%method, endpoint, "billing API request");
        let response = builder.send().await.map_err(GatewayError::from)?;
        let status = response.status().as_u16();
        let data: Value = response.json().await.unwrap_or(Value::Null);
        if status >= 400 {
            let message = data
                .get("error")
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("status {status}"));
            return Err(GatewayError::new(
                status,
                format!("Usage API request failed: {message}"),
                json!({ "endpoint": endpoint, "status_code": status, "response_data": data }),
            ));
        }
        Ok(data)
    }

    /// All model rates, optionally filtered by currency. Degrades to an empty
    /// list when the service is unreachable.
    pub async fn get_all_model_rates(
        &self,
        currency: Option<Currency>,
    ) -> Result<Vec<ModelRate>, GatewayError> {
        let endpoint = match currency {
            Some(Currency::USD) => "/models/rates?currency=USD",
            Some(Currency::RUB) => "/models/rates?currency=RUB",
            None => "/models/rates",
        };
        match self.request(reqwest::Method::GET, endpoint, None, None).await {
            Ok(data) => serde_json::from_value(data).map_err(|e| {
                GatewayError::bad_request("Invalid model rates response format", e.to_string())
            }),
            Err(e) if Self::should_fallback(&e) => {
                warn!(error = %e, "usage API unavailable, returning empty model rates");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Price actual token usage. Degrades to zero cost.
    pub async fn calculate_cost(
        &self,
        api_key: &str,
        tokens: &TokenCount,
        currency: Currency,
    ) -> Result<Cost, GatewayError> {
        let body = json!({ "token_count": tokens, "currency": currency });
        match self
            .request(
                reqwest::Method::POST,
                "/billing/costs/calculate",
                Some(body),
                Some(api_key),
            )
            .await
        {
            Ok(data) => {
                let cost: Cost = serde_json::from_value(
                    data.get("cost").cloned().unwrap_or(Value::Null),
                )
                .map_err(|e| {
                    GatewayError::bad_request(
                        "Invalid cost calculation response format",
                        e.to_string(),
                    )
                })?;
                info!(amount = cost.amount, model = %tokens.model, "calculated cost");
                Ok(cost)
            }
            Err(e) if Self::should_fallback(&e) => {
                warn!(error = %e, model = %tokens.model, "usage API unavailable, returning zero cost");
                Ok(Cost {
                    amount: 0.0,
                    currency,
                    breakdown: json!({}),
                    meta_info: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Create a hold sized by estimated tokens.
    ///
    /// 402 is rewritten into the user-facing "insufficient funds" error;
    /// retriable failures degrade to a zero hold with a fallback transaction
    /// id.
    pub async fn process_cost_with_tokens(
        &self,
        api_key: &str,
        tokens: &TokenCount,
    ) -> Result<HoldResponse, GatewayError> {
        let body = json!({ "token_count": tokens });
        match self
            .request(
                reqwest::Method::POST,
                "/billing/holds/create/tokens",
                Some(body),
                Some(api_key),
            )
            .await
        {
            Ok(data) => serde_json::from_value(data).map_err(|e| {
                GatewayError::bad_request(
                    "Invalid cost processing response format",
                    e.to_string(),
                )
            }),
            Err(e) if e.code == 402 => {
                warn!(model = %tokens.model, "payment required during hold creation");
                Err(GatewayError::new(
                    402,
                    "Insufficient funds for request processing",
                    json!({
                        "error": "Payment required",
                        "error_type": "payment_required",
                        "model": tokens.model,
                    }),
                ))
            }
            Err(e) if Self::should_fallback(&e) => {
                warn!(error = %e, model = %tokens.model, "usage API unavailable, returning zero hold");
                Ok(HoldResponse {
                    amount_held: Some(0.0),
                    transaction_id: Self::fallback_transaction_id(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Finalize a hold against actual tokens. Degrades to success.
    pub async fn finalize_hold_with_tokens(
        &self,
        api_key: &str,
        tokens: &TokenCount,
        transaction_id: &str,
    ) -> Result<FinalizeHoldResponse, GatewayError> {
        let body = json!({ "token_count": tokens, "transaction_id": transaction_id });
        match self
            .request(
                reqwest::Method::POST,
                "/billing/holds/finalize/tokens",
                Some(body),
                Some(api_key),
            )
            .await
        {
            Ok(data) => serde_json::from_value(data).map_err(|e| {
                GatewayError::bad_request(
                    "Invalid finalize hold response format",
                    e.to_string(),
                )
            }),
            Err(e) if Self::should_fallback(&e) => {
                warn!(error = %e, transaction_id, "usage API unavailable, treating hold as finalized");
                Ok(FinalizeHoldResponse { success: true })
            }
            Err(e) => Err(e),
        }
    }

    /// Post the usage record; returns the record id. Degrades to a synthetic
    /// id.
    pub async fn create_usage(
        &self,
        api_key: &str,
        request: &CreateUsageRequest,
    ) -> Result<String, GatewayError> {
        match self
            .request(
                reqwest::Method::POST,
                "/analytics/usage",
                Some(serde_json::to_value(request)?),
                Some(api_key),
            )
            .await
        {
            Ok(data) => Ok(data
                .pointer("/data/id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()),
            Err(e) if Self::should_fallback(&e) => {
                warn!(error = %e, "usage API unavailable, skipping usage record");
                Ok(format!("fallback_usage_{}", Uuid::new_v4().simple()))
            }
            Err(e) => Err(e),
        }
    }

    /// Post the generation record. Degrades silently.
    pub async fn create_generation(
        &self,
        api_key: &str,
        request: &CreateGenerationRequest,
    ) -> Result<(), GatewayError> {
        match self
            .request(
                reqwest::Method::POST,
                "/analytics/generation",
                Some(serde_json::to_value(request)?),
                Some(api_key),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if Self::should_fallback(&e) => {
                warn!(error = %e, generation_id = %request.id, "usage API unavailable, skipping generation record");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_applies_to_5xx_and_network_errors() {
        let server_err = GatewayError::new(503, "down", json!({}));
        assert!(BillingClient::should_fallback(&server_err));

        let network_err = GatewayError::new(503, "net", json!({ "network_error": true }));
        assert!(BillingClient::should_fallback(&network_err));

        let payment = GatewayError::new(402, "no funds", json!({}));
        assert!(!BillingClient::should_fallback(&payment));

        let bad_request = GatewayError::new(400, "bad", json!({}));
        assert!(!BillingClient::should_fallback(&bad_request));
    }

    #[test]
    fn fallback_transaction_ids_are_marked() {
        let id = BillingClient::fallback_transaction_id();
        assert!(id.starts_with("fallback_"));
    }
}
