//! Billing DTOs exchanged with the usage service.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Currency {
    #[default]
    RUB,
    USD,
}

/// Token counts the billing service prices.
///
/// Before the upstream call this is a pessimistic estimate; after, it carries
/// the provider's actual usage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TokenCount {
    pub model: String,
    pub provider: String,
    pub input: u32,
    pub output: u32,
    pub total: u32,
    #[serde(default)]
    pub cache_hit: u32,
    /// Request asked the upstream to write its prompt cache.
    #[serde(default)]
    pub input_cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_reasoning: Option<u32>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta_info: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Cost {
    pub amount: f64,
    pub currency: Currency,
    #[serde(default)]
    pub breakdown: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_info: Option<HashMap<String, String>>,
}

/// Result of creating a hold.
///
/// `amount_held` is `None` for "insufficient funds" and `0.0` for free
/// models; the transaction id becomes the request's generation id.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HoldResponse {
    #[serde(default)]
    pub amount_held: Option<f64>,
    pub transaction_id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FinalizeHoldResponse {
    pub success: bool,
}

/// Per-model pricing from the billing service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelRate {
    pub model: String,
    pub prompt_rate: f64,
    pub completion_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_rate: Option<f64>,
    pub currency: Currency,
    #[serde(default)]
    pub created_at: i64,
}

/// Usage record posted after a completed request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreateUsageRequest {
    pub tokens: TokenCount,
    pub cost: Cost,
    pub meta_info: HashMap<String, String>,
}

/// Generation record posted after a completed request; its id is the hold's
/// transaction id.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreateGenerationRequest {
    pub id: String,
    pub model: String,
    pub provider: String,
    pub origin: String,
    pub generation_time: f64,
    /// Tokens per second over the whole request.
    pub speed: f64,
    pub finish_reason: String,
    pub native_finish_reason: String,
    pub is_streaming: bool,
    pub usage_id: String,
    pub meta_info: HashMap<String, String>,
}
