//! Models listing endpoint: OpenAI `list` shape in compatible mode, the
//! gateway (OpenRouter-like) shape otherwise, with pricing merged from the
//! billing service's model rates.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use weft::billing::ModelRate;
use weft::catalog::ProviderModel;

use crate::app::AppState;
use crate::error::ApiError;

const MODEL_RATES_CACHE_KEY: &str = "model_rates";
const MODEL_RATES_CACHE_TTL: Duration = Duration::from_secs(300);
/// Fixed `created` stamp for the OpenAI model list.
const MODELS_CREATED_AT: i64 = 1_710_979_200;

#[derive(Serialize)]
struct ModelPricing {
    prompt: String,
    completion: String,
    request: String,
    image: String,
    web_search: String,
    internal_reasoning: String,
}

impl ModelPricing {
    fn from_rate(rate: &ModelRate) -> Self {
        ModelPricing {
            prompt: rate.prompt_rate.to_string(),
            completion: rate.completion_rate.to_string(),
            request: "0".to_string(),
            image: rate
                .image_rate
                .map(|r| r.to_string())
                .unwrap_or_else(|| "0".to_string()),
            web_search: "0".to_string(),
            internal_reasoning: rate
                .reasoning_rate
                .map(|r| r.to_string())
                .unwrap_or_else(|| "0".to_string()),
        }
    }
}

fn gateway_model_entry(model: &ProviderModel, rates: &HashMap<String, ModelRate>) -> Value {
    let pricing = rates
        .get(model.external_id())
        .map(|rate| serde_json::to_value(ModelPricing::from_rate(rate)).unwrap_or(Value::Null));
    json!({
        "id": model.external_id(),
        "name": model.name,
        "description": model.description,
        "pricing": pricing,
        "context_length": model.context_length,
        "architecture": {
            "tokenizer": model.architecture.tokenizer,
            "instruct_type": model.architecture.instruct_type,
            "modality": model.architecture.modality,
        },
        "top_provider": {
            "context_length": model.capabilities.context_length,
            "max_completion_tokens": model.capabilities.max_completion_tokens,
            "is_moderated": model.capabilities.is_moderated,
        },
        "per_request_limits": {
            "prompt_tokens": Value::Null,
            "completion_tokens": model.capabilities.max_completion_tokens,
        },
    })
}

/// Model rates, cached briefly so the models endpoint does not hammer the
/// billing service.
async fn model_rates(state: &AppState) -> HashMap<String, ModelRate> {
    let billing = match &state.billing {
        Some(billing) => billing,
        None => return HashMap::new(),
    };
    if let Some(cached) = state.cache.get(MODEL_RATES_CACHE_KEY).await {
        if let Ok(rates) = serde_json::from_value::<Vec<ModelRate>>(cached) {
            return rates.into_iter().map(|r| (r.model.clone(), r)).collect();
        }
    }
    match billing.get_all_model_rates(None).await {
        Ok(rates) => {
            if let Ok(value) = serde_json::to_value(&rates) {
                state
                    .cache
                    .set(MODEL_RATES_CACHE_KEY, value, Some(MODEL_RATES_CACHE_TTL))
                    .await;
            }
            info!(rates_count = rates.len(), "retrieved model rates for pricing");
            rates.into_iter().map(|r| (r.model.clone(), r)).collect()
        }
        Err(e) => {
            warn!(error = %e, "failed to get model rates");
            HashMap::new()
        }
    }
}

/// `GET /v1/models` (or `/api/v1/models`).
pub async fn get_models(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let models = state.catalog.get_models().await?;

    if state.settings.enable_openai_compatible_api {
        let data: Vec<Value> = models
            .iter()
            .map(|model| {
                json!({
                    "id": model.model_id,
                    "created": MODELS_CREATED_AT,
                    "object": "model",
                    "owned_by": model.provider_id,
                })
            })
            .collect();
        return Ok(Json(json!({ "object": "list", "data": data })));
    }

    let rates = model_rates(&state).await;
    let data: Vec<Value> = models
        .iter()
        .map(|model| gateway_model_entry(model, &rates))
        .collect();
    Ok(Json(json!({ "data": data })))
}
