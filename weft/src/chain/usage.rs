//! Usage-record stage: reconcile the hold against actual tokens and post the
//! usage and generation records.
//!
//! Runs only after a final response exists. Exactly one usage and one
//! generation record are posted per successful billed request; the
//! generation id equals the hold's transaction id. A hold of exactly zero
//! (free model, or billing degradation) is not finalized.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{ArtifactSender, ChatContext, RequestHandler};
use crate::billing::{
    BillingClient, CreateGenerationRequest, CreateUsageRequest, Currency, TokenCount,
};
use crate::error::GatewayError;
use crate::providers::Provider;
use crate::response::Usage;

pub struct UsageRecordHandler {
    billing: Arc<BillingClient>,
}

impl UsageRecordHandler {
    pub fn new(billing: Arc<BillingClient>) -> Self {
        UsageRecordHandler { billing }
    }

    /// Actual usage for billing: the unfiltered provider numbers when seen,
    /// otherwise whatever the final response carries.
    fn usage_data(ctx: &ChatContext) -> Result<Usage, GatewayError> {
        if let Some(usage) = &ctx.native_usage {
            return Ok(usage.clone());
        }
        ctx.final_response
            .as_ref()
            .and_then(|r| r.usage())
            .cloned()
            .ok_or_else(|| {
                GatewayError::bad_request(
                    "Usage data must be present in context or final response",
                    "Missing usage data",
                )
            })
    }

    fn token_count(ctx: &ChatContext, usage: &Usage) -> TokenCount {
        let mut meta_info = HashMap::new();
        if let Some(cost) = usage.cost {
            meta_info.insert("cost".to_string(), cost.to_string());
        }
        TokenCount {
            model: ctx.external_model_id().to_string(),
            provider: ctx.provider_model.provider_id.clone(),
            input: usage.prompt_tokens,
            output: usage.completion_tokens,
            total: usage.total_tokens,
            cache_hit: usage.cached_tokens(),
            input_cached: ctx.cache_write,
            output_reasoning: usage.reasoning_tokens(),
            meta_info,
        }
    }

    fn finish_reason(ctx: &ChatContext) -> String {
        ctx.stream_finish_reason
            .clone()
            .or_else(|| {
                ctx.final_response
                    .as_ref()
                    .and_then(|r| r.finish_reason())
                    .map(|s| s.to_string())
            })
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[async_trait]
impl RequestHandler for UsageRecordHandler {
    fn name(&self) -> &'static str {
        "UsageRecordHandler"
    }

    fn can_handle(&self, ctx: &ChatContext) -> bool {
        ctx.final_response.is_some() && !ctx.api_key.is_empty()
    }

    async fn handle(
        &self,
        ctx: &mut ChatContext,
        _provider: &Arc<dyn Provider>,
        _out: &ArtifactSender,
    ) -> Result<(), GatewayError> {
        let generation_id = ctx.generation_id.clone().ok_or_else(|| {
            GatewayError::bad_request(
                "Generation ID (transaction_id) must be set in context",
                "Missing generation ID",
            )
        })?;

        let usage = Self::usage_data(ctx)?;
        let tokens = Self::token_count(ctx, &usage);
        debug!(
            request_id = %ctx.request_id,
            input_tokens = tokens.input,
            output_tokens = tokens.output,
            cache_hit = tokens.cache_hit,
            "processing final token counts"
        );

        let cost = self
            .billing
            .calculate_cost(
                &ctx.api_key,
                &tokens,
                ctx.currency.unwrap_or(Currency::RUB),
            )
            .await?;

        // A zero hold (free model) has nothing to finalize.
        if ctx.on_hold.map_or(false, |amount| amount > 0.0) {
            self.billing
                .finalize_hold_with_tokens(&ctx.api_key, &tokens, &generation_id)
                .await?;
            debug!(
                request_id = %ctx.request_id,
                transaction_id = %generation_id,
                "finalized hold with tokens"
            );
        } else {
            debug!(
                request_id = %ctx.request_id,
                transaction_id = %generation_id,
                "skipping hold finalization for free model"
            );
        }

        let mut usage_meta = HashMap::from([
            ("request_id".to_string(), ctx.request_id.clone()),
        ]);
        if let Some(user_id) = &ctx.user_id {
            usage_meta.insert("user_id".to_string(), user_id.clone());
        }
        if let Some(cost_meta) = &cost.meta_info {
            usage_meta.extend(cost_meta.clone());
        }
        let usage_id = self
            .billing
            .create_usage(
                &ctx.api_key,
                &CreateUsageRequest {
                    tokens: tokens.clone(),
                    cost: cost.clone(),
                    meta_info: usage_meta,
                },
            )
            .await?;

        let generation_time = ctx
            .start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let speed = if generation_time > 0.0 {
            tokens.total as f64 / generation_time
        } else {
            0.0
        };
        let finish_reason = Self::finish_reason(ctx);

        let mut generation_meta = ctx.metadata.clone();
        generation_meta.insert("request_id".to_string(), ctx.request_id.clone());
        generation_meta.insert("stream".to_string(), ctx.request.stream.to_string());
        self.billing
            .create_generation(
                &ctx.api_key,
                &CreateGenerationRequest {
                    id: generation_id.clone(),
                    model: ctx.external_model_id().to_string(),
                    provider: ctx.provider_model.provider_id.clone(),
                    origin: ctx.origin.clone(),
                    generation_time,
                    speed,
                    finish_reason: finish_reason.clone(),
                    native_finish_reason: finish_reason,
                    is_streaming: ctx.request.stream,
                    usage_id: usage_id.clone(),
                    meta_info: generation_meta,
                },
            )
            .await?;

        info!(
            request_id = %ctx.request_id,
            generation_id = %generation_id,
            usage_id = %usage_id,
            total_tokens = tokens.total,
            generation_time,
            "successfully recorded usage and generation"
        );
        Ok(())
    }
}
