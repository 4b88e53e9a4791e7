//! Limit-check stage: reserve funds before the upstream call.
//!
//! The hold's transaction id becomes the request's generation id, reused for
//! the generation record after the stream. `amount_held = 0` is the legal
//! free-model outcome; `null` means insufficient funds and surfaces as 402.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{ArtifactSender, ChatContext, RequestHandler};
use crate::billing::BillingClient;
use crate::error::GatewayError;
use crate::providers::Provider;

pub struct LimitCheckHandler {
    billing: Arc<BillingClient>,
}

impl LimitCheckHandler {
    pub fn new(billing: Arc<BillingClient>) -> Self {
        LimitCheckHandler { billing }
    }
}

#[async_trait]
impl RequestHandler for LimitCheckHandler {
    fn name(&self) -> &'static str {
        "LimitCheckHandler"
    }

    fn can_handle(&self, ctx: &ChatContext) -> bool {
        !ctx.api_key.is_empty() && ctx.on_hold.is_none() && ctx.expected_tokens.is_some()
    }

    async fn handle(
        &self,
        ctx: &mut ChatContext,
        _provider: &Arc<dyn Provider>,
        _out: &ArtifactSender,
    ) -> Result<(), GatewayError> {
        let tokens = ctx.expected_tokens.clone().ok_or_else(|| {
            GatewayError::bad_request(
                "Expected tokens must be set in context",
                "Missing expected tokens",
            )
        })?;

        info!(
            request_id = %ctx.request_id,
            model = %tokens.model,
            input_tokens = tokens.input,
            output_tokens = tokens.output,
            "starting usage limit check"
        );

        let hold = self
            .billing
            .process_cost_with_tokens(&ctx.api_key, &tokens)
            .await?;

        ctx.on_hold = hold.amount_held;
        // The transaction id doubles as the generation id from here on.
        ctx.generation_id = Some(hold.transaction_id.clone());

        match ctx.on_hold {
            None => {
                warn!(
                    request_id = %ctx.request_id,
                    model = %tokens.model,
                    "usage limit exceeded - no amount held"
                );
                Err(GatewayError::new(
                    402,
                    "Usage limit exceeded",
                    json!({
                        "error": "Insufficient funds",
                        "error_type": "payment_required",
                        "provider_name": ctx.provider_model.provider_id,
                        "model_slug": ctx.provider_model.model_id,
                        "tokens": serde_json::to_value(&tokens)?,
                    }),
                ))
            }
            Some(amount) => {
                if amount == 0.0 {
                    debug!(request_id = %ctx.request_id, "free model detected - no funds held");
                }
                info!(
                    request_id = %ctx.request_id,
                    on_hold = amount,
                    transaction_id = %hold.transaction_id,
                    "usage limit check passed"
                );
                Ok(())
            }
        }
    }
}
