//! Transform stage: validate the inbound request and build the internal
//! provider request.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use super::{ArtifactSender, ChatContext, RequestHandler};
use crate::dialect::Dialect;
use crate::error::GatewayError;
use crate::message::ChatMessage;
use crate::providers::Provider;
use crate::reasoning::ReasoningConfig;
use crate::request::ProviderRequest;

#[derive(Default)]
pub struct TransformHandler;

impl TransformHandler {
    pub fn new() -> Self {
        TransformHandler
    }

    fn validate_messages_and_prompt(ctx: &ChatContext) -> Result<(), GatewayError> {
        let has_messages = ctx
            .request
            .messages
            .as_ref()
            .map(|m| !m.is_empty())
            .unwrap_or(false);
        match ctx.dialect {
            Dialect::OpenAi => {
                if !has_messages {
                    return Err(GatewayError::bad_request(
                        "Messages are required for OpenAI format",
                        "Missing required field",
                    ));
                }
            }
            Dialect::Gateway => {
                let has_prompt = ctx
                    .request
                    .prompt
                    .as_ref()
                    .map(|p| !p.is_empty())
                    .unwrap_or(false);
                if !has_messages && !has_prompt {
                    return Err(GatewayError::bad_request(
                        "Either messages or prompt is required",
                        "Missing required field",
                    ));
                }
                if has_messages && has_prompt {
                    return Err(GatewayError::bad_request(
                        "Cannot provide both messages and prompt",
                        "Conflicting fields",
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_sampling(ctx: &ChatContext) -> Result<(), GatewayError> {
        if let Some(temperature) = ctx.request.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(GatewayError::bad_request(
                    "Temperature must be between 0.0 and 2.0",
                    "Invalid temperature value",
                ));
            }
        }
        if let Some(top_p) = ctx.request.top_p {
            if top_p <= 0.0 || top_p > 1.0 {
                return Err(GatewayError::bad_request(
                    "Top P must be between 0.0 and 1.0",
                    "Invalid top_p value",
                ));
            }
        }
        if ctx.dialect == Dialect::Gateway {
            if let Some(penalty) = ctx.request.repetition_penalty {
                if penalty <= 0.0 || penalty > 2.0 {
                    return Err(GatewayError::bad_request(
                        "Repetition penalty must be between 0.0 and 2.0",
                        "Invalid repetition_penalty value",
                    ));
                }
            }
        }
        if let Some(penalty) = ctx.request.frequency_penalty {
            if !(-2.0..=2.0).contains(&penalty) {
                return Err(GatewayError::bad_request(
                    "Frequency penalty must be between -2.0 and 2.0",
                    "Invalid frequency_penalty value",
                ));
            }
        }
        if let Some(penalty) = ctx.request.presence_penalty {
            if !(-2.0..=2.0).contains(&penalty) {
                return Err(GatewayError::bad_request(
                    "Presence penalty must be between -2.0 and 2.0",
                    "Invalid presence_penalty value",
                ));
            }
        }
        Ok(())
    }

    /// Reasoning config from whichever dialect spelling the caller used.
    fn reasoning_config(ctx: &ChatContext) -> Result<Option<ReasoningConfig>, GatewayError> {
        match ctx.dialect {
            Dialect::OpenAi => Ok(ctx
                .request
                .reasoning_effort
                .map(ReasoningConfig::with_effort)),
            Dialect::Gateway => ctx
                .request
                .reasoning
                .clone()
                .map(ReasoningConfig::normalized)
                .transpose(),
        }
    }

    fn build_messages(ctx: &mut ChatContext) -> Result<Vec<ChatMessage>, GatewayError> {
        // The gateway dialect's prompt becomes a single user message.
        if ctx.dialect == Dialect::Gateway {
            if let Some(prompt) = ctx.request.prompt.clone() {
                return Ok(vec![ChatMessage::user(prompt)]);
            }
        }
        let messages = ctx.request.messages.clone().unwrap_or_default();
        for msg in &messages {
            match msg {
                ChatMessage::System { content, .. } | ChatMessage::User { content, .. } => {
                    if content.is_empty() {
                        return Err(GatewayError::bad_request(
                            format!("{} message must have content", capitalize(msg.role())),
                            "Message validation failed",
                        ));
                    }
                }
                _ => {}
            }
            if msg.has_cache_control() {
                ctx.cache_write = true;
                debug!(
                    request_id = %ctx.request_id,
                    role = msg.role(),
                    "found cache_control in message"
                );
            }
        }
        Ok(messages)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[async_trait]
impl RequestHandler for TransformHandler {
    fn name(&self) -> &'static str {
        "TransformHandler"
    }

    fn can_handle(&self, _ctx: &ChatContext) -> bool {
        true
    }

    async fn handle(
        &self,
        ctx: &mut ChatContext,
        _provider: &Arc<dyn Provider>,
        _out: &ArtifactSender,
    ) -> Result<(), GatewayError> {
        if let Some(usage) = &ctx.request.usage {
            ctx.include_usage = usage.include;
        }
        info!(
            request_id = %ctx.request_id,
            model = %ctx.provider_model.model_id,
            provider = %ctx.provider_model.provider_id,
            include_usage = ctx.include_usage,
            "starting request transformation"
        );

        Self::validate_messages_and_prompt(ctx)?;
        Self::validate_sampling(ctx)?;
        ctx.request.validate_transforms()?;

        // Billing, when enabled, replaces this with the hold transaction id.
        if ctx.generation_id.is_none() {
            ctx.generation_id = Some(format!("gen_{}", Uuid::new_v4()));
        }

        let messages = Self::build_messages(ctx)?;
        let reasoning = Self::reasoning_config(ctx)?;
        let repetition_penalty = match ctx.dialect {
            Dialect::Gateway => ctx.request.repetition_penalty,
            Dialect::OpenAi => None,
        };

        let provider_request = ProviderRequest {
            model: ctx.provider_model.model_id.clone(),
            request_id: ctx.request_id.clone(),
            messages,
            temperature: ctx.request.temperature,
            top_p: ctx.request.top_p,
            max_tokens: ctx.request.effective_max_tokens(),
            stream: ctx.request.stream,
            stop: ctx.request.stop.clone(),
            frequency_penalty: ctx.request.frequency_penalty,
            presence_penalty: ctx.request.presence_penalty,
            repetition_penalty,
            tools: ctx.request.tools.clone(),
            tool_choice: ctx.request.tool_choice.clone(),
            reasoning,
            usage: ctx.request.usage,
        };

        debug!(
            request_id = %ctx.request_id,
            message_count = provider_request.messages.len(),
            stream = provider_request.stream,
            cache_write = ctx.cache_write,
            "created provider request"
        );
        ctx.provider_request = Some(provider_request);
        Ok(())
    }
}
