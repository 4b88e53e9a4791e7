//! Handler chain: the fixed pipeline of stages around each chat request.
//!
//! Order: transform → tokenize → limit check → completion → usage record.
//! Stages that cannot handle the current context are skipped; a stage error
//! aborts the chain and propagates to the caller. Artifacts flow to the HTTP
//! surface through a channel, so the completion stage can stream while later
//! stages still see the mutated context.

mod completion;
mod context;
mod limits;
mod tokenize;
mod transform;
mod usage;

pub use completion::CompletionHandler;
pub use context::ChatContext;
pub use limits::LimitCheckHandler;
pub use tokenize::TokenizeHandler;
pub use transform::TransformHandler;
pub use usage::UsageRecordHandler;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::billing::BillingClient;
use crate::dialect::RouterArtifact;
use crate::error::GatewayError;
use crate::providers::Provider;

/// Channel carrying artifacts (and, on abort, the error) to the surface.
pub type ArtifactSender = mpsc::Sender<Result<RouterArtifact, GatewayError>>;

/// One stage of the chain.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the stage applies to this context.
    fn can_handle(&self, ctx: &ChatContext) -> bool;

    /// Run the stage. Artifacts for the caller go through `out`; stages that
    /// emit nothing act as pure mutations of the context.
    async fn handle(
        &self,
        ctx: &mut ChatContext,
        provider: &Arc<dyn Provider>,
        out: &ArtifactSender,
    ) -> Result<(), GatewayError>;
}

/// The configured pipeline.
pub struct HandlerChain {
    handlers: Vec<Box<dyn RequestHandler>>,
}

impl HandlerChain {
    pub fn new(handlers: Vec<Box<dyn RequestHandler>>) -> Self {
        HandlerChain { handlers }
    }

    /// The standard stage order. Billing stages are present only when a
    /// billing client is configured.
    pub fn standard(billing: Option<Arc<BillingClient>>) -> Self {
        let mut handlers: Vec<Box<dyn RequestHandler>> = vec![
            Box::new(TransformHandler::new()),
            Box::new(TokenizeHandler::new()),
        ];
        if let Some(billing) = billing {
            handlers.push(Box::new(LimitCheckHandler::new(Arc::clone(&billing))));
            handlers.push(Box::new(CompletionHandler::new()));
            handlers.push(Box::new(UsageRecordHandler::new(billing)));
        } else {
            handlers.push(Box::new(CompletionHandler::new()));
        }
        HandlerChain::new(handlers)
    }

    /// Run every applicable stage in order against the shared context.
    pub async fn run(
        &self,
        ctx: &mut ChatContext,
        provider: &Arc<dyn Provider>,
        out: &ArtifactSender,
    ) -> Result<(), GatewayError> {
        info!(
            request_id = %ctx.request_id,
            model = %ctx.provider_model.model_id,
            handler_count = self.handlers.len(),
            "starting request handling chain"
        );

        for handler in &self.handlers {
            if !handler.can_handle(ctx) {
                debug!(
                    request_id = %ctx.request_id,
                    handler = handler.name(),
                    "handler skipped - cannot handle request"
                );
                continue;
            }
            debug!(request_id = %ctx.request_id, handler = handler.name(), "executing handler");
            if let Err(e) = handler.handle(ctx, provider, out).await {
                error!(
                    request_id = %ctx.request_id,
                    handler = handler.name(),
                    error = %e,
                    "handler failed"
                );
                return Err(e);
            }
        }

        info!(
            request_id = %ctx.request_id,
            generation_id = ctx.generation_id.as_deref().unwrap_or(""),
            has_final_response = ctx.final_response.is_some(),
            "completed request handling chain"
        );
        Ok(())
    }
}
