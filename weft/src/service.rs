//! Chat completion service: one request bound to a provider and the
//! configured chain, exposed as a stream of artifacts.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

use crate::chain::{ChatContext, HandlerChain};
use crate::dialect::RouterArtifact;
use crate::error::GatewayError;
use crate::providers::Provider;

/// Binds a provider and chain to a single request.
pub struct ChatCompletionService {
    provider: Arc<dyn Provider>,
    chain: Arc<HandlerChain>,
}

impl ChatCompletionService {
    pub fn new(provider: Arc<dyn Provider>, chain: Arc<HandlerChain>) -> Self {
        ChatCompletionService { provider, chain }
    }

    /// Run the chain and stream its artifacts.
    ///
    /// For `stream=false` the sequence is a single response; for
    /// `stream=true` it is the chunk sequence. A chain error arrives as the
    /// final `Err` item. The driver is closed when the chain ends, normally
    /// or not; the context is dropped with the task.
    pub fn create_chat_completion(
        self,
        mut ctx: ChatContext,
    ) -> ReceiverStream<Result<RouterArtifact, GatewayError>> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            info!(
                request_id = %ctx.request_id,
                model = %ctx.request.model,
                stream = ctx.request.stream,
                "starting chat completion request"
            );

            let result = self.chain.run(&mut ctx, &self.provider, &tx).await;
            match &result {
                Ok(()) => info!(
                    request_id = %ctx.request_id,
                    generation_id = ctx.generation_id.as_deref().unwrap_or(""),
                    "successfully completed chat completion request"
                ),
                Err(e) => {
                    error!(
                        request_id = %ctx.request_id,
                        code = e.code,
                        error = %e,
                        "chat completion request failed"
                    );
                    let _ = tx
                        .send(Err(GatewayError::new(
                            e.code,
                            e.message.clone(),
                            e.details.clone(),
                        )))
                        .await;
                }
            }

            debug!(request_id = %ctx.request_id, "closing provider connection");
            self.provider.close().await;
        });
        ReceiverStream::new(rx)
    }
}
