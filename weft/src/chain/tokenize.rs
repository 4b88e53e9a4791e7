//! Tokenize stage: pessimistic token estimate used to size the billing hold.
//!
//! No tokenizer runs here; `max_tokens` (default 1000) bounds both input and
//! output. The hold is reconciled from actual usage after the stream ends.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{ArtifactSender, ChatContext, RequestHandler};
use crate::billing::TokenCount;
use crate::error::GatewayError;
use crate::providers::Provider;

const DEFAULT_TOKEN_ESTIMATE: u32 = 1000;

#[derive(Default)]
pub struct TokenizeHandler;

impl TokenizeHandler {
    pub fn new() -> Self {
        TokenizeHandler
    }
}

#[async_trait]
impl RequestHandler for TokenizeHandler {
    fn name(&self) -> &'static str {
        "TokenizeHandler"
    }

    fn can_handle(&self, ctx: &ChatContext) -> bool {
        ctx.provider_request.is_some()
    }

    async fn handle(
        &self,
        ctx: &mut ChatContext,
        _provider: &Arc<dyn Provider>,
        _out: &ArtifactSender,
    ) -> Result<(), GatewayError> {
        let max_tokens = ctx
            .provider_request
            .as_ref()
            .and_then(|r| r.max_tokens)
            .unwrap_or(DEFAULT_TOKEN_ESTIMATE);

        let tokens = TokenCount {
            model: ctx.external_model_id().to_string(),
            provider: ctx.provider_model.provider_id.clone(),
            input: max_tokens,
            output: max_tokens,
            total: max_tokens * 2,
            ..Default::default()
        };

        info!(
            request_id = %ctx.request_id,
            model = %tokens.model,
            input_tokens = tokens.input,
            output_tokens = tokens.output,
            "token calculation completed"
        );
        ctx.expected_tokens = Some(tokens);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use super::super::tests::test_context;
    use super::super::TransformHandler;
    use super::*;
    use crate::cache::NoopCache;
    use crate::catalog::OllamaModelMapper;
    use crate::mappers::OpenAiMapper;
    use crate::providers::{OllamaProvider, ProviderConfig};

    fn provider() -> Arc<dyn Provider> {
        Arc::new(
            OllamaProvider::new(
                ProviderConfig {
                    provider_id: "ollama".to_string(),
                    name: "Ollama".to_string(),
                    credentials: String::new(),
                    base_url: "http://localhost:11434".to_string(),
                    parameters: Default::default(),
                },
                Arc::new(OpenAiMapper::generic("Ollama")),
                Arc::new(OllamaModelMapper::new("ollama")),
                Arc::new(NoopCache),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn estimate_uses_max_tokens_for_both_sides() {
        let mut ctx = test_context(
            r#"{"model":"m","messages":[{"role":"user","content":"x"}],"max_tokens":512}"#,
        );
        let (tx, _rx) = mpsc::channel(1);
        let provider = provider();
        TransformHandler::new().handle(&mut ctx, &provider, &tx).await.unwrap();
        TokenizeHandler::new().handle(&mut ctx, &provider, &tx).await.unwrap();

        let tokens = ctx.expected_tokens.unwrap();
        assert_eq!(tokens.input, 512);
        assert_eq!(tokens.output, 512);
        assert_eq!(tokens.total, 1024);
        assert_eq!(tokens.model, "deepseek/deepseek-chat");
        assert_eq!(tokens.provider, "deepseek");
    }

    #[tokio::test]
    async fn estimate_defaults_to_1000_without_max_tokens() {
        let mut ctx = test_context(r#"{"model":"m","messages":[{"role":"user","content":"x"}]}"#);
        let (tx, _rx) = mpsc::channel(1);
        let provider = provider();
        TransformHandler::new().handle(&mut ctx, &provider, &tx).await.unwrap();
        TokenizeHandler::new().handle(&mut ctx, &provider, &tx).await.unwrap();
        assert_eq!(ctx.expected_tokens.unwrap().total, 2000);
    }

    #[tokio::test]
    async fn skipped_without_provider_request() {
        let ctx = test_context(r#"{"model":"m","messages":[{"role":"user","content":"x"}]}"#);
        assert!(!TokenizeHandler::new().can_handle(&ctx));
    }
}
