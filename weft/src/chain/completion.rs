//! Completion stage: drive the provider driver and shape its chunks into the
//! caller's dialect.
//!
//! Streaming mode forwards each chunk as it arrives, accumulates the text
//! for audit, and stores the terminal chunk as the context's final response.
//! Non-streaming mode collects the chunks and assembles a single response:
//! delta contents joined, tool-call arguments accumulated by call id, the
//! first finish_reason kept, and the richest usage preserved for billing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::{ArtifactSender, ChatContext, RequestHandler};
use crate::dialect::{
    Dialect, RouterArtifact, RouterChoice, RouterResponse, RouterStreamChoice, RouterStreamChunk,
};
use crate::error::GatewayError;
use crate::providers::Provider;
use crate::response::{
    now_unix, ProviderStreamChunk, ResponseMessage, Usage, OBJECT_CHAT_COMPLETION,
    OBJECT_CHAT_COMPLETION_CHUNK,
};
use crate::tools::{FunctionCall, ToolCall, ToolKind};

/// Accumulates tool-call argument fragments across deltas.
///
/// Fragments carry the call id only on their first delta; later fragments
/// reference the same call by `index`.
#[derive(Default)]
struct ToolCallAccumulator {
    order: Vec<String>,
    calls: HashMap<String, ToolCall>,
    index_to_key: HashMap<u32, String>,
}

impl ToolCallAccumulator {
    fn update(&mut self, fragment: &ToolCall) {
        let key = match &fragment.id {
            Some(id) => {
                if let Some(index) = fragment.index {
                    self.index_to_key.insert(index, id.clone());
                }
                id.clone()
            }
            None => match fragment.index.and_then(|i| self.index_to_key.get(&i)) {
                Some(known) => known.clone(),
                None => format!("idx_{}", fragment.index.unwrap_or(0)),
            },
        };

        if !self.calls.contains_key(&key) {
            self.order.push(key.clone());
        }
        let entry = self.calls.entry(key).or_insert_with(|| ToolCall {
            id: fragment.id.clone(),
            kind: fragment.kind.or(Some(ToolKind::Function)),
            function: Some(FunctionCall::default()),
            index: fragment.index,
        });

        if let Some(function) = &fragment.function {
            let target = entry.function.get_or_insert_with(FunctionCall::default);
            if let Some(name) = &function.name {
                target.name = Some(name.clone());
            }
            if let Some(arguments) = &function.arguments {
                target
                    .arguments
                    .get_or_insert_with(String::new)
                    .push_str(arguments);
            }
        }
    }

    fn into_calls(mut self) -> Vec<ToolCall> {
        self.order
            .iter()
            .filter_map(|key| self.calls.remove(key))
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Default)]
pub struct CompletionHandler;

impl CompletionHandler {
    pub fn new() -> Self {
        CompletionHandler
    }

    /// Feed one chunk to the terminal-chunk state machine, capturing usage
    /// and the first finish_reason on the way.
    fn observe(ctx: &mut ChatContext, chunk: &ProviderStreamChunk) -> bool {
        if let Some(usage) = &chunk.usage {
            ctx.native_usage = Some(usage.clone());
            debug!(
                request_id = %ctx.request_id,
                total_tokens = usage.total_tokens,
                "storing native usage from chunk"
            );
        }
        let has_finish = chunk.has_finish_reason();
        if has_finish && ctx.stream_finish_reason.is_none() {
            ctx.stream_finish_reason = chunk.finish_reason().map(|s| s.to_string());
        }
        let has_usage = chunk.usage.is_some();
        if has_finish && has_usage {
            return true;
        }
        if has_usage && ctx.finish_seen {
            return true;
        }
        if has_finish {
            ctx.finish_seen = true;
        }
        false
    }

    /// Usage as returned to the caller: full details only when asked.
    fn filtered_usage(usage: &Usage, ctx: &ChatContext) -> Usage {
        if ctx.include_usage {
            usage.clone()
        } else {
            usage.basic()
        }
    }

    fn stream_chunk(
        ctx: &ChatContext,
        chunk: &ProviderStreamChunk,
        usage: Option<Usage>,
    ) -> RouterStreamChunk {
        let choices = chunk
            .choices
            .iter()
            .map(|choice| RouterStreamChoice {
                index: choice.index,
                delta: choice.delta.clone(),
                finish_reason: choice.finish_reason.clone(),
                native_finish_reason: match ctx.dialect {
                    Dialect::Gateway => choice.finish_reason.clone(),
                    Dialect::OpenAi => None,
                },
                error: None,
            })
            .collect();
        RouterStreamChunk {
            id: ctx.generation_id.clone().unwrap_or_default(),
            object: OBJECT_CHAT_COMPLETION_CHUNK.to_string(),
            created: now_unix(),
            model: ctx.external_model_id().to_string(),
            system_fingerprint: None,
            choices,
            usage,
            provider: match ctx.dialect {
                Dialect::Gateway => Some(ctx.provider_model.provider_id.clone()),
                Dialect::OpenAi => None,
            },
        }
    }

    fn assemble_response(ctx: &ChatContext, chunks: &[ProviderStreamChunk]) -> RouterResponse {
        let mut content = String::new();
        let mut reasoning = String::new();
        let mut role: Option<String> = None;
        let mut finish_reason: Option<String> = None;
        let mut tool_calls = ToolCallAccumulator::default();

        for chunk in chunks {
            for choice in &chunk.choices {
                if let Some(r) = &choice.delta.role {
                    role.get_or_insert_with(|| r.clone());
                }
                if let Some(text) = &choice.delta.content {
                    content.push_str(text);
                }
                if let Some(text) = &choice.delta.reasoning {
                    reasoning.push_str(text);
                }
                if let Some(calls) = &choice.delta.tool_calls {
                    for call in calls {
                        tool_calls.update(call);
                    }
                }
                if choice.finish_reason.is_some() && finish_reason.is_none() {
                    finish_reason = choice.finish_reason.clone();
                }
            }
        }

        let message = ResponseMessage {
            role: role.unwrap_or_else(|| "assistant".to_string()),
            content: (!content.is_empty()).then_some(content),
            reasoning: (!reasoning.is_empty()).then_some(reasoning),
            refusal: None,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls.into_calls())
            },
        };

        RouterResponse {
            id: ctx.generation_id.clone().unwrap_or_default(),
            object: OBJECT_CHAT_COMPLETION.to_string(),
            created: now_unix(),
            model: ctx.external_model_id().to_string(),
            system_fingerprint: None,
            choices: vec![RouterChoice {
                index: 0,
                message,
                native_finish_reason: match ctx.dialect {
                    Dialect::Gateway => finish_reason.clone(),
                    Dialect::OpenAi => None,
                },
                finish_reason,
                error: None,
            }],
            usage: ctx
                .native_usage
                .as_ref()
                .map(|u| Self::filtered_usage(u, ctx)),
            provider: match ctx.dialect {
                Dialect::Gateway => Some(ctx.provider_model.provider_id.clone()),
                Dialect::OpenAi => None,
            },
        }
    }
}

#[async_trait]
impl RequestHandler for CompletionHandler {
    fn name(&self) -> &'static str {
        "CompletionHandler"
    }

    fn can_handle(&self, ctx: &ChatContext) -> bool {
        ctx.provider_request.is_some()
    }

    async fn handle(
        &self,
        ctx: &mut ChatContext,
        provider: &Arc<dyn Provider>,
        out: &ArtifactSender,
    ) -> Result<(), GatewayError> {
        let request = ctx.provider_request.clone().ok_or_else(|| {
            GatewayError::new(
                500,
                "Missing required context",
                serde_json::json!({ "error": "provider_request is None" }),
            )
        })?;

        ctx.start_time = Some(Instant::now());
        let mut stream = provider.create_completion(request);

        if ctx.request.stream {
            while let Some(item) = stream.next().await {
                let chunk = item?;
                let is_final = Self::observe(ctx, &chunk);
                for choice in &chunk.choices {
                    if let Some(text) = &choice.delta.content {
                        ctx.accumulate(text);
                    }
                }
                let usage = if is_final {
                    chunk.usage.as_ref().map(|u| Self::filtered_usage(u, ctx))
                } else {
                    None
                };
                let router_chunk = Self::stream_chunk(ctx, &chunk, usage);
                if is_final {
                    ctx.final_response = Some(RouterArtifact::Chunk(router_chunk.clone()));
                }
                if out.send(Ok(RouterArtifact::Chunk(router_chunk))).await.is_err() {
                    // Client went away; no further usage recording happens.
                    warn!(request_id = %ctx.request_id, "client disconnected mid-stream");
                    ctx.final_response = None;
                    return Err(GatewayError::internal(
                        "Client disconnected during streaming",
                        "stream receiver dropped",
                    ));
                }
                if is_final {
                    debug!(
                        request_id = %ctx.request_id,
                        accumulated_len = ctx.accumulated_response.as_deref().map(str::len).unwrap_or(0),
                        "terminal chunk reached"
                    );
                    break;
                }
            }
        } else {
            let mut collected = Vec::new();
            while let Some(item) = stream.next().await {
                let chunk = item?;
                let is_final = Self::observe(ctx, &chunk);
                collected.push(chunk);
                if is_final {
                    break;
                }
            }
            info!(
                request_id = %ctx.request_id,
                chunk_count = collected.len(),
                "collected all chunks"
            );

            let mut accumulated = String::new();
            for chunk in &collected {
                for choice in &chunk.choices {
                    if let Some(text) = &choice.delta.content {
                        accumulated.push_str(text);
                    }
                }
            }
            ctx.accumulated_response = Some(accumulated);

            let response = Self::assemble_response(ctx, &collected);
            ctx.final_response = Some(RouterArtifact::Response(response.clone()));
            if out.send(Ok(RouterArtifact::Response(response))).await.is_err() {
                warn!(request_id = %ctx.request_id, "client disconnected before response");
                ctx.final_response = None;
                return Err(GatewayError::internal(
                    "Client disconnected",
                    "response receiver dropped",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::test_context;
    use super::*;
    use crate::response::{Delta, StreamChoice};

    fn chunk(
        content: Option<&str>,
        tool_calls: Option<Vec<ToolCall>>,
        finish: Option<&str>,
        usage: Option<Usage>,
    ) -> ProviderStreamChunk {
        ProviderStreamChunk::new(
            "req-1",
            1,
            "deepseek-chat",
            "deepseek",
            vec![StreamChoice {
                index: 0,
                delta: Delta {
                    role: Some("assistant".to_string()),
                    content: content.map(|s| s.to_string()),
                    reasoning: None,
                    tool_calls,
                },
                finish_reason: finish.map(|s| s.to_string()),
            }],
            usage,
        )
    }

    #[test]
    fn accumulator_appends_fragments_by_index() {
        let mut acc = ToolCallAccumulator::default();
        acc.update(&ToolCall {
            id: Some("call_1".to_string()),
            kind: Some(ToolKind::Function),
            function: Some(FunctionCall {
                name: Some("get_weather".to_string()),
                arguments: Some("{\"loc".to_string()),
            }),
            index: Some(0),
        });
        acc.update(&ToolCall {
            id: None,
            kind: None,
            function: Some(FunctionCall {
                name: None,
                arguments: Some("ation\":\"Paris\"}".to_string()),
            }),
            index: Some(0),
        });
        let calls = acc.into_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].function.as_ref().unwrap().arguments.as_deref(),
            Some(r#"{"location":"Paris"}"#)
        );
        assert_eq!(
            calls[0].function.as_ref().unwrap().name.as_deref(),
            Some("get_weather")
        );
    }

    #[test]
    fn assembled_response_joins_deltas_first_finish_wins() {
        let mut ctx = test_context(r#"{"model":"m","messages":[{"role":"user","content":"x"}]}"#);
        ctx.generation_id = Some("gen_test".to_string());
        let chunks = vec![
            chunk(Some("Hel"), None, None, None),
            chunk(Some("lo"), None, Some("stop"), None),
            chunk(None, None, Some("length"), Some(Usage {
                prompt_tokens: 3,
                completion_tokens: 2,
                total_tokens: 5,
                ..Default::default()
            })),
        ];
        for c in &chunks {
            CompletionHandler::observe(&mut ctx, c);
        }
        let response = CompletionHandler::assemble_response(&ctx, &chunks);
        let choice = &response.choices[0];
        assert_eq!(choice.message.content.as_deref(), Some("Hello"));
        assert_eq!(choice.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.id, "gen_test");
        assert_eq!(response.model, "deepseek/deepseek-chat");
        // include_usage is false: details are stripped but counts remain.
        assert_eq!(response.usage.as_ref().unwrap().total_tokens, 5);
        assert_eq!(response.object, OBJECT_CHAT_COMPLETION);
    }

    #[test]
    fn observe_tracks_two_phase_termination() {
        let mut ctx = test_context(r#"{"model":"m","messages":[{"role":"user","content":"x"}]}"#);
        assert!(!CompletionHandler::observe(&mut ctx, &chunk(Some("x"), None, None, None)));
        assert!(!CompletionHandler::observe(&mut ctx, &chunk(None, None, Some("stop"), None)));
        assert!(ctx.finish_seen);
        assert!(CompletionHandler::observe(
            &mut ctx,
            &chunk(None, None, None, Some(Usage::default()))
        ));
        assert_eq!(ctx.stream_finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn gateway_dialect_carries_provider_and_native_reason() {
        let mut ctx = test_context(r#"{"model":"m","messages":[{"role":"user","content":"x"}]}"#);
        ctx.generation_id = Some("gen_x".to_string());
        let rc = CompletionHandler::stream_chunk(&ctx, &chunk(None, None, Some("stop"), None), None);
        assert_eq!(rc.provider.as_deref(), Some("deepseek"));
        assert_eq!(rc.choices[0].native_finish_reason.as_deref(), Some("stop"));
        assert_eq!(rc.object, OBJECT_CHAT_COMPLETION_CHUNK);
    }
}
