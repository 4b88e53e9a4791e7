//! Per-request context threaded through the handler chain.

use std::collections::HashMap;
use std::time::Instant;

use crate::billing::{Currency, TokenCount};
use crate::catalog::ProviderModel;
use crate::dialect::{ChatCompletionRequest, Dialect, RouterArtifact};
use crate::request::ProviderRequest;
use crate::response::Usage;

/// Mutable state of one chat-completion request.
///
/// Created by the HTTP surface, mutated by every chain stage, dropped when
/// the response (or stream) ends.
pub struct ChatContext {
    /// Caller's original request, untouched after acceptance.
    pub request: ChatCompletionRequest,
    pub dialect: Dialect,
    pub api_key: String,
    /// Caller identity, for logging and billing meta only.
    pub user_id: Option<String>,
    pub origin: String,
    pub request_id: String,
    /// Model binding resolved before the chain runs. `external_model_id`
    /// carries the caller's id verbatim.
    pub provider_model: ProviderModel,
    /// Hold transaction id when billing is on; `gen_<uuid>` otherwise.
    pub generation_id: Option<String>,
    pub include_usage: bool,
    /// Set when a content part carries `cache_control`.
    pub cache_write: bool,
    /// Filled by the transform stage.
    pub provider_request: Option<ProviderRequest>,
    /// Pessimistic pre-hold estimate from the tokenize stage.
    pub expected_tokens: Option<TokenCount>,
    /// Amount held by billing; `Some(0.0)` marks a free model.
    pub on_hold: Option<f64>,
    pub currency: Option<Currency>,
    /// Richest usage seen in any chunk, unfiltered, for billing.
    pub native_usage: Option<Usage>,
    /// Terminal chunk (streaming) or assembled response (non-streaming).
    pub final_response: Option<RouterArtifact>,
    /// Assistant text accumulated across the stream, for audit.
    pub accumulated_response: Option<String>,
    /// First finish_reason observed in the stream.
    pub stream_finish_reason: Option<String>,
    /// Terminal-chunk detector state: a finish_reason has been seen.
    pub finish_seen: bool,
    pub start_time: Option<Instant>,
    pub metadata: HashMap<String, String>,
}

impl ChatContext {
    pub fn new(
        request: ChatCompletionRequest,
        dialect: Dialect,
        api_key: String,
        user_id: Option<String>,
        request_id: String,
        origin: String,
        provider_model: ProviderModel,
    ) -> Self {
        let metadata = HashMap::from([("origin".to_string(), origin.clone())]);
        ChatContext {
            request,
            dialect,
            api_key,
            user_id,
            origin,
            request_id,
            provider_model,
            generation_id: None,
            include_usage: false,
            cache_write: false,
            provider_request: None,
            expected_tokens: None,
            on_hold: None,
            currency: None,
            native_usage: None,
            final_response: None,
            accumulated_response: None,
            stream_finish_reason: None,
            finish_seen: false,
            start_time: None,
            metadata,
        }
    }

    /// Caller-visible model id for responses and billing keys.
    pub fn external_model_id(&self) -> &str {
        self.provider_model.external_id()
    }

    /// Append streamed assistant text for the audit trail.
    pub fn accumulate(&mut self, text: &str) {
        match &mut self.accumulated_response {
            Some(acc) => acc.push_str(text),
            None => self.accumulated_response = Some(text.to_string()),
        }
    }
}
