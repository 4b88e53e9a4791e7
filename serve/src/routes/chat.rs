//! Chat-completions endpoint (OpenAI / LLM-Gateway dialects) and the shared
//! pipeline entry used by the other dialect adapters.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use weft::chain::{ChatContext, HandlerChain};
use weft::dialect::{ChatCompletionRequest, Dialect, RouterArtifact, RouterResponse};
use weft::{ChatCompletionService, GatewayError};

use crate::app::AppState;
use crate::error::ApiError;
use crate::identity::{extract_identity, Identity};
use crate::request_id::RequestId;
use crate::sse;

/// Result of driving the pipeline once.
pub(crate) enum ChatOutcome {
    Response(RouterResponse),
    Stream(ReceiverStream<Result<RouterArtifact, GatewayError>>),
}

/// Resolve the model, build the context, and run the chain.
///
/// Non-streaming requests are drained here; streaming requests hand the
/// artifact stream back for dialect-specific reshaping.
pub(crate) async fn run_chat(
    state: &AppState,
    identity: Identity,
    request_id: String,
    request: ChatCompletionRequest,
) -> Result<ChatOutcome, GatewayError> {
    let dialect = if state.settings.enable_openai_compatible_api {
        Dialect::OpenAi
    } else {
        Dialect::Gateway
    };

    let (provider, model) = state.catalog.bind(&request.model).await?;
    info!(
        request_id = %request_id,
        model = %model.external_id(),
        provider = %model.provider_id,
        stream = request.stream,
        "processing chat completion request"
    );

    let is_stream = request.stream;
    let ctx = ChatContext::new(
        request,
        dialect,
        identity.api_key,
        identity.user_id,
        request_id.clone(),
        identity.origin,
        model,
    );
    let chain = Arc::new(HandlerChain::standard(state.billing.clone()));
    let service = ChatCompletionService::new(provider, chain);
    let mut stream = service.create_chat_completion(ctx);

    if is_stream {
        return Ok(ChatOutcome::Stream(stream));
    }

    let mut response = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(RouterArtifact::Response(r)) => response = Some(r),
            Ok(RouterArtifact::Chunk(_)) => {}
            Err(e) => return Err(e),
        }
    }
    response.map(ChatOutcome::Response).ok_or_else(|| {
        GatewayError::new(
            500,
            "No response from service",
            serde_json::json!({ "error": "Service did not yield any response" }),
        )
    })
}

/// Turn the artifact stream into an SSE response.
///
/// The first item is awaited before committing to a 200: an error there
/// (bad request, insufficient funds, upstream 4xx) still gets a proper
/// status. Errors after the first chunk become an SSE error frame followed
/// by `[DONE]`.
pub(crate) async fn sse_from_artifacts(
    mut stream: ReceiverStream<Result<RouterArtifact, GatewayError>>,
    request_id: String,
) -> Response {
    let first = match stream.next().await {
        Some(Err(e)) => return ApiError(e).into_response(),
        other => other,
    };

    let body_stream = async_stream::stream! {
        let mut pending = first;
        loop {
            let item = match pending.take() {
                Some(item) => item,
                None => match stream.next().await {
                    Some(item) => item,
                    None => break,
                },
            };
            match item {
                Ok(RouterArtifact::Chunk(chunk)) => {
                    match serde_json::to_value(&chunk) {
                        Ok(value) => yield Ok::<_, std::convert::Infallible>(sse::data_frame(&value)),
                        Err(e) => {
                            error!(request_id = %request_id, error = %e, "failed to serialize chunk");
                            continue;
                        }
                    }
                }
                // Non-streaming artifacts do not appear on this path.
                Ok(RouterArtifact::Response(_)) => continue,
                Err(e) => {
                    error!(
                        request_id = %request_id,
                        code = e.code,
                        error = %e,
                        "provider error during streaming"
                    );
                    yield Ok(sse::data_frame(&e.to_stream_body()));
                    yield Ok(sse::done_frame());
                    return;
                }
            }
        }
        yield Ok(sse::done_frame());
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| ApiError(GatewayError::internal("Stream setup failed", "")).into_response())
}

/// `POST /v1/chat/completions` (or `/api/v1/chat/completions`).
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    let identity = extract_identity(&headers, &state.settings)?;

    match run_chat(&state, identity, request_id.clone(), request).await? {
        ChatOutcome::Response(response) => Ok(Json(response).into_response()),
        ChatOutcome::Stream(stream) => Ok(sse_from_artifacts(stream, request_id).await),
    }
}
