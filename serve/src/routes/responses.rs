//! OpenAI Responses API adapter.
//!
//! Input items (messages, `function_call`, `function_call_output`) are
//! normalized into the internal chat shape; the result is reshaped into a
//! Responses object, or into the Responses event stream with the exact event
//! names `response.created`, `response.in_progress`,
//! `response.output_item.added`, `response.output_text.delta`,
//! `response.output_text.done`, `response.output_item.done`,
//! `response.completed`, terminated by `data: [DONE]`.

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};
use uuid::Uuid;

use weft::dialect::{ChatCompletionRequest, RouterArtifact, RouterResponse};
use weft::message::ChatMessage;
use weft::reasoning::ReasoningEffort;
use weft::response::Usage;
use weft::tools::{Tool, ToolCall, ToolChoice, ToolFunction, ToolKind};
use weft::GatewayError;

use super::chat::{run_chat, ChatOutcome};
use crate::app::AppState;
use crate::error::ApiError;
use crate::identity::extract_identity;
use crate::request_id::RequestId;
use crate::sse;

#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesReasoningConfig {
    pub effort: Option<ReasoningEffort>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInputContent {
    Text(String),
    Parts(Vec<ResponsesInputTextPart>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesInputTextPart {
    #[serde(rename = "type", default)]
    pub part_type: Option<String>,
    pub text: String,
}

impl ResponsesInputContent {
    fn as_text(&self) -> String {
        match self {
            ResponsesInputContent::Text(s) => s.clone(),
            ResponsesInputContent::Parts(parts) => {
                parts.iter().map(|p| p.text.as_str()).collect()
            }
        }
    }
}

/// One item of the Responses `input` list.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ResponsesTypedItem {
    #[serde(rename = "function_call")]
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: Value },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInputItem {
    Typed(ResponsesTypedItem),
    Message {
        role: String,
        content: ResponsesInputContent,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    Text(String),
    Item(Box<ResponsesInputItem>),
    Items(Vec<ResponsesInputItem>),
}

/// Responses tools come either flat (`{type, name, parameters}`) or already
/// chat-shaped (`{type, function: {...}}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesTool {
    Chat(Tool),
    Flat {
        #[serde(rename = "type")]
        kind: ToolKind,
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        parameters: Option<Value>,
    },
}

impl ResponsesTool {
    fn into_chat_tool(self) -> Tool {
        match self {
            ResponsesTool::Chat(tool) => tool,
            ResponsesTool::Flat {
                kind,
                name,
                description,
                parameters,
            } => Tool {
                kind,
                function: ToolFunction {
                    name,
                    description,
                    parameters,
                },
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: ResponsesInput,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Option<Vec<ResponsesTool>>,
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub reasoning: Option<ResponsesReasoningConfig>,
}

/// Usage reshaped into the Responses spelling.
#[derive(Debug, Clone, Serialize)]
struct ResponsesUsage {
    input_tokens: u32,
    output_tokens: u32,
    total_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_tokens_details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_tokens_details: Option<Value>,
}

fn usage_payload(usage: &Usage) -> ResponsesUsage {
    let cached = usage
        .prompt_tokens_details
        .as_ref()
        .and_then(|d| d.cached_tokens);
    let reasoning = usage
        .completion_tokens_details
        .as_ref()
        .and_then(|d| d.reasoning_tokens);
    ResponsesUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        input_tokens_details: cached.map(|c| json!({ "cached_tokens": c })),
        output_tokens_details: reasoning.map(|r| json!({ "reasoning_tokens": r })),
    }
}

/// Tool outputs are forwarded as JSON object payloads.
fn normalize_tool_output(output: &Value) -> String {
    let parsed = match output {
        Value::String(s) => serde_json::from_str::<Value>(s).unwrap_or(Value::String(s.clone())),
        other => other.clone(),
    };
    let payload = if parsed.is_object() {
        parsed
    } else {
        json!({ "output": parsed })
    };
    payload.to_string()
}

/// Build the internal message list from the Responses input.
fn build_messages(request: &ResponsesRequest) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = Vec::new();

    if let Some(instructions) = &request.instructions {
        messages.push(ChatMessage::system(instructions.clone()));
    }

    let items: Vec<ResponsesInputItem> = match &request.input {
        ResponsesInput::Text(text) => {
            messages.push(ChatMessage::user(text.clone()));
            return merge_system_messages(messages);
        }
        ResponsesInput::Item(item) => vec![(**item).clone()],
        ResponsesInput::Items(items) => items.clone(),
    };

    // Resolve function names for outputs from their matching call items.
    let mut call_id_to_name: HashMap<String, String> = HashMap::new();
    for item in &items {
        if let ResponsesInputItem::Typed(ResponsesTypedItem::FunctionCall { call_id, name, .. }) =
            item
        {
            call_id_to_name.insert(call_id.clone(), name.clone());
        }
    }

    for item in items {
        match item {
            ResponsesInputItem::Typed(ResponsesTypedItem::FunctionCall {
                call_id,
                name,
                arguments,
            }) => {
                messages.push(ChatMessage::Assistant {
                    content: None,
                    reasoning: None,
                    refusal: None,
                    tool_calls: Some(vec![ToolCall::function(call_id, name, arguments)]),
                    name: None,
                });
            }
            ResponsesInputItem::Typed(ResponsesTypedItem::FunctionCallOutput {
                call_id,
                output,
            }) => {
                messages.push(ChatMessage::Tool {
                    content: normalize_tool_output(&output),
                    name: call_id_to_name.get(&call_id).cloned(),
                    tool_call_id: call_id,
                });
            }
            ResponsesInputItem::Message { role, content } => {
                let text = content.as_text();
                // `developer` is the Responses spelling of `system`.
                match role.as_str() {
                    "system" | "developer" => messages.push(ChatMessage::system(text)),
                    "assistant" => messages.push(ChatMessage::Assistant {
                        content: Some(text),
                        reasoning: None,
                        refusal: None,
                        tool_calls: None,
                        name: None,
                    }),
                    _ => messages.push(ChatMessage::user(text)),
                }
            }
        }
    }

    merge_system_messages(messages)
}

/// Collapse all system messages into one turn at the position of the first.
fn merge_system_messages(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut merged = Vec::with_capacity(messages.len());
    let mut system_parts = Vec::new();
    let mut first_system_index = None;

    for msg in messages {
        if let ChatMessage::System { content, .. } = &msg {
            if first_system_index.is_none() {
                first_system_index = Some(merged.len());
            }
            let text = content.as_text();
            if !text.is_empty() {
                system_parts.push(text);
            }
            continue;
        }
        merged.push(msg);
    }

    if let Some(index) = first_system_index {
        merged.insert(index, ChatMessage::system(system_parts.join("\n\n")));
    }
    merged
}

fn to_chat_request(request: &ResponsesRequest) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: request.model.clone(),
        messages: Some(build_messages(request)),
        prompt: None,
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: request.max_output_tokens,
        max_completion_tokens: None,
        stream: request.stream,
        stop: None,
        frequency_penalty: None,
        presence_penalty: None,
        repetition_penalty: None,
        tools: request
            .tools
            .clone()
            .map(|tools| tools.into_iter().map(ResponsesTool::into_chat_tool).collect()),
        tool_choice: request.tool_choice.clone(),
        reasoning: request
            .reasoning
            .as_ref()
            .and_then(|r| r.effort)
            .map(weft::reasoning::ReasoningConfig::with_effort),
        reasoning_effort: None,
        usage: None,
        transforms: None,
        response_format: None,
        user: None,
        n: None,
    }
}

/// Envelope for both the final response and the stream bookkeeping events.
fn response_envelope(
    request: &ResponsesRequest,
    response_id: &str,
    created_at: i64,
    status: &str,
    output: Vec<Value>,
    usage: Option<&ResponsesUsage>,
    output_text: Option<&str>,
) -> Value {
    json!({
        "id": response_id,
        "object": "response",
        "created_at": created_at,
        "status": status,
        "model": request.model,
        "output": output,
        "usage": usage.map(|u| serde_json::to_value(u).unwrap_or(Value::Null)),
        "error": Value::Null,
        "incomplete_details": Value::Null,
        "instructions": request.instructions,
        "max_output_tokens": request.max_output_tokens,
        "temperature": request.temperature,
        "top_p": request.top_p,
        "parallel_tool_calls": true,
        "tools": request.tools,
        "tool_choice": request.tool_choice,
        "output_text": output_text.filter(|t| !t.is_empty()),
    })
}

fn message_item(item_id: &str, status: &str, text: &str) -> Value {
    json!({
        "id": item_id,
        "type": "message",
        "status": status,
        "role": "assistant",
        "content": [{ "type": "output_text", "text": text, "annotations": [] }],
    })
}

fn function_call_item(call_id: &str, name: &str, arguments: &str) -> Value {
    json!({
        "id": format!("fc_{call_id}"),
        "type": "function_call",
        "call_id": call_id,
        "name": name,
        "arguments": arguments,
        "status": "completed",
    })
}

/// Map the assembled chat response into a Responses object.
fn map_to_responses_response(
    request: &ResponsesRequest,
    response: &RouterResponse,
    response_id: &str,
    item_id: &str,
) -> Value {
    let mut output = Vec::new();
    let mut output_text = String::new();

    if let Some(choice) = response.choices.first() {
        if let Some(content) = &choice.message.content {
            output_text = content.clone();
        }
        output.push(message_item(item_id, "completed", &output_text));

        if let Some(tool_calls) = &choice.message.tool_calls {
            for (idx, call) in tool_calls.iter().enumerate() {
                let name = call.function.as_ref().and_then(|f| f.name.clone());
                let name = match name {
                    Some(name) if !name.is_empty() => name,
                    _ => continue,
                };
                let call_id = call.id.clone().unwrap_or_else(|| format!("call_{idx}"));
                let arguments = call
                    .function
                    .as_ref()
                    .and_then(|f| f.arguments.clone())
                    .unwrap_or_default();
                output.push(function_call_item(&call_id, &name, &arguments));
            }
        }
    }

    let usage = response.usage.as_ref().map(usage_payload);
    response_envelope(
        request,
        response_id,
        response.created,
        "completed",
        output,
        usage.as_ref(),
        Some(&output_text),
    )
}

/// Tool-call fragments buffered until finish_reason.
///
/// Providers stream function arguments token-by-token over the chat wire;
/// completed `function_call` items are emitted only once a finish_reason is
/// seen, instead of native `arguments.delta` events.
#[derive(Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    emitted: bool,
}

fn reshape_stream(
    mut stream: ReceiverStream<Result<RouterArtifact, GatewayError>>,
    first: Option<Result<RouterArtifact, GatewayError>>,
    request: ResponsesRequest,
) -> impl futures::Stream<Item = Result<bytes::Bytes, std::convert::Infallible>> {
    async_stream::stream! {
        let response_id = format!("resp_{}", Uuid::new_v4().simple());
        let item_id = format!("msg_{}", Uuid::new_v4().simple());
        let created_at = weft::response::now_unix();
        let mut aggregated_text = String::new();
        let mut usage: Option<ResponsesUsage> = None;
        let mut extra_items: Vec<Value> = Vec::new();
        // Keyed by tool-call index (or id when no index is present).
        let mut pending_tool_calls: HashMap<String, PendingToolCall> = HashMap::new();
        let mut pending_order: Vec<String> = Vec::new();

        let created = response_envelope(
            &request, &response_id, created_at, "in_progress", vec![], None, None,
        );
        yield Ok(sse::event_frame(
            "response.created",
            &json!({ "type": "response.created", "response": created }),
        ));
        yield Ok(sse::event_frame(
            "response.in_progress",
            &json!({ "type": "response.in_progress", "response": created }),
        ));
        yield Ok(sse::event_frame(
            "response.output_item.added",
            &json!({
                "type": "response.output_item.added",
                "output_index": 0,
                "item": message_item(&item_id, "in_progress", ""),
            }),
        ));

        let mut pending = first;
        let mut finished = false;
        loop {
            let item = match pending.take() {
                Some(item) => item,
                None => match stream.next().await {
                    Some(item) => item,
                    None => break,
                },
            };
            let chunk = match item {
                Ok(RouterArtifact::Chunk(chunk)) => chunk,
                Ok(RouterArtifact::Response(_)) => continue,
                Err(e) => {
                    error!(code = e.code, error = %e, "provider error during responses stream");
                    yield Ok(sse::data_frame(&e.to_stream_body()));
                    yield Ok(sse::done_frame());
                    return;
                }
            };

            if let Some(chunk_usage) = &chunk.usage {
                usage = Some(usage_payload(chunk_usage));
            }

            let mut finish_seen = false;
            for choice in &chunk.choices {
                if choice.finish_reason.is_some() {
                    finish_seen = true;
                }
                if let Some(tool_calls) = &choice.delta.tool_calls {
                    for call in tool_calls {
                        let key = match call.index {
                            Some(index) => format!("idx:{index}"),
                            None => format!(
                                "id:{}",
                                call.id.clone().unwrap_or_else(|| pending_tool_calls.len().to_string())
                            ),
                        };
                        if !pending_tool_calls.contains_key(&key) {
                            pending_order.push(key.clone());
                        }
                        let pending_call = pending_tool_calls.entry(key).or_default();
                        if let Some(id) = &call.id {
                            pending_call.id = Some(id.clone());
                        }
                        if let Some(function) = &call.function {
                            if let Some(name) = &function.name {
                                pending_call.name = Some(name.clone());
                            }
                            if let Some(arguments) = &function.arguments {
                                pending_call.arguments.push_str(arguments);
                            }
                        }
                    }
                }
                if let Some(delta_text) = &choice.delta.content {
                    if !delta_text.is_empty() {
                        aggregated_text.push_str(delta_text);
                        yield Ok(sse::event_frame(
                            "response.output_text.delta",
                            &json!({
                                "type": "response.output_text.delta",
                                "output_index": 0,
                                "item_id": item_id,
                                "content_index": 0,
                                "delta": delta_text,
                            }),
                        ));
                    }
                }
            }

            if finish_seen {
                // Flush buffered tool calls as completed function_call items.
                for key in &pending_order {
                    let pending_call = match pending_tool_calls.get_mut(key) {
                        Some(p) if !p.emitted => p,
                        _ => continue,
                    };
                    let name = match &pending_call.name {
                        Some(name) => name.clone(),
                        None => continue,
                    };
                    let call_id = pending_call
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("call_{}", extra_items.len()));
                    let call_item = function_call_item(&call_id, &name, &pending_call.arguments);
                    pending_call.emitted = true;
                    extra_items.push(call_item.clone());
                    let output_index = extra_items.len();
                    yield Ok(sse::event_frame(
                        "response.output_item.added",
                        &json!({
                            "type": "response.output_item.added",
                            "output_index": output_index,
                            "item": call_item,
                        }),
                    ));
                    yield Ok(sse::event_frame(
                        "response.output_item.done",
                        &json!({
                            "type": "response.output_item.done",
                            "output_index": output_index,
                            "item": call_item,
                        }),
                    ));
                }
                finished = true;
                break;
            }
        }

        if finished || !aggregated_text.is_empty() || usage.is_some() {
            let final_item = message_item(&item_id, "completed", &aggregated_text);
            let mut output = vec![final_item.clone()];
            output.extend(extra_items.clone());
            let completed = response_envelope(
                &request,
                &response_id,
                created_at,
                "completed",
                output,
                usage.as_ref(),
                Some(&aggregated_text),
            );
            yield Ok(sse::event_frame(
                "response.output_text.done",
                &json!({
                    "type": "response.output_text.done",
                    "output_index": 0,
                    "item_id": item_id,
                    "content_index": 0,
                    "text": aggregated_text,
                }),
            ));
            yield Ok(sse::event_frame(
                "response.output_item.done",
                &json!({
                    "type": "response.output_item.done",
                    "output_index": 0,
                    "item": final_item,
                }),
            ));
            yield Ok(sse::event_frame(
                "response.completed",
                &json!({ "type": "response.completed", "response": completed }),
            ));
        }
        yield Ok(sse::done_frame());
    }
}

/// `POST /v1/responses` (or `/api/v1/responses`).
pub async fn create_response(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    Json(request): Json<ResponsesRequest>,
) -> Result<Response, ApiError> {
    let identity = extract_identity(&headers, &state.settings)?;
    debug!(
        request_id = %request_id,
        model = %request.model,
        stream = request.stream,
        "received responses request"
    );

    let chat_request = to_chat_request(&request);
    match run_chat(&state, identity, request_id, chat_request).await? {
        ChatOutcome::Response(response) => {
            let response_id = format!("resp_{}", Uuid::new_v4().simple());
            let item_id = format!("msg_{}", Uuid::new_v4().simple());
            let mapped = map_to_responses_response(&request, &response, &response_id, &item_id);
            Ok(Json(mapped).into_response())
        }
        ChatOutcome::Stream(mut stream) => {
            // An error before the first chunk still gets a proper status.
            let first = match stream.next().await {
                Some(Err(e)) => return Err(ApiError(e)),
                other => other,
            };
            let body = reshape_stream(stream, first, request);
            Ok(Response::builder()
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .body(Body::from_stream(body))
                .unwrap_or_else(|_| {
                    ApiError(GatewayError::internal("Stream setup failed", "")).into_response()
                }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_from(input: Value) -> ResponsesRequest {
        serde_json::from_value(json!({ "model": "deepseek/deepseek-chat", "input": input }))
            .unwrap()
    }

    #[test]
    fn string_input_becomes_single_user_message() {
        let request = request_from(json!("Compute 2+2"));
        let messages = build_messages(&request);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role(), "user");
        assert_eq!(messages[0].content_text().as_deref(), Some("Compute 2+2"));
    }

    #[test]
    fn instructions_become_leading_system_message() {
        let mut request = request_from(json!("hi"));
        request.instructions = Some("be brief".to_string());
        let messages = build_messages(&request);
        assert_eq!(messages[0].role(), "system");
        assert_eq!(messages[0].content_text().as_deref(), Some("be brief"));
        assert_eq!(messages[1].role(), "user");
    }

    #[test]
    fn multiple_system_messages_merge_at_first_position() {
        let request = request_from(json!([
            { "role": "system", "content": "one" },
            { "role": "user", "content": "hi" },
            { "role": "developer", "content": "two" }
        ]));
        let messages = build_messages(&request);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role(), "system");
        assert_eq!(messages[0].content_text().as_deref(), Some("one\n\ntwo"));
    }

    #[test]
    fn function_call_items_map_to_tool_messages() {
        let request = request_from(json!([
            { "role": "user", "content": "weather?" },
            { "type": "function_call", "call_id": "call_1", "name": "get_weather",
              "arguments": "{\"city\":\"Paris\"}" },
            { "type": "function_call_output", "call_id": "call_1", "output": "{\"temp\": 20}" }
        ]));
        let messages = build_messages(&request);
        assert_eq!(messages.len(), 3);
        let calls = messages[1].tool_calls().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("call_1"));
        match &messages[2] {
            ChatMessage::Tool {
                tool_call_id, name, content,
            } => {
                assert_eq!(tool_call_id, "call_1");
                assert_eq!(name.as_deref(), Some("get_weather"));
                assert_eq!(content, "{\"temp\": 20}");
            }
            other => panic!("expected tool message, got {other:?}"),
        }
    }

    #[test]
    fn non_object_tool_output_is_wrapped() {
        assert_eq!(normalize_tool_output(&json!("42")), r#"{"output":42}"#);
        assert_eq!(
            normalize_tool_output(&json!({"a": 1})),
            r#"{"a":1}"#
        );
        assert_eq!(
            normalize_tool_output(&json!("plain text")),
            r#"{"output":"plain text"}"#
        );
    }

    #[test]
    fn flat_tools_are_normalized_to_chat_shape() {
        let request: ResponsesRequest = serde_json::from_value(json!({
            "model": "m",
            "input": "hi",
            "tools": [{ "type": "function", "name": "calc", "parameters": {"type": "object"} }]
        }))
        .unwrap();
        let chat = to_chat_request(&request);
        let tools = chat.tools.unwrap();
        assert_eq!(tools[0].function.name, "calc");
    }

    #[test]
    fn non_stream_mapping_emits_message_and_function_items() {
        let request = request_from(json!("hi"));
        let response: RouterResponse = serde_json::from_value(json!({
            "id": "gen_1", "object": "chat.completion", "created": 5,
            "model": "deepseek/deepseek-chat", "system_fingerprint": null,
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant", "content": "4",
                    "tool_calls": [{"id": "call_9", "type": "function",
                                    "function": {"name": "calculator", "arguments": "{\"x\":4}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 7, "completion_tokens": 1, "total_tokens": 8}
        }))
        .unwrap();
        let mapped = map_to_responses_response(&request, &response, "resp_x", "msg_x");
        assert_eq!(mapped["status"], "completed");
        assert_eq!(mapped["output"][0]["type"], "message");
        assert_eq!(mapped["output"][1]["type"], "function_call");
        assert_eq!(mapped["output"][1]["call_id"], "call_9");
        assert_eq!(mapped["output_text"], "4");
        assert_eq!(mapped["usage"]["input_tokens"], 7);
    }
}
