//! GigaChat-compatible completions endpoints (Chat API v1 and v2).
//!
//! v1 carries a per-message `function_call`; v2 carries content items with
//! `function_call` / `function_result`. Both map onto the internal chat
//! shape; on the way out `tool_calls` becomes `function_call` and reasoning
//! text is surfaced as a separate v2 `reasoning` role message.

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};
use uuid::Uuid;

use weft::dialect::{ChatCompletionRequest, RouterArtifact, RouterResponse, RouterStreamChunk};
use weft::reasoning::{ReasoningConfig, ReasoningEffort};
use weft::response::{ResponseMessage, Usage};
use weft::tools::ToolCall;
use weft::GatewayError;

use super::chat::{run_chat, ChatOutcome};
use crate::app::AppState;
use crate::error::ApiError;
use crate::identity::extract_identity;
use crate::request_id::RequestId;
use crate::sse;

#[derive(Debug, Clone, Deserialize)]
pub struct GigaChatFunctionCallV1 {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GigaChatExplicitCall {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GigaChatMessageV1 {
    pub role: String,
    #[serde(default)]
    pub content: String,
    /// Set on `function` role messages: the tool that produced the result.
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub function_call: Option<GigaChatFunctionCallV1>,
    /// Explicit tool choice rides on a message.
    #[serde(default)]
    pub call: Option<GigaChatExplicitCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GigaChatFunctionDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema, serialized as a string in the gRPC contract but accepted
    /// as an object too.
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GigaChatOptionsV1 {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: Option<bool>,
    /// `off` is accepted and ignored.
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GigaChatRequestV1 {
    pub model: String,
    pub messages: Vec<GigaChatMessageV1>,
    #[serde(default)]
    pub functions: Vec<GigaChatFunctionDef>,
    #[serde(default)]
    pub options: GigaChatOptionsV1,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GigaChatContentV2 {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub function_call: Option<GigaChatFunctionCallV1>,
    #[serde(default)]
    pub function_result: Option<GigaChatFunctionResultV2>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GigaChatFunctionResultV2 {
    pub name: String,
    #[serde(default)]
    pub result: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GigaChatMessageV2 {
    pub role: String,
    #[serde(default)]
    pub content: Vec<GigaChatContentV2>,
    #[serde(default)]
    pub call: Option<GigaChatExplicitCall>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GigaChatReasoningV2 {
    #[serde(default)]
    pub effort: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GigaChatOptionsV2 {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub reasoning: Option<GigaChatReasoningV2>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GigaChatRequestV2 {
    pub model: String,
    pub messages: Vec<GigaChatMessageV2>,
    #[serde(default)]
    pub functions: Vec<GigaChatFunctionDef>,
    #[serde(default)]
    pub options: GigaChatOptionsV2,
}

/// `tool_calls` goes back out as `function_call`; absent means `stop`.
fn map_finish_reason(finish_reason: Option<&str>) -> String {
    match finish_reason {
        Some("tool_calls") => "function_call".to_string(),
        Some(reason) => reason.to_string(),
        None => "stop".to_string(),
    }
}

fn parse_effort(effort: Option<&str>) -> Option<ReasoningEffort> {
    match effort {
        Some("low") => Some(ReasoningEffort::Low),
        Some("medium") => Some(ReasoningEffort::Medium),
        Some("high") => Some(ReasoningEffort::High),
        // `off` and unknown values are ignored.
        _ => None,
    }
}

fn function_parameters(parameters: &Value) -> Value {
    match parameters {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or(json!({})),
        Value::Object(_) => parameters.clone(),
        _ => json!({}),
    }
}

fn map_functions_to_tools(functions: &[GigaChatFunctionDef]) -> Option<Vec<weft::tools::Tool>> {
    if functions.is_empty() {
        return None;
    }
    let tools = functions
        .iter()
        .filter_map(|f| {
            serde_json::from_value(json!({
                "type": "function",
                "function": {
                    "name": f.name,
                    "description": f.description,
                    "parameters": function_parameters(&f.parameters),
                }
            }))
            .ok()
        })
        .collect();
    Some(tools)
}

fn explicit_tool_choice(call: Option<&GigaChatExplicitCall>) -> Option<weft::tools::ToolChoice> {
    let call = call?;
    serde_json::from_value(json!({
        "type": "function",
        "function": { "name": call.name }
    }))
    .ok()
}

fn base_chat_request(model: &str) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.to_string(),
        messages: None,
        prompt: None,
        temperature: None,
        top_p: None,
        max_tokens: None,
        max_completion_tokens: None,
        stream: false,
        stop: None,
        frequency_penalty: None,
        presence_penalty: None,
        repetition_penalty: None,
        tools: None,
        tool_choice: None,
        reasoning: None,
        reasoning_effort: None,
        usage: None,
        transforms: None,
        response_format: None,
        user: None,
        n: None,
    }
}

fn arguments_string(arguments: &Value) -> String {
    match arguments {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn map_v1_messages(messages: &[GigaChatMessageV1]) -> Vec<Value> {
    let mut internal = Vec::new();
    let mut call_id_by_name: HashMap<String, String> = HashMap::new();

    for msg in messages {
        match msg.role.as_str() {
            "system" | "user" => {
                internal.push(json!({ "role": msg.role, "content": msg.content }));
            }
            "assistant" => match &msg.function_call {
                Some(call) => {
                    let call_id = format!("call_{}", Uuid::new_v4().simple());
                    call_id_by_name.insert(call.name.clone(), call_id.clone());
                    internal.push(json!({
                        "role": "assistant",
                        "content": Value::Null,
                        "tool_calls": [{
                            "id": call_id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": arguments_string(&call.arguments),
                            },
                        }],
                    }));
                }
                None => {
                    internal.push(json!({ "role": "assistant", "content": msg.content }));
                }
            },
            "function" => {
                let call_id = msg
                    .function_name
                    .as_ref()
                    .and_then(|name| call_id_by_name.get(name).cloned())
                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
                internal.push(json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "name": msg.function_name,
                    "content": msg.content,
                }));
            }
            // Unknown roles are kept, routed as user content.
            _ => internal.push(json!({ "role": "user", "content": msg.content })),
        }
    }
    internal
}

fn map_v2_messages(messages: &[GigaChatMessageV2]) -> Vec<Value> {
    let mut internal = Vec::new();
    let mut call_id_by_name: HashMap<String, String> = HashMap::new();

    for msg in messages {
        let combined_text: String = msg
            .content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect();
        let mapped_role = match msg.role.as_str() {
            "system" | "user" | "assistant" => msg.role.as_str(),
            "reasoning" => "assistant",
            _ => "user",
        };
        if !combined_text.is_empty() {
            internal.push(json!({ "role": mapped_role, "content": combined_text }));
        }

        for item in &msg.content {
            if let Some(call) = &item.function_call {
                let call_id = format!("call_{}", Uuid::new_v4().simple());
                call_id_by_name.insert(call.name.clone(), call_id.clone());
                internal.push(json!({
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{
                        "id": call_id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": arguments_string(&call.arguments),
                        },
                    }],
                }));
            }
            if let Some(result) = &item.function_result {
                let call_id = call_id_by_name
                    .get(&result.name)
                    .cloned()
                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
                internal.push(json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "name": result.name,
                    "content": result.result,
                }));
            }
        }
    }
    internal
}

fn parse_messages(values: Vec<Value>) -> Result<Vec<weft::message::ChatMessage>, GatewayError> {
    serde_json::from_value(Value::Array(values)).map_err(|e| {
        GatewayError::bad_request("Invalid message format", e.to_string())
    })
}

fn map_v1_to_chat_request(
    request: &GigaChatRequestV1,
) -> Result<ChatCompletionRequest, GatewayError> {
    let mut chat = base_chat_request(&request.model);
    chat.messages = Some(parse_messages(map_v1_messages(&request.messages))?);
    chat.stream = request.options.stream.unwrap_or(false);
    chat.temperature = request.options.temperature;
    chat.top_p = request.options.top_p;
    chat.max_tokens = request.options.max_tokens;
    chat.tools = map_functions_to_tools(&request.functions);
    chat.tool_choice = request
        .messages
        .iter()
        .find_map(|m| explicit_tool_choice(m.call.as_ref()));
    chat.reasoning = parse_effort(request.options.reasoning_effort.as_deref())
        .map(ReasoningConfig::with_effort);
    Ok(chat)
}

fn map_v2_to_chat_request(
    request: &GigaChatRequestV2,
) -> Result<ChatCompletionRequest, GatewayError> {
    let mut chat = base_chat_request(&request.model);
    chat.messages = Some(parse_messages(map_v2_messages(&request.messages))?);
    chat.stream = request.options.stream.unwrap_or(false);
    chat.temperature = request.options.temperature;
    chat.top_p = request.options.top_p;
    chat.max_tokens = request.options.max_tokens;
    chat.tools = map_functions_to_tools(&request.functions);
    chat.tool_choice = request
        .messages
        .iter()
        .find_map(|m| explicit_tool_choice(m.call.as_ref()));
    chat.reasoning = request
        .options
        .reasoning
        .as_ref()
        .and_then(|r| parse_effort(r.effort.as_deref()))
        .map(ReasoningConfig::with_effort);
    Ok(chat)
}

/// Zero-filled v1/v2 usage envelope; both versions share the field set.
fn usage_payload(usage: Option<&Usage>) -> Value {
    let (prompt, completion, total, cached) = match usage {
        Some(u) => (
            u.prompt_tokens,
            u.completion_tokens,
            u.total_tokens,
            u.cached_tokens(),
        ),
        None => (0, 0, 0, 0),
    };
    json!({
        "prompt_tokens": prompt,
        "completion_tokens": completion,
        "total_tokens": total,
        "system_tokens": 0,
        "function_suggester_tokens": 0,
        "precached_prompt_tokens": cached,
        "unaccounted_function_suggester_tokens": 0,
        "developer_system_tokens": 0,
    })
}

fn first_tool_call_to_function_call(tool_calls: Option<&[ToolCall]>) -> Option<Value> {
    let call = tool_calls?.first()?;
    let function = call.function.as_ref()?;
    let name = function.name.clone()?;
    if name.is_empty() {
        return None;
    }
    Some(json!({
        "name": name,
        "arguments": function.arguments.clone().unwrap_or_default(),
    }))
}

fn v1_message(role: &str, content: &str, function_call: Option<Value>, reasoning: Option<&str>) -> Value {
    let mut msg = Map::new();
    msg.insert("role".to_string(), json!(role));
    msg.insert("content".to_string(), json!(content));
    if let Some(call) = function_call {
        msg.insert("function_call".to_string(), call);
    }
    if let Some(reasoning) = reasoning {
        msg.insert("reasoning_content".to_string(), json!(reasoning));
    }
    Value::Object(msg)
}

fn v2_messages(role: &str, content: &str, function_call: Option<Value>, reasoning: Option<&str>) -> Vec<Value> {
    let mut items = Vec::new();
    if !content.is_empty() {
        items.push(json!({ "text": content }));
    }
    if let Some(call) = function_call {
        items.push(json!({ "function_call": call }));
    }
    let mut messages = vec![json!({ "role": role, "content": items })];
    if let Some(reasoning) = reasoning {
        messages.push(json!({
            "role": "reasoning",
            "content": [{ "text": reasoning }],
        }));
    }
    messages
}

fn envelope(version: &str, model: &str, timestamp: i64, alternatives: Vec<Value>, usage: Value) -> Value {
    json!({
        "answer": {
            "alternatives": alternatives,
            "usage": usage,
            "model_info": { "name": model, "version": version },
            "timestamp": timestamp,
            "additional_data": {},
        }
    })
}

fn message_payloads(version: &str, message: &ResponseMessage) -> (Value, Vec<Value>) {
    let content = message.content.clone().or(message.refusal.clone()).unwrap_or_default();
    let function_call = first_tool_call_to_function_call(message.tool_calls.as_deref());
    let reasoning = message.reasoning.as_deref();
    if version == "v1" {
        (v1_message(&message.role, &content, function_call, reasoning), vec![])
    } else {
        (Value::Null, v2_messages(&message.role, &content, function_call, reasoning))
    }
}

fn map_response(version: &str, response: &RouterResponse) -> Value {
    let alternatives: Vec<Value> = response
        .choices
        .iter()
        .map(|choice| {
            let finish_reason = map_finish_reason(choice.finish_reason.as_deref());
            let (v1_msg, v2_msgs) = message_payloads(version, &choice.message);
            if version == "v1" {
                json!({
                    "message": v1_msg,
                    "finish_reason": finish_reason,
                    "index": choice.index,
                })
            } else {
                json!({
                    "messages": v2_msgs,
                    "finish_reason": finish_reason,
                    "index": choice.index,
                    "token_ids": [],
                })
            }
        })
        .collect();
    envelope(
        version,
        &response.model,
        response.created,
        alternatives,
        usage_payload(response.usage.as_ref()),
    )
}

fn map_chunk(version: &str, chunk: &RouterStreamChunk) -> Value {
    let alternatives: Vec<Value> = chunk
        .choices
        .iter()
        .map(|choice| {
            let finish_reason = map_finish_reason(choice.finish_reason.as_deref());
            let role = choice.delta.role.as_deref().unwrap_or("assistant");
            let content = choice.delta.content.clone().unwrap_or_default();
            let function_call =
                first_tool_call_to_function_call(choice.delta.tool_calls.as_deref());
            let reasoning = choice.delta.reasoning.as_deref();
            if version == "v1" {
                json!({
                    "message": v1_message(role, &content, function_call, reasoning),
                    "finish_reason": finish_reason,
                    "index": choice.index,
                })
            } else {
                json!({
                    "messages": v2_messages(role, &content, function_call, reasoning),
                    "finish_reason": finish_reason,
                    "index": choice.index,
                    "token_ids": [],
                })
            }
        })
        .collect();
    envelope(
        version,
        &chunk.model,
        chunk.created,
        alternatives,
        usage_payload(chunk.usage.as_ref()),
    )
}

fn stream_response(
    mut stream: ReceiverStream<Result<RouterArtifact, GatewayError>>,
    first: Option<Result<RouterArtifact, GatewayError>>,
    version: &'static str,
) -> Response {
    let body = async_stream::stream! {
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
                    yield Ok::<_, std::convert::Infallible>(sse::data_frame(&map_chunk(version, &chunk)));
                }
                Ok(RouterArtifact::Response(_)) => continue,
                Err(e) => {
                    error!(code = e.code, error = %e, "provider error during gigachat stream");
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
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| {
            ApiError(GatewayError::internal("Stream setup failed", "")).into_response()
        })
}

async fn handle(
    state: AppState,
    request_id: String,
    headers: HeaderMap,
    chat_request: ChatCompletionRequest,
    version: &'static str,
) -> Result<Response, ApiError> {
    let identity = extract_identity(&headers, &state.settings)?;
    debug!(
        request_id = %request_id,
        model = %chat_request.model,
        stream = chat_request.stream,
        version,
        "processing gigachat-dialect request"
    );

    match run_chat(&state, identity, request_id, chat_request).await? {
        ChatOutcome::Response(response) => Ok(Json(map_response(version, &response)).into_response()),
        ChatOutcome::Stream(mut stream) => {
            let first = match stream.next().await {
                Some(Err(e)) => return Err(ApiError(e)),
                other => other,
            };
            Ok(stream_response(stream, first, version))
        }
    }
}

/// `POST /api/v1/gigachat/completions`
pub async fn create_v1_completion(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    Json(request): Json<GigaChatRequestV1>,
) -> Result<Response, ApiError> {
    let chat_request = map_v1_to_chat_request(&request)?;
    handle(state, request_id, headers, chat_request, "v1").await
}

/// `POST /api/v2/gigachat/completions`
pub async fn create_v2_completion(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    Json(request): Json<GigaChatRequestV2>,
) -> Result<Response, ApiError> {
    let chat_request = map_v2_to_chat_request(&request)?;
    handle(state, request_id, headers, chat_request, "v2").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_round_trips_to_function_call() {
        assert_eq!(map_finish_reason(Some("tool_calls")), "function_call");
        assert_eq!(map_finish_reason(Some("length")), "length");
        assert_eq!(map_finish_reason(None), "stop");
    }

    #[test]
    fn v1_function_role_resolves_call_id_by_name() {
        let request: GigaChatRequestV1 = serde_json::from_value(json!({
            "model": "gigachat/GigaChat-Pro",
            "options": {},
            "messages": [
                { "role": "user", "content": "weather?" },
                { "role": "assistant", "content": "",
                  "function_call": { "name": "get_weather", "arguments": {"city": "Paris"} } },
                { "role": "function", "function_name": "get_weather", "content": "sunny" }
            ]
        }))
        .unwrap();
        let chat = map_v1_to_chat_request(&request).unwrap();
        let messages = chat.messages.unwrap();
        assert_eq!(messages.len(), 3);
        let call_id = messages[1].tool_calls().unwrap()[0].id.clone().unwrap();
        match &messages[2] {
            weft::message::ChatMessage::Tool { tool_call_id, .. } => {
                assert_eq!(tool_call_id, &call_id);
            }
            other => panic!("expected tool message, got {other:?}"),
        }
    }

    #[test]
    fn v1_reasoning_effort_off_is_ignored() {
        let request: GigaChatRequestV1 = serde_json::from_value(json!({
            "model": "m",
            "options": { "reasoning_effort": "off" },
            "messages": [{ "role": "user", "content": "hi" }]
        }))
        .unwrap();
        assert!(map_v1_to_chat_request(&request).unwrap().reasoning.is_none());

        let request: GigaChatRequestV1 = serde_json::from_value(json!({
            "model": "m",
            "options": { "reasoning_effort": "high" },
            "messages": [{ "role": "user", "content": "hi" }]
        }))
        .unwrap();
        assert_eq!(
            map_v1_to_chat_request(&request).unwrap().reasoning.unwrap().effort,
            Some(ReasoningEffort::High)
        );
    }

    #[test]
    fn v2_content_items_split_into_internal_messages() {
        let request: GigaChatRequestV2 = serde_json::from_value(json!({
            "model": "m",
            "options": {},
            "messages": [
                { "role": "assistant", "content": [
                    { "text": "let me check" },
                    { "function_call": { "name": "calc", "arguments": "{\"x\":2}" } }
                ]},
                { "role": "user", "content": [
                    { "function_result": { "name": "calc", "result": "4" } }
                ]}
            ]
        }))
        .unwrap();
        let chat = map_v2_to_chat_request(&request).unwrap();
        let messages = chat.messages.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role(), "assistant");
        assert!(messages[1].tool_calls().is_some());
        assert_eq!(messages[2].role(), "tool");
    }

    #[test]
    fn string_function_parameters_are_parsed() {
        let def = GigaChatFunctionDef {
            name: "f".to_string(),
            description: None,
            parameters: json!("{\"type\":\"object\"}"),
        };
        let tools = map_functions_to_tools(&[def]).unwrap();
        assert_eq!(
            tools[0].function.parameters,
            Some(json!({"type": "object"}))
        );
    }

    #[test]
    fn v1_chunk_maps_tool_calls_to_function_call() {
        let chunk: RouterStreamChunk = serde_json::from_value(json!({
            "id": "gen_1", "object": "chat.completion.chunk", "created": 9,
            "model": "gigachat/GigaChat-Pro", "system_fingerprint": null,
            "choices": [{
                "index": 0,
                "delta": {
                    "role": "assistant",
                    "tool_calls": [{"id": "call_1", "type": "function",
                                    "function": {"name": "get_weather",
                                                 "arguments": "{\"location\":\"Paris\"}"}}]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();
        let mapped = map_chunk("v1", &chunk);
        let alternative = &mapped["answer"]["alternatives"][0];
        assert_eq!(alternative["finish_reason"], "function_call");
        assert_eq!(alternative["message"]["function_call"]["name"], "get_weather");
        assert_eq!(mapped["answer"]["usage"]["total_tokens"], 0);
    }

    #[test]
    fn v2_reasoning_surfaces_as_separate_message() {
        let response: RouterResponse = serde_json::from_value(json!({
            "id": "gen_1", "object": "chat.completion", "created": 9,
            "model": "gigachat/GigaChat-Pro", "system_fingerprint": null,
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "hi", "reasoning": "because" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2 }
        }))
        .unwrap();
        let mapped = map_response("v2", &response);
        let messages = mapped["answer"]["alternatives"][0]["messages"]
            .as_array()
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["role"], "reasoning");
        assert_eq!(messages[1]["content"][0]["text"], "because");
    }
}
