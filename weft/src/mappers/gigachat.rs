//! GigaChat wire mapper.
//!
//! GigaChat speaks a function-call dialect: tools are `functions`, a tool
//! call is a `function_call` with a `functions_state_id` carrying the call id
//! across turns, and tool results are `function` role messages. All system
//! messages are merged into one turn because the upstream accepts only one.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::{collapse_preamble_messages, WireMapper};
use crate::error::GatewayError;
use crate::message::ChatMessage;
use crate::request::ProviderRequest;
use crate::response::{
    now_unix, Delta, PromptTokensDetails, ProviderStreamChunk, StreamChoice, Usage,
};
use crate::tools::{ToolCall, ToolChoice, ToolChoiceMode};

#[derive(Debug, Deserialize)]
struct GigaChatFunctionCall {
    name: Option<String>,
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
struct GigaChatDelta {
    role: Option<String>,
    content: Option<String>,
    function_call: Option<GigaChatFunctionCall>,
    functions_state_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GigaChatStreamChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: GigaChatDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
struct GigaChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
    precached_prompt_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GigaChatStreamResponse {
    #[serde(default)]
    choices: Vec<GigaChatStreamChoice>,
    created: Option<i64>,
    usage: Option<GigaChatUsage>,
}

/// Wire mapper for the GigaChat chat API.
pub struct GigaChatMapper;

impl GigaChatMapper {
    pub fn new() -> Self {
        GigaChatMapper
    }

    /// Merge all system messages into one turn joined with `\n\n`, inserted
    /// at the position of the first system message.
    fn merged_system_message(request: &ProviderRequest) -> Option<Value> {
        let mut parts = Vec::new();
        let mut first_name = None;
        for msg in &request.messages {
            if let ChatMessage::System { content, name } = msg {
                let text = content.as_text();
                if first_name.is_none() {
                    first_name = name.clone();
                }
                if !text.is_empty() {
                    match name {
                        Some(name) => parts.push(format!("[{name}] {text}")),
                        None => parts.push(text),
                    }
                }
            }
        }
        if parts.is_empty() {
            return None;
        }
        let mut obj = json!({ "role": "system", "content": parts.join("\n\n") });
        if let Some(name) = first_name {
            obj["name"] = json!(name);
        }
        Some(obj)
    }

    fn build_message(msg: &ChatMessage) -> Value {
        let mut obj = Map::new();
        match msg {
            ChatMessage::User { content, name } => {
                obj.insert("role".to_string(), json!("user"));
                obj.insert("content".to_string(), json!(content.as_text()));
                if let Some(name) = name {
                    obj.insert("name".to_string(), json!(name));
                }
            }
            ChatMessage::Assistant {
                content,
                tool_calls,
                name,
                ..
            } => {
                obj.insert("role".to_string(), json!("assistant"));
                match tool_calls.as_ref().and_then(|calls| calls.first()) {
                    Some(call) => {
                        // Arguments go out as a JSON object when they parse.
                        let raw = call
                            .function
                            .as_ref()
                            .and_then(|f| f.arguments.clone())
                            .unwrap_or_default();
                        let arguments = serde_json::from_str::<Value>(&raw)
                            .unwrap_or(Value::String(raw));
                        obj.insert("content".to_string(), json!(""));
                        obj.insert(
                            "function_call".to_string(),
                            json!({
                                "name": call.function.as_ref().and_then(|f| f.name.clone()),
                                "arguments": arguments,
                            }),
                        );
                        obj.insert("functions_state_id".to_string(), json!(call.id));
                    }
                    None => {
                        obj.insert(
                            "content".to_string(),
                            json!(content.clone().unwrap_or_default()),
                        );
                    }
                }
                if let Some(name) = name {
                    obj.insert("name".to_string(), json!(name));
                }
            }
            ChatMessage::Tool { content, name, .. } => {
                obj.insert("role".to_string(), json!("function"));
                obj.insert("content".to_string(), json!(content));
                if let Some(name) = name {
                    obj.insert("name".to_string(), json!(name));
                }
            }
            ChatMessage::System { .. } => unreachable!("system messages are merged separately"),
        }
        Value::Object(obj)
    }

    fn map_tool_choice(choice: &ToolChoice) -> Option<Value> {
        match choice {
            ToolChoice::Mode(ToolChoiceMode::None) => Some(json!("none")),
            ToolChoice::Mode(ToolChoiceMode::Auto) => Some(json!("auto")),
            ToolChoice::Mode(ToolChoiceMode::Required) => None,
            ToolChoice::Function(f) => Some(json!({ "name": f.function.name })),
        }
    }

    fn map_function_call(
        function_call: Option<GigaChatFunctionCall>,
        functions_state_id: Option<String>,
    ) -> Option<Vec<ToolCall>> {
        let call = function_call?;
        let arguments = match call.arguments {
            Some(Value::String(s)) => s,
            Some(value) => serde_json::to_string(&value).unwrap_or_default(),
            None => String::new(),
        };
        let id = functions_state_id.unwrap_or_else(|| format!("gc_call_{}", Uuid::new_v4()));
        Some(vec![ToolCall::function(
            id,
            call.name.unwrap_or_default(),
            arguments,
        )])
    }
}

impl Default for GigaChatMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl WireMapper for GigaChatMapper {
    fn map_request(&self, request: &ProviderRequest) -> Result<Value, GatewayError> {
        debug!(
            model = %request.model,
            request_id = %request.request_id,
            "mapping request to GigaChat wire"
        );

        let merged_system = Self::merged_system_message(request);
        let mut messages = Vec::new();
        let mut injected_system = false;

        for msg in collapse_preamble_messages(&request.messages) {
            if matches!(msg, ChatMessage::System { .. }) {
                if !injected_system {
                    if let Some(system) = merged_system.clone() {
                        messages.push(system);
                        injected_system = true;
                    }
                }
                continue;
            }
            messages.push(Self::build_message(msg));
        }

        let functions: Option<Vec<Value>> = request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.function.name,
                        "description": tool.function.description,
                        "parameters": tool.function.parameters,
                    })
                })
                .collect()
        });

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            // GigaChat has no frequency/presence penalties or stop sequences.
            "stream": true,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(functions) = functions {
            body["functions"] = Value::Array(functions);
        }
        if let Some(choice) = request.tool_choice.as_ref().and_then(Self::map_tool_choice) {
            body["function_call"] = choice;
        }
        Ok(body)
    }

    fn map_stream_chunk(
        &self,
        chunk: Value,
        model: &str,
        provider_id: &str,
        request_id: &str,
    ) -> Result<ProviderStreamChunk, GatewayError> {
        let response: GigaChatStreamResponse = serde_json::from_value(chunk).map_err(|e| {
            GatewayError::new(
                500,
                "Failed to parse GigaChat stream chunk",
                json!({ "error": e.to_string() }),
            )
        })?;

        let choices = response
            .choices
            .into_iter()
            .map(|choice| {
                let tool_calls =
                    Self::map_function_call(choice.delta.function_call, choice.delta.functions_state_id);
                let content = if tool_calls.is_some() {
                    None
                } else {
                    Some(choice.delta.content.unwrap_or_default())
                };
                StreamChoice {
                    index: choice.index,
                    delta: Delta {
                        role: Some(choice.delta.role.unwrap_or_else(|| "assistant".to_string())),
                        content,
                        reasoning: None,
                        tool_calls,
                    },
                    finish_reason: choice.finish_reason.map(|reason| {
                        if reason == "function_call" {
                            "tool_calls".to_string()
                        } else {
                            reason
                        }
                    }),
                }
            })
            .collect();

        let usage = response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
            prompt_tokens_details: u.precached_prompt_tokens.map(|cached| PromptTokensDetails {
                cached_tokens: Some(cached),
            }),
            completion_tokens_details: None,
            cost: None,
        });

        Ok(ProviderStreamChunk::new(
            request_id,
            response.created.unwrap_or_else(now_unix),
            model,
            provider_id,
            choices,
            usage,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolFunction, ToolKind};

    fn request_with_messages(messages: Vec<ChatMessage>) -> ProviderRequest {
        let mut request = ProviderRequest::new("GigaChat-Pro", "req-gc");
        request.messages = messages;
        request
    }

    #[test]
    fn system_messages_merge_at_first_position() {
        let request = request_with_messages(vec![
            ChatMessage::system("rule one"),
            ChatMessage::user("hi"),
            ChatMessage::system("rule two"),
        ]);
        let body = GigaChatMapper::new().map_request(&request).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "rule one\n\nrule two");
        assert_eq!(messages[1]["role"], "user");
    }

    #[test]
    fn assistant_tool_call_becomes_function_call() {
        let request = request_with_messages(vec![
            ChatMessage::user("weather?"),
            ChatMessage::Assistant {
                content: None,
                reasoning: None,
                refusal: None,
                tool_calls: Some(vec![ToolCall::function(
                    "call_7",
                    "get_weather",
                    r#"{"location":"Paris"}"#.to_string(),
                )]),
                name: None,
            },
            ChatMessage::Tool {
                content: "sunny".to_string(),
                tool_call_id: "call_7".to_string(),
                name: Some("get_weather".to_string()),
            },
        ]);
        let body = GigaChatMapper::new().map_request(&request).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[1]["function_call"]["name"], "get_weather");
        // Arguments are sent as a parsed object, not a string.
        assert_eq!(messages[1]["function_call"]["arguments"]["location"], "Paris");
        assert_eq!(messages[1]["functions_state_id"], "call_7");
        assert_eq!(messages[2]["role"], "function");
        assert_eq!(messages[2]["name"], "get_weather");
    }

    #[test]
    fn tools_map_to_functions() {
        let mut request = request_with_messages(vec![ChatMessage::user("hi")]);
        request.tools = Some(vec![Tool {
            kind: ToolKind::Function,
            function: ToolFunction {
                name: "calc".to_string(),
                description: Some("adds".to_string()),
                parameters: Some(json!({"type": "object"})),
            },
        }]);
        let body = GigaChatMapper::new().map_request(&request).unwrap();
        assert_eq!(body["functions"][0]["name"], "calc");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn function_call_delta_maps_to_tool_calls() {
        let chunk = GigaChatMapper::new()
            .map_stream_chunk(
                json!({
                    "choices": [{
                        "index": 0,
                        "delta": {
                            "function_call": {"name": "get_weather", "arguments": {"location": "Paris"}},
                            "functions_state_id": "state-1"
                        },
                        "finish_reason": "function_call"
                    }],
                    "created": 111
                }),
                "GigaChat-Pro",
                "gigachat",
                "req-1",
            )
            .unwrap();
        let choice = &chunk.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        let calls = choice.delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("state-1"));
        assert_eq!(
            calls[0].function.as_ref().unwrap().arguments.as_deref(),
            Some(r#"{"location":"Paris"}"#)
        );
        assert!(choice.delta.content.is_none());
    }

    #[test]
    fn missing_state_id_synthesizes_call_id() {
        let chunk = GigaChatMapper::new()
            .map_stream_chunk(
                json!({"choices": [{"delta": {"function_call": {"name": "f", "arguments": {}}}}]}),
                "m",
                "gigachat",
                "r",
            )
            .unwrap();
        let id = chunk.choices[0].delta.tool_calls.as_ref().unwrap()[0]
            .id
            .clone()
            .unwrap();
        assert!(id.starts_with("gc_call_"));
    }

    #[test]
    fn precached_tokens_map_to_cached_tokens() {
        let chunk = GigaChatMapper::new()
            .map_stream_chunk(
                json!({
                    "choices": [],
                    "usage": {
                        "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15,
                        "precached_prompt_tokens": 8
                    }
                }),
                "m",
                "gigachat",
                "r",
            )
            .unwrap();
        assert_eq!(chunk.usage.unwrap().cached_tokens(), 8);
    }
}
