//! Yandex Foundation Models wire mapper.
//!
//! Yandex differs from the OpenAI wire in three ways that shape this module:
//! the model is addressed by `modelUri` (`gpt://<folder>/<name>`), each
//! message carries exactly one of `text` / `toolCallList` / `toolResultList`,
//! and the stream reports *cumulative* text per chunk rather than deltas.
//! The mapper keeps the previous cumulative text per request id and emits the
//! suffix; terminal statuses clear the entry.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::{collapse_preamble_messages, WireMapper};
use crate::error::GatewayError;
use crate::message::ChatMessage;
use crate::request::ProviderRequest;
use crate::response::{
    now_unix, CompletionTokensDetails, Delta, ProviderStreamChunk, StreamChoice, Usage,
};
use crate::tools::{ToolCall, ToolChoice, ToolChoiceMode};

const STATUS_FINAL: &str = "ALTERNATIVE_STATUS_FINAL";
const STATUS_TOOL_CALLS: &str = "ALTERNATIVE_STATUS_TOOL_CALLS";

/// Catalog model id → model-uri path segment.
static MODEL_URI_NAMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("yandexgpt5-pro:latest", "yandexgpt/latest"),
        ("yandexgpt5.1-pro:rc", "yandexgpt/rc"),
        ("yandexgpt-lite5:latest", "yandexgpt-lite/latest"),
        ("aliceai-llm:latest", "aliceai-llm/latest"),
    ])
});

/// Yandex reports token counts as JSON strings.
fn int_field(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as u32,
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

#[derive(Debug, Deserialize)]
struct YandexFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct YandexToolCall {
    #[serde(rename = "functionCall")]
    function_call: YandexFunctionCall,
}

#[derive(Debug, Deserialize, Default)]
struct YandexToolCallList {
    #[serde(rename = "toolCalls", default)]
    tool_calls: Vec<YandexToolCall>,
}

#[derive(Debug, Deserialize)]
struct YandexAltMessage {
    #[serde(default = "default_assistant_role")]
    role: String,
    text: Option<String>,
    #[serde(rename = "toolCallList")]
    tool_call_list: Option<YandexToolCallList>,
}

fn default_assistant_role() -> String {
    "assistant".to_string()
}

#[derive(Debug, Deserialize)]
struct YandexAlternative {
    message: YandexAltMessage,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct YandexResult {
    alternatives: Vec<YandexAlternative>,
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct YandexResponse {
    result: YandexResult,
}

/// Wire mapper for YandexGPT.
///
/// The mapper instance is bound to a single request's driver, but the
/// cumulative-text state is still keyed by request id so a shared instance
/// stays correct.
pub struct YandexMapper {
    folder_id: Option<String>,
    previous_text: Mutex<HashMap<String, String>>,
}

impl YandexMapper {
    pub fn new(folder_id: Option<String>) -> Self {
        YandexMapper {
            folder_id,
            previous_text: Mutex::new(HashMap::new()),
        }
    }

    fn model_uri(&self, model_id: &str) -> Result<String, GatewayError> {
        let folder_id = self.folder_id.as_deref().ok_or_else(|| {
            GatewayError::new(
                500,
                "Yandex folder_id not configured",
                json!({ "error": "Missing folder_id in provider parameters" }),
            )
        })?;
        let name = MODEL_URI_NAMES
            .get(model_id.to_lowercase().as_str())
            .ok_or_else(|| {
                GatewayError::new(
                    400,
                    format!("Unsupported model: {model_id}"),
                    json!({ "error": format!("No mapping found for model {model_id}") }),
                )
            })?;
        Ok(format!("gpt://{folder_id}/{name}"))
    }

    fn tool_call_list(calls: &[ToolCall]) -> Result<Value, GatewayError> {
        let mapped: Result<Vec<Value>, GatewayError> = calls
            .iter()
            .map(|call| {
                let function = call.function.as_ref().ok_or_else(|| {
                    GatewayError::bad_request(
                        "Failed to map request for Yandex",
                        "tool call without function",
                    )
                })?;
                let raw = function.arguments.clone().unwrap_or_default();
                let arguments: Value = serde_json::from_str(&raw).map_err(|e| {
                    GatewayError::bad_request(
                        "Failed to map request for Yandex",
                        format!("tool call arguments are not valid JSON: {e}"),
                    )
                })?;
                Ok(json!({
                    "functionCall": {
                        "name": function.name.clone().unwrap_or_default(),
                        "arguments": arguments,
                    }
                }))
            })
            .collect();
        Ok(json!({ "toolCalls": mapped? }))
    }

    fn convert_message(msg: &ChatMessage) -> Result<Option<Value>, GatewayError> {
        let message = match msg {
            ChatMessage::User { content, .. } => Some(json!({
                "role": "user",
                "text": content.as_text(),
            })),
            ChatMessage::System { content, .. } => Some(json!({
                "role": "system",
                "text": content.as_text(),
            })),
            ChatMessage::Assistant {
                content,
                tool_calls,
                ..
            } => match tool_calls.as_deref() {
                Some(calls) if !calls.is_empty() => Some(json!({
                    "role": "assistant",
                    "toolCallList": Self::tool_call_list(calls)?,
                })),
                _ => match content.as_deref().map(str::trim) {
                    Some(text) if !text.is_empty() => Some(json!({
                        "role": "assistant",
                        "text": text,
                    })),
                    // Empty assistant message without tool calls: skip.
                    _ => None,
                },
            },
            ChatMessage::Tool { content, name, .. } => Some(json!({
                // Tool results ride on a user-role message.
                "role": "user",
                "toolResultList": {
                    "toolResults": [{
                        "functionResult": {
                            "name": name.clone().unwrap_or_default(),
                            "content": content,
                        }
                    }]
                },
            })),
        };
        Ok(message)
    }

    fn map_tool_choice(choice: &ToolChoice) -> Option<Value> {
        match choice {
            ToolChoice::Mode(mode) => {
                let mode = match mode {
                    ToolChoiceMode::None => "NONE",
                    ToolChoiceMode::Auto => "AUTO",
                    ToolChoiceMode::Required => "REQUIRED",
                };
                Some(json!({ "mode": mode }))
            }
            ToolChoice::Function(f) => Some(json!({ "functionName": f.function.name })),
        }
    }

    fn map_usage(usage: Option<&Value>) -> Option<Usage> {
        let usage = usage?;
        if !usage.is_object() {
            return None;
        }
        let reasoning = usage
            .pointer("/completionTokensDetails/reasoningTokens")
            .map(|v| int_field(Some(v)))
            .filter(|v| *v > 0);
        Some(Usage {
            prompt_tokens: int_field(usage.get("inputTextTokens")),
            completion_tokens: int_field(usage.get("completionTokens")),
            total_tokens: int_field(usage.get("totalTokens")),
            prompt_tokens_details: None,
            completion_tokens_details: reasoning.map(|reasoning_tokens| {
                CompletionTokensDetails {
                    reasoning_tokens: Some(reasoning_tokens),
                }
            }),
            cost: None,
        })
    }
}

impl WireMapper for YandexMapper {
    fn map_request(&self, request: &ProviderRequest) -> Result<Value, GatewayError> {
        debug!(
            model = %request.model,
            request_id = %request.request_id,
            "mapping request to Yandex wire"
        );

        let mut messages = Vec::new();
        for msg in collapse_preamble_messages(&request.messages) {
            if let Some(message) = Self::convert_message(msg)? {
                messages.push(message);
            }
        }

        // Seed the cumulative-text state for this request.
        if let Ok(mut previous) = self.previous_text.lock() {
            previous.insert(request.request_id.clone(), String::new());
        }

        let mut completion_options = Map::new();
        completion_options.insert("stream".to_string(), json!(true));
        completion_options.insert(
            "temperature".to_string(),
            json!(request.temperature.unwrap_or(0.3)),
        );
        if let Some(max_tokens) = request.max_tokens {
            completion_options.insert("maxTokens".to_string(), json!(max_tokens));
        }
        if request.reasoning.is_some() {
            completion_options.insert(
                "reasoningOptions".to_string(),
                json!({ "mode": "ENABLED_HIDDEN" }),
            );
        }

        let mut body = json!({
            "modelUri": self.model_uri(&request.model)?,
            "messages": messages,
            "completionOptions": completion_options,
        });
        if let Some(tools) = &request.tools {
            let tools: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "function": {
                            "name": tool.function.name,
                            "description": tool.function.description,
                            "parameters": tool.function.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(choice) = request.tool_choice.as_ref().and_then(Self::map_tool_choice) {
            body["toolChoice"] = choice;
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
        let response: YandexResponse = serde_json::from_value(chunk).map_err(|e| {
            GatewayError::new(
                500,
                "Failed to parse Yandex stream chunk",
                json!({ "error": e.to_string() }),
            )
        })?;
        let alternative = response.result.alternatives.into_iter().next().ok_or_else(|| {
            GatewayError::new(
                500,
                "Failed to parse Yandex stream chunk",
                json!({ "error": "empty alternatives" }),
            )
        })?;
        let usage = Self::map_usage(response.result.usage.as_ref());

        let choice = if alternative.status == STATUS_TOOL_CALLS {
            let tool_calls: Vec<ToolCall> = alternative
                .message
                .tool_call_list
                .unwrap_or_default()
                .tool_calls
                .into_iter()
                .enumerate()
                .map(|(idx, call)| {
                    // Yandex never returns call ids; synthesize them.
                    let mut mapped = ToolCall::function(
                        format!("ya_call_{}", Uuid::new_v4()),
                        call.function_call.name,
                        serde_json::to_string(&call.function_call.arguments)
                            .unwrap_or_default(),
                    );
                    mapped.index = Some(idx as u32);
                    mapped
                })
                .collect();
            StreamChoice {
                index: 0,
                delta: Delta {
                    role: Some("assistant".to_string()),
                    content: None,
                    reasoning: None,
                    tool_calls: Some(tool_calls),
                },
                finish_reason: Some("tool_calls".to_string()),
            }
        } else {
            let current_text = alternative.message.text.unwrap_or_default();
            let delta_text = {
                let previous = self
                    .previous_text
                    .lock()
                    .map(|map| map.get(request_id).cloned().unwrap_or_default())
                    .unwrap_or_default();
                if !previous.is_empty() && current_text.starts_with(&previous) {
                    current_text[previous.len()..].to_string()
                } else {
                    current_text.clone()
                }
            };
            if let Ok(mut previous) = self.previous_text.lock() {
                previous.insert(request_id.to_string(), current_text);
            }
            StreamChoice {
                index: 0,
                delta: Delta {
                    role: Some(alternative.message.role.clone()),
                    content: Some(delta_text),
                    reasoning: None,
                    tool_calls: None,
                },
                finish_reason: (alternative.status == STATUS_FINAL).then(|| "stop".to_string()),
            }
        };

        if alternative.status == STATUS_FINAL || alternative.status == STATUS_TOOL_CALLS {
            if let Ok(mut previous) = self.previous_text.lock() {
                previous.remove(request_id);
            }
        }

        Ok(ProviderStreamChunk::new(
            request_id,
            now_unix(),
            model,
            provider_id,
            vec![choice],
            usage,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> YandexMapper {
        YandexMapper::new(Some("folder-1".to_string()))
    }

    fn text_chunk(text: &str, status: &str) -> Value {
        json!({
            "result": {
                "alternatives": [{
                    "message": {"role": "assistant", "text": text},
                    "status": status
                }],
                "usage": null
            }
        })
    }

    #[test]
    fn model_uri_requires_folder_and_known_model() {
        let err = YandexMapper::new(None).model_uri("yandexgpt5-pro:latest").unwrap_err();
        assert_eq!(err.code, 500);

        let err = mapper().model_uri("unknown-model").unwrap_err();
        assert_eq!(err.code, 400);

        assert_eq!(
            mapper().model_uri("YandexGPT5-Pro:latest").unwrap(),
            "gpt://folder-1/yandexgpt/latest"
        );
    }

    #[test]
    fn cumulative_text_becomes_deltas_and_state_is_cleared() {
        let mapper = mapper();
        let texts = ["He", "Hello", "Hello!"];
        let statuses = [
            "ALTERNATIVE_STATUS_PARTIAL",
            "ALTERNATIVE_STATUS_PARTIAL",
            STATUS_FINAL,
        ];
        let mut deltas = Vec::new();
        let mut final_reason = None;
        for (text, status) in texts.iter().zip(statuses) {
            let chunk = mapper
                .map_stream_chunk(text_chunk(text, status), "yandexgpt5-pro:latest", "yandex", "req-y")
                .unwrap();
            deltas.push(chunk.choices[0].delta.content.clone().unwrap());
            final_reason = chunk.choices[0].finish_reason.clone();
        }
        assert_eq!(deltas, vec!["He", "llo", "!"]);
        assert_eq!(deltas.concat(), "Hello!");
        assert_eq!(final_reason.as_deref(), Some("stop"));
        assert!(mapper.previous_text.lock().unwrap().get("req-y").is_none());
    }

    #[test]
    fn non_prefix_restart_emits_full_text() {
        let mapper = mapper();
        mapper
            .map_stream_chunk(text_chunk("abc", "ALTERNATIVE_STATUS_PARTIAL"), "m", "yandex", "r")
            .unwrap();
        let chunk = mapper
            .map_stream_chunk(text_chunk("xyz", "ALTERNATIVE_STATUS_PARTIAL"), "m", "yandex", "r")
            .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("xyz"));
    }

    #[test]
    fn tool_calls_status_synthesizes_ids() {
        let chunk = mapper()
            .map_stream_chunk(
                json!({
                    "result": {
                        "alternatives": [{
                            "message": {
                                "role": "assistant",
                                "toolCallList": {"toolCalls": [
                                    {"functionCall": {"name": "get_weather", "arguments": {"city": "Paris"}}}
                                ]}
                            },
                            "status": STATUS_TOOL_CALLS
                        }],
                        "usage": {"inputTextTokens": "21", "completionTokens": "4", "totalTokens": "25"}
                    }
                }),
                "yandexgpt5-pro:latest",
                "yandex",
                "req-t",
            )
            .unwrap();
        let choice = &chunk.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        let call = &choice.delta.tool_calls.as_ref().unwrap()[0];
        assert!(call.id.as_ref().unwrap().starts_with("ya_call_"));
        assert_eq!(
            call.function.as_ref().unwrap().name.as_deref(),
            Some("get_weather")
        );
        let usage = chunk.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 21);
        assert_eq!(usage.total_tokens, 25);
    }

    #[test]
    fn tool_message_maps_to_user_tool_result() {
        let mut request = ProviderRequest::new("yandexgpt5-pro:latest", "r");
        request.messages = vec![
            ChatMessage::user("weather?"),
            ChatMessage::Assistant {
                content: None,
                reasoning: None,
                refusal: None,
                tool_calls: Some(vec![ToolCall::function(
                    "call_1",
                    "get_weather",
                    r#"{"city":"Paris"}"#.to_string(),
                )]),
                name: None,
            },
            ChatMessage::Tool {
                content: "sunny".to_string(),
                tool_call_id: "call_1".to_string(),
                name: Some("get_weather".to_string()),
            },
        ];
        let body = mapper().map_request(&request).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[1]["toolCallList"]["toolCalls"][0]["functionCall"]["name"], "get_weather");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(
            messages[2]["toolResultList"]["toolResults"][0]["functionResult"]["content"],
            "sunny"
        );
    }

    #[test]
    fn empty_assistant_messages_are_dropped() {
        let mut request = ProviderRequest::new("yandexgpt5-pro:latest", "r");
        request.messages = vec![
            ChatMessage::user("hi"),
            ChatMessage::Assistant {
                content: Some("  ".to_string()),
                reasoning: None,
                refusal: None,
                tool_calls: None,
                name: None,
            },
        ];
        let body = mapper().map_request(&request).unwrap();
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn reasoning_enables_hidden_mode_and_temperature_defaults() {
        let mut request = ProviderRequest::new("yandexgpt5-pro:latest", "r");
        request.messages = vec![ChatMessage::user("hi")];
        request.reasoning = Some(crate::reasoning::ReasoningConfig::default());
        let body = mapper().map_request(&request).unwrap();
        assert_eq!(
            body["completionOptions"]["reasoningOptions"]["mode"],
            "ENABLED_HIDDEN"
        );
        assert!((body["completionOptions"]["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-9);
    }
}
