//! OpenAI-compatible wire mapper.
//!
//! One mapper covers every upstream that speaks the OpenAI chat-completions
//! wire; per-provider quirks (reasoning field spelling, max-tokens field
//! name, vendor usage extras, thinking flag) are configured at construction.

use serde_json::{json, Map, Value};
use tracing::debug;

use super::{collapse_preamble_messages, WireMapper};
use crate::error::GatewayError;
use crate::message::{ChatMessage, ContentPart, MessageContent};
use crate::request::ProviderRequest;
use crate::response::{
    now_unix, CompletionTokensDetails, Delta, PromptTokensDetails, ProviderStreamChunk,
    StreamChoice, Usage,
};
use crate::tools::ToolCall;

/// How `reasoning.effort` is spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningWire {
    /// Not forwarded.
    None,
    /// OpenAI style: `reasoning_effort: "high"`.
    Effort,
    /// OpenRouter style: `reasoning: {"effort": "high"}`.
    Object,
}

/// Which field carries the completion token limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxTokensField {
    MaxTokens,
    MaxCompletionTokens,
}

#[derive(Debug, Clone)]
struct Quirks {
    label: &'static str,
    reasoning_wire: ReasoningWire,
    max_tokens_field: MaxTokensField,
    /// Keep `cache_control` on content parts (Anthropic-style prompt caching
    /// through OpenRouter). Stripped everywhere else.
    keep_cache_control: bool,
    /// Flatten multipart user content to a single string.
    flatten_user_content: bool,
    /// Map `prompt_cache_hit_tokens` into `prompt_tokens_details.cached_tokens`.
    prompt_cache_hit_tokens: bool,
    /// Emit `thinking: {"type": "enabled"}` when reasoning is configured.
    thinking_flag: bool,
    /// Forward the `usage: {include}` accounting option.
    usage_accounting: bool,
}

/// Wire mapper for OpenAI-compatible upstreams.
pub struct OpenAiMapper {
    quirks: Quirks,
}

impl OpenAiMapper {
    /// Plain OpenAI-compatible upstream (in-house gateway, Ollama, custom).
    pub fn generic(label: &'static str) -> Self {
        OpenAiMapper {
            quirks: Quirks {
                label,
                reasoning_wire: ReasoningWire::Effort,
                max_tokens_field: MaxTokensField::MaxCompletionTokens,
                keep_cache_control: false,
                flatten_user_content: false,
                prompt_cache_hit_tokens: false,
                thinking_flag: false,
                usage_accounting: false,
            },
        }
    }

    /// OpenRouter (and its proxied twin): object reasoning, cache_control
    /// pass-through, usage accounting.
    pub fn openrouter(label: &'static str) -> Self {
        OpenAiMapper {
            quirks: Quirks {
                label,
                reasoning_wire: ReasoningWire::Object,
                max_tokens_field: MaxTokensField::MaxTokens,
                keep_cache_control: true,
                flatten_user_content: false,
                prompt_cache_hit_tokens: false,
                thinking_flag: false,
                usage_accounting: true,
            },
        }
    }

    /// DeepSeek: `max_tokens`, flattened user content, `reasoning_content`
    /// deltas and `prompt_cache_hit_tokens`.
    pub fn deepseek() -> Self {
        OpenAiMapper {
            quirks: Quirks {
                label: "DeepSeek",
                reasoning_wire: ReasoningWire::None,
                max_tokens_field: MaxTokensField::MaxTokens,
                keep_cache_control: false,
                flatten_user_content: true,
                prompt_cache_hit_tokens: true,
                thinking_flag: false,
                usage_accounting: false,
            },
        }
    }

    /// Z.AI: DeepSeek-shaped plus `thinking: {type: enabled}`.
    pub fn zai() -> Self {
        OpenAiMapper {
            quirks: Quirks {
                label: "Z.AI",
                reasoning_wire: ReasoningWire::None,
                max_tokens_field: MaxTokensField::MaxTokens,
                keep_cache_control: false,
                flatten_user_content: true,
                prompt_cache_hit_tokens: true,
                thinking_flag: true,
                usage_accounting: false,
            },
        }
    }

    fn serialize_content(&self, content: &MessageContent) -> Value {
        match content {
            MessageContent::Text(s) => Value::String(s.clone()),
            MessageContent::Parts(parts) => {
                let parts: Vec<Value> = parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text {
                            text,
                            cache_control,
                        } => {
                            let mut obj = json!({ "type": "text", "text": text });
                            if self.quirks.keep_cache_control {
                                if let Some(cc) = cache_control {
                                    obj["cache_control"] =
                                        serde_json::to_value(cc).unwrap_or(Value::Null);
                                }
                            }
                            obj
                        }
                        ContentPart::ImageUrl { image_url } => json!({
                            "type": "image_url",
                            "image_url": image_url,
                        }),
                    })
                    .collect();
                Value::Array(parts)
            }
        }
    }

    fn serialize_message(&self, msg: &ChatMessage) -> Value {
        let mut obj = Map::new();
        obj.insert("role".to_string(), json!(msg.role()));
        match msg {
            ChatMessage::System { content, name } => {
                // System content is text-only on this wire.
                obj.insert("content".to_string(), json!(content.as_text()));
                if let Some(name) = name {
                    obj.insert("name".to_string(), json!(name));
                }
            }
            ChatMessage::User { content, name } => {
                let value = if self.quirks.flatten_user_content {
                    json!(content.as_text())
                } else {
                    self.serialize_content(content)
                };
                obj.insert("content".to_string(), value);
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
                obj.insert("content".to_string(), json!(content));
                if let Some(calls) = tool_calls {
                    obj.insert(
                        "tool_calls".to_string(),
                        serde_json::to_value(calls).unwrap_or(Value::Null),
                    );
                }
                if let Some(name) = name {
                    obj.insert("name".to_string(), json!(name));
                }
            }
            ChatMessage::Tool {
                content,
                tool_call_id,
                name,
            } => {
                obj.insert("content".to_string(), json!(content));
                obj.insert("tool_call_id".to_string(), json!(tool_call_id));
                if let Some(name) = name {
                    obj.insert("name".to_string(), json!(name));
                }
            }
        }
        Value::Object(obj)
    }

    fn map_usage(&self, usage: &Value) -> Option<Usage> {
        if !usage.is_object() {
            return None;
        }
        let field = |name: &str| usage.get(name).and_then(Value::as_u64).map(|v| v as u32);
        let cached = usage
            .pointer("/prompt_tokens_details/cached_tokens")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .or_else(|| {
                if self.quirks.prompt_cache_hit_tokens {
                    usage
                        .get("prompt_cache_hit_tokens")
                        .and_then(Value::as_u64)
                        .map(|v| v as u32)
                } else {
                    None
                }
            });
        let reasoning = usage
            .pointer("/completion_tokens_details/reasoning_tokens")
            .and_then(Value::as_u64)
            .map(|v| v as u32);
        Some(Usage {
            prompt_tokens: field("prompt_tokens").unwrap_or(0),
            completion_tokens: field("completion_tokens").unwrap_or(0),
            total_tokens: field("total_tokens").unwrap_or(0),
            prompt_tokens_details: cached.map(|cached_tokens| PromptTokensDetails {
                cached_tokens: Some(cached_tokens),
            }),
            completion_tokens_details: reasoning.map(|reasoning_tokens| {
                CompletionTokensDetails {
                    reasoning_tokens: Some(reasoning_tokens),
                }
            }),
            cost: usage.get("cost").and_then(Value::as_f64),
        })
    }

    fn map_choice(&self, choice: &Value) -> Result<StreamChoice, GatewayError> {
        let delta_value = choice.get("delta").cloned().unwrap_or(Value::Null);
        let tool_calls: Option<Vec<ToolCall>> = delta_value
            .get("tool_calls")
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|e| {
                GatewayError::internal(
                    format!("Failed to map {} stream chunk", self.quirks.label),
                    e,
                )
            })?;
        let reasoning = delta_value
            .get("reasoning")
            .or_else(|| delta_value.get("reasoning_content"))
            .and_then(Value::as_str)
            .map(|s| s.to_string());
        Ok(StreamChoice {
            index: choice.get("index").and_then(Value::as_u64).unwrap_or(0) as u32,
            delta: Delta {
                role: Some(
                    delta_value
                        .get("role")
                        .and_then(Value::as_str)
                        .unwrap_or("assistant")
                        .to_string(),
                ),
                content: delta_value
                    .get("content")
                    .and_then(Value::as_str)
                    .map(|s| s.to_string()),
                reasoning,
                tool_calls,
            },
            finish_reason: choice
                .get("finish_reason")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
        })
    }
}

impl WireMapper for OpenAiMapper {
    fn map_request(&self, request: &ProviderRequest) -> Result<Value, GatewayError> {
        debug!(
            model = %request.model,
            request_id = %request.request_id,
            upstream = self.quirks.label,
            "mapping request to OpenAI-compatible wire"
        );

        let messages: Vec<Value> = collapse_preamble_messages(&request.messages)
            .into_iter()
            .map(|m| self.serialize_message(m))
            .collect();

        let mut body = Map::new();
        body.insert("model".to_string(), json!(request.model));
        body.insert("messages".to_string(), Value::Array(messages));
        // The upstream is always streamed; non-streaming callers are served
        // from the assembled chunks.
        body.insert("stream".to_string(), json!(true));
        if let Some(temperature) = request.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            body.insert("top_p".to_string(), json!(top_p));
        }
        if let Some(max_tokens) = request.max_tokens {
            let field = match self.quirks.max_tokens_field {
                MaxTokensField::MaxTokens => "max_tokens",
                MaxTokensField::MaxCompletionTokens => "max_completion_tokens",
            };
            body.insert(field.to_string(), json!(max_tokens));
        }
        if let Some(stop) = &request.stop {
            body.insert("stop".to_string(), serde_json::to_value(stop)?);
        }
        if let Some(penalty) = request.frequency_penalty {
            body.insert("frequency_penalty".to_string(), json!(penalty));
        }
        if let Some(penalty) = request.presence_penalty {
            body.insert("presence_penalty".to_string(), json!(penalty));
        }
        if let Some(tools) = &request.tools {
            body.insert("tools".to_string(), serde_json::to_value(tools)?);
        }
        if let Some(choice) = &request.tool_choice {
            body.insert("tool_choice".to_string(), serde_json::to_value(choice)?);
        }
        if let Some(reasoning) = &request.reasoning {
            match self.quirks.reasoning_wire {
                ReasoningWire::None => {}
                ReasoningWire::Effort => {
                    if let Some(effort) = reasoning.effort {
                        body.insert("reasoning_effort".to_string(), json!(effort.as_str()));
                    }
                }
                ReasoningWire::Object => {
                    body.insert("reasoning".to_string(), serde_json::to_value(reasoning)?);
                }
            }
            if self.quirks.thinking_flag {
                body.insert("thinking".to_string(), json!({ "type": "enabled" }));
            }
        }
        if self.quirks.usage_accounting {
            if let Some(usage) = &request.usage {
                body.insert("usage".to_string(), json!({ "include": usage.include }));
            }
        }
        Ok(Value::Object(body))
    }

    fn map_stream_chunk(
        &self,
        chunk: Value,
        model: &str,
        provider_id: &str,
        request_id: &str,
    ) -> Result<ProviderStreamChunk, GatewayError> {
        let choices = chunk
            .get("choices")
            .and_then(Value::as_array)
            .map(|choices| {
                choices
                    .iter()
                    .map(|c| self.map_choice(c))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let usage = chunk.get("usage").and_then(|u| self.map_usage(u));

        Ok(ProviderStreamChunk::new(
            request_id,
            chunk
                .get("created")
                .and_then(Value::as_i64)
                .unwrap_or_else(now_unix),
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
    use crate::reasoning::{ReasoningConfig, ReasoningEffort};

    fn request_with_reasoning() -> ProviderRequest {
        let mut request = ProviderRequest::new("some-model", "req-1");
        request.messages = vec![ChatMessage::user("hi")];
        request.max_tokens = Some(256);
        request.reasoning = Some(ReasoningConfig::with_effort(ReasoningEffort::High));
        request
    }

    #[test]
    fn request_is_always_streamed() {
        let mut request = ProviderRequest::new("m", "r");
        request.stream = false;
        let body = OpenAiMapper::generic("test").map_request(&request).unwrap();
        assert_eq!(body["stream"], json!(true));
    }

    #[test]
    fn reasoning_effort_spelling_differs_per_wire() {
        let request = request_with_reasoning();

        let body = OpenAiMapper::generic("test").map_request(&request).unwrap();
        assert_eq!(body["reasoning_effort"], "high");
        assert!(body.get("reasoning").is_none());
        assert_eq!(body["max_completion_tokens"], 256);

        let body = OpenAiMapper::openrouter("OpenRouter")
            .map_request(&request)
            .unwrap();
        assert_eq!(body["reasoning"]["effort"], "high");
        assert!(body.get("reasoning_effort").is_none());
        assert_eq!(body["max_tokens"], 256);
    }

    #[test]
    fn zai_adds_thinking_flag() {
        let body = OpenAiMapper::zai().map_request(&request_with_reasoning()).unwrap();
        assert_eq!(body["thinking"], json!({"type": "enabled"}));
    }

    #[test]
    fn deepseek_flattens_user_parts_and_strips_cache_control() {
        let mut request = ProviderRequest::new("deepseek-chat", "r");
        request.messages = vec![ChatMessage::User {
            content: serde_json::from_str(
                r#"[{"type":"text","text":"ctx","cache_control":{"type":"ephemeral"}},{"type":"text","text":"q"}]"#,
            )
            .unwrap(),
            name: None,
        }];
        let body = OpenAiMapper::deepseek().map_request(&request).unwrap();
        assert_eq!(body["messages"][0]["content"], "ctx\nq");
    }

    #[test]
    fn openrouter_keeps_cache_control_parts() {
        let mut request = ProviderRequest::new("anthropic/claude-sonnet-4.5", "r");
        request.messages = vec![ChatMessage::User {
            content: serde_json::from_str(
                r#"[{"type":"text","text":"ctx","cache_control":{"type":"ephemeral"}}]"#,
            )
            .unwrap(),
            name: None,
        }];
        let body = OpenAiMapper::openrouter("OpenRouter").map_request(&request).unwrap();
        assert_eq!(
            body["messages"][0]["content"][0]["cache_control"]["type"],
            "ephemeral"
        );
    }

    #[test]
    fn chunk_defaults_role_to_assistant() {
        let mapper = OpenAiMapper::generic("test");
        let chunk = mapper
            .map_stream_chunk(
                json!({"created": 10, "choices": [{"index": 0, "delta": {"content": "hey"}}]}),
                "m",
                "xrouter",
                "req-1",
            )
            .unwrap();
        assert_eq!(chunk.choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hey"));
        assert_eq!(chunk.request_id, "req-1");
        assert_eq!(chunk.created, 10);
    }

    #[test]
    fn reasoning_content_is_mapped_to_reasoning() {
        let mapper = OpenAiMapper::deepseek();
        let chunk = mapper
            .map_stream_chunk(
                json!({"choices": [{"index": 0, "delta": {"reasoning_content": "thinking..."}}]}),
                "m",
                "deepseek",
                "r",
            )
            .unwrap();
        assert_eq!(
            chunk.choices[0].delta.reasoning.as_deref(),
            Some("thinking...")
        );
    }

    #[test]
    fn deepseek_cache_hit_tokens_become_cached_tokens() {
        let mapper = OpenAiMapper::deepseek();
        let chunk = mapper
            .map_stream_chunk(
                json!({
                    "choices": [],
                    "usage": {
                        "prompt_tokens": 20, "completion_tokens": 5, "total_tokens": 25,
                        "prompt_cache_hit_tokens": 16
                    }
                }),
                "m",
                "deepseek",
                "r",
            )
            .unwrap();
        assert_eq!(chunk.usage.unwrap().cached_tokens(), 16);
    }

    #[test]
    fn tool_call_deltas_pass_through() {
        let mapper = OpenAiMapper::generic("test");
        let chunk = mapper
            .map_stream_chunk(
                json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                    {"index": 0, "id": "call_9", "type": "function",
                     "function": {"name": "get_weather", "arguments": "{\"loc"}}
                ]}}]}),
                "m",
                "openrouter",
                "r",
            )
            .unwrap();
        let calls = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("call_9"));
        assert_eq!(
            calls[0].function.as_ref().unwrap().arguments.as_deref(),
            Some("{\"loc")
        );
    }
}
