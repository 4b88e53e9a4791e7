//! Tool and function-call DTOs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Function definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolFunction {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the arguments; omitted means no parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// A tool the model may call. Only functions are supported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: ToolKind,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Function,
}

/// Tool choice mode: let the model pick, forbid tools, or force one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    #[default]
    Auto,
    None,
    Required,
}

impl std::str::FromStr for ToolChoiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "none" => Ok(Self::None),
            "required" => Ok(Self::Required),
            _ => Err(format!(
                "unknown tool_choice: {} (use auto, none, or required)",
                s
            )),
        }
    }
}

/// Named-function tool choice (`{"type":"function","function":{"name":...}}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolChoiceFunction {
    #[serde(rename = "type")]
    pub kind: ToolKind,
    pub function: ToolChoiceName,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolChoiceName {
    pub name: String,
}

/// `tool_choice` request field: a mode string or a specific function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(ToolChoiceMode),
    Function(ToolChoiceFunction),
}

/// Function name and raw JSON argument string of one call.
///
/// In deltas the arguments may be partial; accumulation happens in the
/// completion stage keyed by the call id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FunctionCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// One tool call on an assistant message or delta.
///
/// `index` is present in streaming responses and optional in requests, so the
/// same type serves both directions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ToolKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

impl ToolCall {
    /// Full function call with id, used when a wire mapper materializes a
    /// complete call in a single delta.
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: String) -> Self {
        ToolCall {
            id: Some(id.into()),
            kind: Some(ToolKind::Function),
            function: Some(FunctionCall {
                name: Some(name.into()),
                arguments: Some(arguments),
            }),
            index: Some(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_choice_parses_mode_and_function() {
        let choice: ToolChoice = serde_json::from_str(r#""auto""#).unwrap();
        assert_eq!(choice, ToolChoice::Mode(ToolChoiceMode::Auto));

        let choice: ToolChoice =
            serde_json::from_str(r#"{"type":"function","function":{"name":"f"}}"#).unwrap();
        match choice {
            ToolChoice::Function(f) => assert_eq!(f.function.name, "f"),
            other => panic!("expected function choice, got {other:?}"),
        }
    }

    #[test]
    fn tool_choice_mode_from_str_rejects_unknown() {
        assert!("maybe".parse::<ToolChoiceMode>().is_err());
        assert_eq!(
            "required".parse::<ToolChoiceMode>().unwrap(),
            ToolChoiceMode::Required
        );
    }

    #[test]
    fn tool_call_omits_absent_fields() {
        let call = ToolCall {
            function: Some(FunctionCall {
                arguments: Some("{\"x\":1".to_string()),
                ..Default::default()
            }),
            index: Some(0),
            ..Default::default()
        };
        let json = serde_json::to_value(&call).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["index"], 0);
    }
}
