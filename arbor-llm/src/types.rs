//! Provider-neutral function-calling request and response types

use arbor_core::LlmError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A callable function offered to the model: name, description and a JSON
/// schema for its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Whether the model must, may or must not call functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
    None,
}

impl ToolChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Required => "required",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub functions: Vec<FunctionSpec>,
    pub tool_choice: ToolChoice,
    pub temperature: f32,
    pub max_tokens: i32,
}

/// One function call returned by the model. Arguments stay raw until parsed
/// so a malformed call can be dropped on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::now_v7().simple()),
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }

    /// Parse the argument payload into a JSON object.
    pub fn parse_arguments(&self) -> Result<Map<String, Value>, LlmError> {
        let raw = self.arguments.trim();
        if raw.is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(LlmError::MalformedArguments {
                function: self.name.clone(),
                reason: format!("expected a JSON object, got {}", json_kind(&other)),
            }),
            Err(e) => Err(LlmError::MalformedArguments {
                function: self.name.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

/// Model output: optional prose plus zero or more function calls.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub function_calls: Vec<FunctionCall>,
    pub usage: Option<TokenUsage>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn calls(function_calls: Vec<FunctionCall>) -> Self {
        Self {
            function_calls,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments_object() {
        let call = FunctionCall::new("update_node", json!({"node_identifier": "Step A"}));
        let args = call.parse_arguments().unwrap();
        assert_eq!(args["node_identifier"], json!("Step A"));
    }

    #[test]
    fn test_parse_arguments_rejects_garbage() {
        let call = FunctionCall {
            id: "c1".to_string(),
            name: "update_node".to_string(),
            arguments: "{\"node_identifier\": ".to_string(),
        };
        let err = call.parse_arguments().unwrap_err();
        assert!(matches!(err, LlmError::MalformedArguments { ref function, .. } if function == "update_node"));
    }

    #[test]
    fn test_parse_arguments_rejects_non_object() {
        let call = FunctionCall {
            id: "c1".to_string(),
            name: "delete_node".to_string(),
            arguments: "[1, 2]".to_string(),
        };
        let err = call.parse_arguments().unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_empty_arguments_parse_as_empty_object() {
        let call = FunctionCall {
            id: "c1".to_string(),
            name: "find_block".to_string(),
            arguments: "  ".to_string(),
        };
        assert!(call.parse_arguments().unwrap().is_empty());
    }
}
