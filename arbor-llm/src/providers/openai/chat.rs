//! OpenAI chat completions with tool calling

use super::client::OpenAIClient;
use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, Message, Tool, ToolFunction,
};
use crate::providers::invalid_response;
use crate::{
    CompletionRequest, FunctionCall, LanguageModel, ModelResponse, TokenUsage, ToolChoice,
};
use arbor_core::ArborResult;
use async_trait::async_trait;

/// Function-calling model backed by an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAILanguageModel {
    client: OpenAIClient,
    model: String,
}

impl OpenAILanguageModel {
    pub fn new(client: OpenAIClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        let tools: Vec<Tool> = request
            .functions
            .iter()
            .map(|f| Tool {
                r#type: "function",
                function: ToolFunction {
                    name: f.name.clone(),
                    description: f.description.clone(),
                    parameters: f.parameters.clone(),
                },
            })
            .collect();
        // tool_choice is only meaningful with tools present
        let tool_choice = if tools.is_empty() {
            None
        } else {
            Some(request.tool_choice.as_str().to_string())
        };

        ChatCompletionRequest {
            model: self.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| Message {
                    role: m.role.as_str().to_string(),
                    content: Some(m.content.clone()),
                    tool_calls: None,
                })
                .collect(),
            tools,
            tool_choice,
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
        }
    }
}

fn into_model_response(response: ChatCompletionResponse) -> ArborResult<ModelResponse> {
    let usage = response.usage.map(|u| TokenUsage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens.unwrap_or(0),
    });
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| invalid_response("openai", "No choices in response"))?;

    let function_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| FunctionCall {
            id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
        })
        .collect();

    Ok(ModelResponse {
        text: choice.message.content.filter(|c| !c.trim().is_empty()),
        function_calls,
        usage,
    })
}

#[async_trait]
impl LanguageModel for OpenAILanguageModel {
    async fn complete(&self, request: &CompletionRequest) -> ArborResult<ModelResponse> {
        let body = self.build_request(request);
        let response: ChatCompletionResponse =
            self.client.request("chat/completions", &body).await?;
        let response = into_model_response(response)?;
        tracing::debug!(
            model = %self.model,
            calls = response.function_calls.len(),
            forced = request.tool_choice == ToolChoice::Required,
            "chat completion finished"
        );
        Ok(response)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChatMessage, FunctionSpec};
    use serde_json::json;

    fn model() -> OpenAILanguageModel {
        OpenAILanguageModel::new(OpenAIClient::new("sk-test", 60), "gpt-4o-mini")
    }

    #[test]
    fn test_request_carries_tools_and_choice() {
        let request = CompletionRequest {
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("rename")],
            functions: vec![FunctionSpec {
                name: "update_node".to_string(),
                description: "d".to_string(),
                parameters: json!({"type": "object"}),
            }],
            tool_choice: ToolChoice::Required,
            temperature: 0.2,
            max_tokens: 2000,
        };
        let body = serde_json::to_value(model().build_request(&request)).unwrap();
        assert_eq!(body["tool_choice"], "required");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "update_node");
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn test_request_without_tools_omits_choice() {
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            functions: vec![],
            tool_choice: ToolChoice::Required,
            temperature: 0.0,
            max_tokens: 10,
        };
        let body = serde_json::to_value(model().build_request(&request)).unwrap();
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_response_maps_tool_calls() {
        let raw = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "delete_node", "arguments": "{\"node_identifier\":\"Step A\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        });
        let response: ChatCompletionResponse = serde_json::from_value(raw).unwrap();
        let mapped = into_model_response(response).unwrap();
        assert!(mapped.text.is_none());
        assert_eq!(mapped.function_calls[0].name, "delete_node");
        assert_eq!(mapped.usage.unwrap().completion_tokens, 5);
    }

    #[test]
    fn test_empty_choices_is_invalid() {
        let response: ChatCompletionResponse =
            serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(into_model_response(response).is_err());
    }
}
