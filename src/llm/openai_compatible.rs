//! OpenAI-compatible chat completions provider.
//!
//! Works against OpenAI itself and anything speaking the same API
//! (Ollama's `/v1`, vLLM, DashScope, ...).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::LlmProvider;
use crate::types::{ChatRequest, ChatResponse, Role};
use crate::wire::canonical_tool_calls;

pub struct OpenAiCompatibleProvider {
    api_key: Option<String>,
    api_base: String,
    client: reqwest::Client,
}

// --- API Request Types (OpenAI format) ---

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct ApiTool {
    r#type: &'static str,
    function: ApiFunction,
}

#[derive(Serialize)]
struct ApiFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
struct ApiToolCall {
    id: String,
    r#type: &'static str,
    function: ApiToolCallFunction,
}

#[derive(Serialize)]
struct ApiToolCallFunction {
    name: String,
    arguments: String,
}

// --- API Response Types ---

#[derive(Deserialize, Debug)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize, Debug)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ApiResponseMessage {
    content: Option<String>,
    /// Kept loose: compatible servers disagree on the exact shape.
    #[serde(default)]
    tool_calls: Option<Vec<serde_json::Value>>,
}

// --- Implementation ---

impl OpenAiCompatibleProvider {
    pub fn new(api_key: Option<String>, api_base: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            api_key,
            api_base: api_base.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            client,
        })
    }

    fn build_api_request(&self, request: &ChatRequest) -> ApiRequest {
        let messages = request
            .messages
            .iter()
            .map(|msg| match msg.role {
                Role::System => ApiMessage {
                    role: "system",
                    content: Some(msg.content.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                Role::User => ApiMessage {
                    role: "user",
                    content: Some(msg.content.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                Role::Assistant => {
                    let tool_calls = if msg.tool_calls.is_empty() {
                        None
                    } else {
                        Some(
                            msg.tool_calls
                                .iter()
                                .map(|tc| ApiToolCall {
                                    id: tc.id.clone(),
                                    r#type: "function",
                                    function: ApiToolCallFunction {
                                        name: tc.name.clone(),
                                        arguments: tc.args_json(),
                                    },
                                })
                                .collect(),
                        )
                    };
                    ApiMessage {
                        role: "assistant",
                        content: if msg.content.is_empty() { None } else { Some(msg.content.clone()) },
                        tool_calls,
                        tool_call_id: None,
                    }
                }
                Role::Tool => ApiMessage {
                    role: "tool",
                    content: Some(msg.content.clone()),
                    tool_calls: None,
                    tool_call_id: msg.tool_call_id.clone(),
                },
            })
            .collect();

        let tools = request
            .tools
            .iter()
            .map(|t| ApiTool {
                r#type: "function",
                function: ApiFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect();

        ApiRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools,
        }
    }

    fn parse_response(&self, api_response: ApiResponse) -> Result<ChatResponse> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .context("Empty response from API: no choices returned")?;

        let content = choice.message.content.unwrap_or_default();
        let tool_calls = canonical_tool_calls(&choice.message.tool_calls.unwrap_or_default());

        Ok(ChatResponse { content, tool_calls })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let api_request = self.build_api_request(request);
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));

        let mut http_request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&api_request);
        if let Some(key) = &self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", key));
        }

        let response = http_request
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, error_body);
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .context("Failed to parse API response")?;

        self.parse_response(api_response)
    }

    fn name(&self) -> &str {
        "OpenAI-Compatible"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, ToolCall, ToolDefinition};
    use serde_json::json;

    fn provider() -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(None, Some("http://localhost:11434/v1/".into()), Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn test_build_request_shapes_turns() {
        let request = ChatRequest {
            model: "qwen2.5".into(),
            messages: vec![
                Message::system("route"),
                Message::user("V카드 알려줘"),
                Message::assistant_with_tool_calls(
                    "",
                    vec![ToolCall::new("c1", "get_card_description", json!({"query": "V카드"}))],
                ),
                Message::tool_result("c1", "get_card_description", json!("{\"ok\":true}"), false),
            ],
            tools: vec![ToolDefinition {
                name: "get_card_description".into(),
                description: "card".into(),
                input_schema: json!({"type": "object"}),
            }],
            max_tokens: 512,
            temperature: Some(0.3),
        };
        let body = serde_json::to_value(provider().build_api_request(&request)).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["content"], serde_json::Value::Null);
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["arguments"],
            "{\"query\":\"V카드\"}"
        );
        assert_eq!(body["messages"][3]["role"], "tool");
        assert_eq!(body["messages"][3]["tool_call_id"], "c1");
        assert_eq!(body["tools"][0]["type"], "function");
        assert!((body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let raw: ApiResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "query_faq_database", "arguments": "{\"query\":\"연회비 왜 내야해?\"}"}
                    }]
                }
            }]
        }))
        .unwrap();
        let response = provider().parse_response(raw).unwrap();
        assert_eq!(response.content, "");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_9");
        assert_eq!(response.tool_calls[0].args, json!({"query": "연회비 왜 내야해?"}));
    }

    #[test]
    fn test_parse_response_without_choices() {
        let raw: ApiResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(provider().parse_response(raw).is_err());
    }
}
