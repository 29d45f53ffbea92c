//! Ollama native chat provider (`/api/chat`).
//!
//! Differences from the OpenAI-compatible API that matter here:
//! - sampling settings live under `options` (`num_predict` instead of `max_tokens`)
//! - tool call arguments are JSON objects, not strings
//! - tool calls carry no id, so one is generated when converting
//! - tool result turns name the tool instead of a call id

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::LlmProvider;
use crate::types::{ChatRequest, ChatResponse, Role};
use crate::wire::canonical_tool_calls;

const DEFAULT_API_BASE: &str = "http://localhost:11434";

pub struct OllamaProvider {
    api_base: String,
    client: reqwest::Client,
}

// --- API Request Types (Ollama format) ---

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
    stream: bool,
    options: ApiOptions,
}

#[derive(Serialize)]
struct ApiOptions {
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
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
    parameters: Value,
}

#[derive(Serialize)]
struct ApiToolCall {
    function: ApiToolCallFunction,
}

#[derive(Serialize)]
struct ApiToolCallFunction {
    name: String,
    arguments: Value,
}

// --- API Response Types ---

#[derive(Deserialize, Debug)]
struct ApiResponse {
    message: Option<ApiResponseMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<Value>,
}

// --- Implementation ---

impl OllamaProvider {
    pub fn new(api_base: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            client,
        })
    }

    fn build_api_request(&self, request: &ChatRequest) -> ApiRequest {
        let messages = request
            .messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                let tool_calls = msg
                    .tool_calls
                    .iter()
                    .map(|tc| ApiToolCall {
                        function: ApiToolCallFunction {
                            name: tc.name.clone(),
                            arguments: object_args(&tc.args),
                        },
                    })
                    .collect();
                ApiMessage {
                    role,
                    content: msg.content.clone(),
                    tool_calls,
                    tool_name: if msg.role == Role::Tool {
                        msg.tool_name.clone()
                    } else {
                        None
                    },
                }
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
            tools,
            stream: false,
            options: ApiOptions {
                num_predict: request.max_tokens,
                temperature: request.temperature,
            },
        }
    }

    fn parse_response(&self, api_response: ApiResponse) -> Result<ChatResponse> {
        if let Some(error) = api_response.error {
            anyhow::bail!("Ollama error: {}", error);
        }
        let message = api_response
            .message
            .context("Empty response from Ollama: no message returned")?;

        Ok(ChatResponse {
            content: message.content,
            tool_calls: canonical_tool_calls(&message.tool_calls),
        })
    }
}

/// Ollama rejects string arguments; undecodable ones are wrapped.
fn object_args(args: &Value) -> Value {
    match args {
        Value::Object(_) => args.clone(),
        Value::Null => Value::Object(Map::new()),
        other => {
            let mut wrapped = Map::new();
            wrapped.insert("input".to_string(), other.clone());
            Value::Object(wrapped)
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let api_request = self.build_api_request(request);
        let url = format!("{}/api/chat", self.api_base.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&api_request)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error ({}): {}", status, error_body);
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        self.parse_response(api_response)
    }

    fn name(&self) -> &str {
        "Ollama"
    }
}
