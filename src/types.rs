//! Core data types used throughout query-router.
//!
//! This module defines the conversation turns, tool call structures,
//! and request/response formats that flow between the dispatch graph,
//! the model providers, the tool backends and the HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Message Roles ---

/// The role of a turn in the conversation.
///
/// - `System`: routing instructions, prepended on every dispatch
/// - `User`: the caller's query
/// - `Assistant`: the model's decision (text and/or tool calls)
/// - `Tool`: the result of one tool invocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

// --- Tool Call ---

/// A tool invocation request issued by the model.
///
/// This is the canonical shape: every provider converts its own wire format
/// into it through [`crate::wire::canonical_tool_call`]. `args` is usually a
/// JSON object, but may be a string when the model produced arguments that
/// could not be decoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Identifier used to pair the result turn with this request
    pub id: String,
    /// Name of the tool to invoke (e.g. "get_card_description")
    pub name: String,
    /// Arguments for the tool
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    /// Arguments encoded the way chat-completion APIs expect them (a JSON string).
    pub fn args_json(&self) -> String {
        match &self.args {
            Value::String(raw) => raw.clone(),
            Value::Null => "{}".to_string(),
            other => other.to_string(),
        }
    }
}

// --- Tool Definition ---

/// Describes a tool's interface to the model via JSON Schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// The tool's name (must match what the backend exposes)
    pub name: String,
    /// Human-readable description the model uses to pick the tool
    pub description: String,
    /// Schema describing the tool's input parameters
    pub input_schema: Value,
}

// --- Messages ---

/// A single turn in the conversation history.
///
/// The conversation is modeled as a `Vec<Message>`; insertion order is
/// conversation order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    /// Text of the turn. For tool results this is a rendering of `payload`.
    #[serde(default)]
    pub content: String,
    /// If the assistant wants to call tools, this will be non-empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool result turns, this links back to the tool call id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool result turns, the tool that produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// For tool result turns, the raw payload as returned by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// For tool result turns, whether the backend flagged the result as an error
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: None,
            tool_name: None,
            payload: None,
            is_error: false,
        }
    }

    /// Create a system message (routing instructions).
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Create an assistant message (text reply from the model).
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Create an assistant message that includes tool calls.
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Create a tool result message carrying the backend's raw payload.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        payload: Value,
        is_error: bool,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            is_error,
            payload: Some(payload.clone()),
            ..Self::plain(Role::Tool, render_payload(&payload))
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// Render a tool payload as text for the model: text fragments are joined
/// with newlines, strings pass through, everything else is JSON-encoded.
pub fn render_payload(payload: &Value) -> String {
    match payload {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(items) => {
            let chunks: Vec<String> = items
                .iter()
                .map(|item| match item.get("text").and_then(Value::as_str) {
                    Some(text) => text.to_string(),
                    None => item.to_string(),
                })
                .collect();
            if chunks.is_empty() {
                payload.to_string()
            } else {
                chunks.join("\n")
            }
        }
        other => other.to_string(),
    }
}

// --- Chat Request / Response ---

/// A request to send to the model-decision capability.
///
/// This is our internal representation; the provider converts it
/// into its own API format.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Tools the model may choose from
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// The model's decision: a text reply, tool calls, or both.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// The text content of the response (may be empty if only tool calls)
    pub content: String,
    /// Tool calls the model wants to make (empty if just a text reply)
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    /// Returns true if the model wants to call tools.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Convert the decision into the assistant turn appended to the conversation.
    pub fn into_message(self) -> Message {
        if !self.has_tool_calls() {
            Message::assistant(self.content)
        } else {
            Message::assistant_with_tool_calls(self.content, self.tool_calls)
        }
    }
}

// --- Caller-facing types ---

/// Structured summary of the tool activity of one dispatch.
///
/// Any subset of the fields may be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_response_content: Option<Value>,
}

impl ToolSummary {
    pub fn is_empty(&self) -> bool {
        self.tool_name.is_none()
            && self.tool_args.is_none()
            && self.tool_call_id.is_none()
            && self.tool_response_content.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl DispatchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchResponse {
    /// Empty rather than absent when no text was produced
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_response: Option<ToolSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_result_renders_fragments() {
        let payload = json!([
            {"type": "text", "text": "{\"a\""},
            {"type": "text", "text": ":1}"}
        ]);
        let msg = Message::tool_result("call_1", "get_card_description", payload.clone(), false);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.content, "{\"a\"\n:1}");
        assert_eq!(msg.payload, Some(payload));
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_args_json() {
        let call = ToolCall::new("c", "t", json!({"q": "x"}));
        assert_eq!(call.args_json(), r#"{"q":"x"}"#);
        let raw = ToolCall::new("c", "t", json!("not json"));
        assert_eq!(raw.args_json(), "not json");
        let none = ToolCall::new("c", "t", Value::Null);
        assert_eq!(none.args_json(), "{}");
    }

    #[test]
    fn test_message_serde_skips_empty_fields() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json, json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_response_omits_missing_tool_response() {
        let resp = DispatchResponse {
            answer: String::new(),
            tool_response: None,
        };
        assert_eq!(serde_json::to_value(&resp).unwrap(), json!({"answer": ""}));
    }

    #[test]
    fn test_decision_into_message() {
        let text = ChatResponse {
            content: "hello".into(),
            tool_calls: vec![],
        };
        assert!(!text.into_message().has_tool_calls());

        let call = ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall::new("1", "t", json!({}))],
        };
        assert!(call.into_message().has_tool_calls());
    }
}
