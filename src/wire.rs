//! Conversion of provider tool-call payloads into the canonical [`ToolCall`].
//!
//! Accepted shapes:
//! - `{"id", "name", "args"}` (agent-framework style)
//! - `{"id", "name", "arguments"}`
//! - `{"id", "type": "function", "function": {"name", "arguments"}}` (OpenAI)
//! - `{"function": {"name", "arguments": {...}}}` (Ollama, no id)
//!
//! Everything downstream of the providers only sees `ToolCall`.

use serde_json::{Map, Value};

use crate::normalize::loads_json_string;
use crate::types::ToolCall;

/// Convert one wire tool call. Returns `None` when no tool name can be found.
pub fn canonical_tool_call(raw: &Value) -> Option<ToolCall> {
    let name = field(raw, "name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let Some(name) = name else {
        tracing::warn!(raw = %raw, "Dropping tool call without a name");
        return None;
    };

    let id = field(raw, "id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(generate_call_id);

    let args = field(raw, "args")
        .or_else(|| field(raw, "arguments"))
        .map(canonical_args)
        .unwrap_or_else(|| Value::Object(Map::new()));

    Some(ToolCall::new(id, name, args))
}

/// Convert a list of wire tool calls, dropping unusable entries.
pub fn canonical_tool_calls(raw: &[Value]) -> Vec<ToolCall> {
    raw.iter().filter_map(canonical_tool_call).collect()
}

pub fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Look up `key` on the call itself, then on its nested `function` object.
fn field<'a>(raw: &'a Value, key: &str) -> Option<&'a Value> {
    if let Some(value) = raw.get(key).filter(|v| !v.is_null()) {
        return Some(value);
    }
    let function = raw.get("function")?;
    let nested = match key {
        "name" => function.get("name"),
        "args" | "arguments" => function
            .get("arguments")
            .or_else(|| function.get("args")),
        _ => None,
    };
    nested.filter(|v| !v.is_null())
}

fn canonical_args(raw: &Value) -> Value {
    match raw {
        Value::String(text) if text.trim().is_empty() => Value::Object(Map::new()),
        Value::String(text) => match loads_json_string(text) {
            Some(decoded @ Value::Object(_)) => decoded,
            _ => raw.clone(),
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_openai_shape() {
        let raw = json!({
            "id": "call_abc",
            "type": "function",
            "function": {"name": "get_card_description", "arguments": "{\"query\": \"V카드\"}"}
        });
        let call = canonical_tool_call(&raw).unwrap();
        assert_eq!(call.id, "call_abc");
        assert_eq!(call.name, "get_card_description");
        assert_eq!(call.args, json!({"query": "V카드"}));
    }

    #[test]
    fn test_framework_shape() {
        let raw = json!({"id": "x1", "name": "query_faq_database", "args": {"query": "연회비"}});
        let call = canonical_tool_call(&raw).unwrap();
        assert_eq!(call.id, "x1");
        assert_eq!(call.args, json!({"query": "연회비"}));

        let raw = json!({"id": "x2", "name": "query_faq_database", "arguments": {"query": "연회비"}});
        assert_eq!(canonical_tool_call(&raw).unwrap().args, json!({"query": "연회비"}));
    }

    #[test]
    fn test_ollama_shape_gets_generated_id() {
        let raw = json!({"function": {"name": "query_term_database", "arguments": {"query": "리볼빙"}}});
        let call = canonical_tool_call(&raw).unwrap();
        assert!(call.id.starts_with("call_"));
        assert_eq!(call.name, "query_term_database");
        assert_eq!(call.args, json!({"query": "리볼빙"}));
    }

    #[test]
    fn test_shapes_agree() {
        let shapes = [
            json!({"id": "same", "name": "t", "args": {"a": 1}}),
            json!({"id": "same", "type": "function", "function": {"name": "t", "arguments": "{\"a\":1}"}}),
            json!({"id": "same", "function": {"name": "t", "arguments": {"a": 1}}}),
        ];
        let calls = canonical_tool_calls(&shapes);
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| *c == calls[0]));
    }

    #[test]
    fn test_undecodable_args_kept_verbatim() {
        let raw = json!({"id": "1", "name": "t", "arguments": "query=V카드"});
        assert_eq!(canonical_tool_call(&raw).unwrap().args, json!("query=V카드"));
    }

    #[test]
    fn test_empty_and_missing_args() {
        let raw = json!({"id": "1", "name": "t", "arguments": ""});
        assert_eq!(canonical_tool_call(&raw).unwrap().args, json!({}));
        let raw = json!({"id": "1", "name": "t"});
        assert_eq!(canonical_tool_call(&raw).unwrap().args, json!({}));
    }

    #[test]
    fn test_missing_name_dropped() {
        let shapes = [json!({"id": "1", "args": {}}), json!({"id": "2", "name": "ok"})];
        let calls = canonical_tool_calls(&shapes);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "2");
    }
}
