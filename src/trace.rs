//! Per-dispatch agent trace.

use crate::types::{Message, Role};

/// Content of the most recent assistant turn, if any.
pub fn pick_last_ai_text(turns: &[Message]) -> Option<&str> {
    turns
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .map(|m| m.content.as_str())
}

/// Log every turn of a dispatch at debug level: role, issued tool calls,
/// tool result pairing and content.
pub fn log_agent_trace(turns: &[Message]) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    if turns.is_empty() {
        tracing::debug!("Agent returned no turns");
        return;
    }
    for (step, message) in turns.iter().enumerate() {
        let step = step + 1;
        tracing::debug!(step, role = role_name(message.role), "Agent step");
        for (index, call) in message.tool_calls.iter().enumerate() {
            tracing::debug!(
                step,
                index = index + 1,
                tool = %call.name,
                call_id = %call.id,
                args = %call.args,
                "Tool call issued"
            );
        }
        if message.role == Role::Tool {
            tracing::debug!(
                step,
                tool = message.tool_name.as_deref().unwrap_or("unknown_tool"),
                call_id = message.tool_call_id.as_deref().unwrap_or(""),
                is_error = message.is_error,
                "Tool response"
            );
        }
        if !message.content.trim().is_empty() {
            tracing::debug!(step, content = %message.content, "Turn content");
        }
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;
    use serde_json::json;

    #[test]
    fn test_pick_last_ai_text() {
        let turns = vec![
            Message::user("q"),
            Message::assistant("first"),
            Message::assistant_with_tool_calls("", vec![ToolCall::new("1", "t", json!({}))]),
            Message::tool_result("1", "t", json!("r"), false),
        ];
        assert_eq!(pick_last_ai_text(&turns), Some(""));
        assert_eq!(pick_last_ai_text(&turns[..2]), Some("first"));
        assert_eq!(pick_last_ai_text(&turns[..1]), None);
    }

    #[test]
    fn test_log_agent_trace_handles_any_turns() {
        log_agent_trace(&[]);
        log_agent_trace(&[
            Message::system("s"),
            Message::assistant_with_tool_calls("", vec![ToolCall::new("1", "t", json!("raw"))]),
            Message::tool_result("1", "t", json!(null), true),
        ]);
    }
}
