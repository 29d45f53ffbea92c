//! Extraction of the tool activity of one exchange into a [`ToolSummary`].
//!
//! Turns are scanned newest to oldest. The first tool result seen fixes the
//! pairing key (its `tool_call_id`); the assistant turn that issued the
//! matching call then contributes name, arguments and id. Scanning stops at
//! the first user turn once anything has been captured, so activity from
//! earlier exchanges never leaks into the summary.

use serde_json::Value;

use crate::normalize::{loads_json_string, normalize};
use crate::types::{Message, Role, ToolCall, ToolSummary};

pub fn extract_tool_call(turns: &[Message]) -> Option<ToolSummary> {
    let mut summary = ToolSummary::default();
    let mut pairing_key: Option<&str> = None;
    let mut response_recorded = false;
    let mut call_captured = false;

    for message in turns.iter().rev() {
        match message.role {
            Role::Tool if !response_recorded => {
                response_recorded = true;
                pairing_key = message.tool_call_id.as_deref().filter(|id| !id.is_empty());
                summary.tool_response_content = response_content(message);
                if message.tool_name.is_some() {
                    summary.tool_name = message.tool_name.clone();
                }
            }
            Role::Assistant if !call_captured && !message.tool_calls.is_empty() => {
                let matching = message.tool_calls.iter().rev().find(|call| {
                    match pairing_key {
                        Some(key) => call.id.is_empty() || call.id == key,
                        None => true,
                    }
                });
                if let Some(call) = matching {
                    capture_call(&mut summary, call);
                    call_captured = true;
                }
            }
            Role::User if !summary.is_empty() => break,
            _ => {}
        }
    }

    if summary.is_empty() {
        None
    } else {
        Some(summary)
    }
}

/// The normalized result of a tool turn, falling back to its raw content.
fn response_content(message: &Message) -> Option<Value> {
    let raw = match &message.payload {
        Some(payload) => payload.clone(),
        None => Value::String(message.content.clone()),
    };
    normalize(&raw)
}

fn capture_call(summary: &mut ToolSummary, call: &ToolCall) {
    if summary.tool_name.is_none() && !call.name.is_empty() {
        summary.tool_name = Some(call.name.clone());
    }
    if !call.args.is_null() {
        let args = match &call.args {
            Value::String(raw) => loads_json_string(raw).unwrap_or_else(|| call.args.clone()),
            other => other.clone(),
        };
        summary.tool_args = Some(args);
    }
    if summary.tool_call_id.is_none() && !call.id.is_empty() {
        summary.tool_call_id = Some(call.id.clone());
    }
}
