//! Remote MCP tool backends (JSON-RPC 2.0 over HTTP).
//!
//! Two transports are supported, picked by `[mcp] transport`:
//! - [`McpClient`]: streamable HTTP, one POST per message
//! - [`SseMcpClient`]: the legacy HTTP+SSE transport, where responses
//!   arrive on a long-lived GET event stream
//!
//! Both share the handshake parameters, the `tools/list` pagination and the
//! mapping of a `tools/call` result onto [`ToolOutput`].

mod sse;
mod streamable;

pub use sse::SseMcpClient;
pub use streamable::McpClient;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use serde_json::{json, Value};

use super::{ToolBackend, ToolOutput};
use crate::config::{McpConfig, McpTransport};
use crate::types::ToolDefinition;

const MCP_PROTOCOL_VERSION: &str = "2025-03-26";
const MCP_CLIENT_NAME: &str = "query-router";
const MCP_CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build the backend for the configured transport.
pub fn create_backend(config: &McpConfig) -> Result<Arc<dyn ToolBackend>> {
    let backend: Arc<dyn ToolBackend> = match config.transport {
        McpTransport::StreamableHttp => Arc::new(McpClient::new(
            config.url.clone(),
            &config.headers,
            config.timeout(),
        )?),
        McpTransport::Sse => Arc::new(SseMcpClient::new(
            config.url.clone(),
            &config.headers,
            config.timeout(),
        )?),
    };
    Ok(backend)
}

/// A transport that can send one JSON-RPC request and return its `result`.
#[async_trait]
trait JsonRpc: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value>;
}

fn initialize_params() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": MCP_CLIENT_NAME,
            "version": MCP_CLIENT_VERSION,
        }
    })
}

fn request_body(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Unwrap a JSON-RPC response into its `result`; an `error` member is `Err`.
fn rpc_result(method: &str, response: Value) -> Result<Value> {
    if let Some(err) = response.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
        bail!("MCP {} failed ({}): {}", method, code, message);
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

fn server_name(initialize_result: &Value) -> &str {
    initialize_result
        .pointer("/serverInfo/name")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

/// Fetch every page of `tools/list`.
async fn list_all_tools<R: JsonRpc + ?Sized>(rpc: &R) -> Result<Vec<ToolDefinition>> {
    let mut definitions = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let params = match &cursor {
            Some(c) => json!({ "cursor": c }),
            None => json!({}),
        };
        let result = rpc.request("tools/list", params).await?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .context("MCP tools/list result missing tools array")?;
        definitions.extend(tools.iter().filter_map(tool_definition));

        cursor = result
            .get("nextCursor")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if cursor.is_none() {
            break;
        }
    }
    Ok(definitions)
}

/// `tools/call`: `isError` results are in-band, JSON-RPC errors are `Err`.
async fn call_remote_tool<R: JsonRpc + ?Sized>(
    rpc: &R,
    name: &str,
    args: Value,
) -> Result<ToolOutput> {
    let result = rpc
        .request("tools/call", json!({ "name": name, "arguments": args }))
        .await?;
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let payload = ["content", "structuredContent"]
        .iter()
        .find_map(|key| result.get(*key).filter(|v| !v.is_null()).cloned())
        .unwrap_or(result);

    Ok(ToolOutput { payload, is_error })
}

fn tool_definition(row: &Value) -> Option<ToolDefinition> {
    let name = row.get("name").and_then(Value::as_str)?;
    let description = row
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let input_schema = row
        .get("inputSchema")
        .or_else(|| row.get("input_schema"))
        .cloned()
        .unwrap_or_else(|| json!({ "type": "object" }));
    Some(ToolDefinition {
        name: name.to_string(),
        description,
        input_schema,
    })
}

fn build_headers(headers: &HashMap<String, String>, accept: &'static str) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    map.insert(ACCEPT, HeaderValue::from_static(accept));
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.trim().as_bytes())
            .with_context(|| format!("Invalid header name '{}'", key))?;
        let header = HeaderValue::from_str(value.trim())
            .with_context(|| format!("Invalid header value for '{}'", key))?;
        map.insert(name, header);
    }
    Ok(map)
}

/// One `text/event-stream` event.
#[derive(Debug, Clone, PartialEq)]
struct SseEvent {
    /// The `event:` field, `message` when absent
    event: String,
    data: String,
}

/// Line-oriented `text/event-stream` decoder.
///
/// Works on raw bytes and only decodes complete lines, so a multi-byte
/// character split across network chunks comes out intact.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&raw[..newline_pos]);
            self.line(line.trim_end_matches('\r'), &mut events);
        }
        events
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = self.push(b"\n");
        self.dispatch(&mut events);
        events
    }

    fn line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self, events: &mut Vec<SseEvent>) {
        let event = self.event.take();
        if self.data.is_empty() {
            return;
        }
        events.push(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: self.data.join("\n"),
        });
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(events: &[SseEvent]) -> Vec<&str> {
        events.iter().map(|e| e.data.as_str()).collect()
    }

    #[test]
    fn test_sse_decoder_splits_events() {
        let mut decoder = SseDecoder::default();
        let mut events = decoder.push(b"event: message\ndata: {\"a\"");
        assert!(events.is_empty());
        events.extend(decoder.push(b":1}\n\ndata: x\r\n"));
        events.extend(decoder.push(b"data: y\n\n"));
        assert_eq!(data(&events), vec!["{\"a\":1}", "x\ny"]);
        assert!(events.iter().all(|e| e.event == "message"));
    }

    #[test]
    fn test_sse_decoder_flushes_trailing_event() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(data(&decoder.finish()), vec!["tail"]);
    }

    #[test]
    fn test_sse_decoder_keeps_split_multibyte_chars() {
        let frame = "data: {\"text\":\"카드\"}\n\n".as_bytes();
        let split = frame.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&frame[..split]).is_empty());
        let events = decoder.push(&frame[split..]);
        assert_eq!(data(&events), vec!["{\"text\":\"카드\"}"]);
    }

    #[test]
    fn test_sse_decoder_event_names_and_comments() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b": ping\n\nevent: endpoint\ndata: /messages?session_id=1\n\ndata: {}\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "endpoint".to_string(),
                    data: "/messages?session_id=1".to_string()
                },
                SseEvent {
                    event: "message".to_string(),
                    data: "{}".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_rpc_result() {
        let ok = rpc_result("tools/list", json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}));
        assert_eq!(ok.unwrap(), json!({"tools": []}));
        let err = rpc_result(
            "tools/call",
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "nope"}}),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "MCP tools/call failed (-32601): nope");
    }

    #[test]
    fn test_tool_definition_defaults() {
        let def = tool_definition(&json!({"name": "t"})).unwrap();
        assert_eq!(def.description, "");
        assert_eq!(def.input_schema, json!({"type": "object"}));
        assert!(tool_definition(&json!({"description": "no name"})).is_none());
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "v".to_string());
        assert!(build_headers(&headers, "text/event-stream").is_err());
    }

    #[test]
    fn test_create_backend_per_transport() {
        let mut config = McpConfig::default();
        assert_eq!(create_backend(&config).unwrap().name(), "mcp");
        config.transport = McpTransport::Sse;
        assert_eq!(create_backend(&config).unwrap().name(), "mcp-sse");
    }
}
