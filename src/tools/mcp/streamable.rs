//! Streamable HTTP transport.
//!
//! The client initializes lazily on first use, remembers the
//! `Mcp-Session-Id` the server hands out and sends it back on every
//! request. Servers may answer a POST with a plain JSON body or with a
//! `text/event-stream` body; in the latter case the first event carrying a
//! response with our request id is used.
//!
//! A 404 for a request that carried a session id means the server forgot
//! the session (typically after a restart): the client drops it, runs the
//! handshake again and retries the request once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

use super::{
    build_headers, call_remote_tool, initialize_params, list_all_tools, request_body,
    rpc_result, server_name, JsonRpc, SseDecoder,
};
use crate::tools::{ToolBackend, ToolOutput};
use crate::types::ToolDefinition;

const SESSION_HEADER: &str = "mcp-session-id";

/// The server no longer knows the session we sent.
#[derive(Debug, thiserror::Error)]
#[error("MCP session {session} expired")]
struct SessionExpired {
    session: String,
}

pub struct McpClient {
    endpoint: String,
    headers: HeaderMap,
    client: reqwest::Client,
    session: RwLock<Option<String>>,
    initialized: Mutex<bool>,
    next_id: AtomicU64,
}

impl McpClient {
    pub fn new(
        endpoint: impl Into<String>,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            endpoint: endpoint.into(),
            headers: build_headers(headers, "application/json, text/event-stream")?,
            client,
            session: RwLock::new(None),
            initialized: Mutex::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    /// Run the MCP handshake unless a live session exists.
    pub async fn ensure_initialized(&self) -> Result<()> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }
        let result = self
            .send("initialize", initialize_params())
            .await
            .context("MCP initialize failed")?;
        tracing::info!(
            endpoint = %self.endpoint,
            server = server_name(&result),
            "MCP session initialized"
        );
        self.notify("notifications/initialized").await?;
        *initialized = true;
        Ok(())
    }

    /// Forget `stale` so the next request runs the handshake again. A session
    /// replaced by a concurrent re-initialization is left alone.
    async fn reset_session(&self, stale: &str) {
        let mut initialized = self.initialized.lock().await;
        let mut session = self.session.write().await;
        if session.as_deref() == Some(stale) {
            *session = None;
            *initialized = false;
        }
    }

    /// Send one request on the current session.
    async fn send(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .post(&request_body(id, method, params), Some(id))
            .await?
            .with_context(|| format!("MCP server sent no response to {}", method))?;
        rpc_result(method, response)
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let body = json!({ "jsonrpc": "2.0", "method": method });
        self.post(&body, None).await?;
        Ok(())
    }

    /// POST one message. Returns the matching JSON-RPC response, if any.
    async fn post(&self, body: &Value, id: Option<u64>) -> Result<Option<Value>> {
        let sent_session = self.session.read().await.clone();
        let mut request = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(body);
        if let Some(session) = sent_session.as_deref() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("MCP request to {} failed", self.endpoint))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            if let Some(session) = sent_session {
                return Err(SessionExpired { session }.into());
            }
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session.write().await = Some(session.to_string());
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!(
                "MCP endpoint returned HTTP {}: {}",
                status.as_u16(),
                error_body.chars().take(400).collect::<String>()
            );
        }
        if status == StatusCode::ACCEPTED || id.is_none() {
            return Ok(None);
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_event_stream {
            return read_event_stream(response, id).await;
        }

        let text = response
            .text()
            .await
            .context("Failed to read MCP response")?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let value = serde_json::from_str(&text).context("Invalid MCP JSON response")?;
        Ok(Some(value))
    }
}

#[async_trait]
impl JsonRpc for McpClient {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.ensure_initialized().await?;
        let err = match self.send(method, params.clone()).await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };
        let Some(stale) = err
            .downcast_ref::<SessionExpired>()
            .map(|expired| expired.session.clone())
        else {
            return Err(err);
        };

        tracing::warn!(
            endpoint = %self.endpoint,
            session = %stale,
            method,
            "MCP session expired, initializing a new one"
        );
        self.reset_session(&stale).await;
        self.ensure_initialized().await?;
        self.send(method, params).await
    }
}

#[async_trait]
impl ToolBackend for McpClient {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        list_all_tools(self).await
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<ToolOutput> {
        call_remote_tool(self, name, args).await
    }

    fn name(&self) -> &str {
        "mcp"
    }
}

/// Read SSE events until one carries the response to `id`.
async fn read_event_stream(response: reqwest::Response, id: Option<u64>) -> Result<Option<Value>> {
    let mut byte_stream = response.bytes_stream();
    let mut decoder = SseDecoder::default();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.context("MCP stream read error")?;
        for event in decoder.push(&chunk) {
            if let Some(message) = matching_response(&event.data, id) {
                return Ok(Some(message));
            }
        }
    }
    for event in decoder.finish() {
        if let Some(message) = matching_response(&event.data, id) {
            return Ok(Some(message));
        }
    }
    Ok(None)
}

fn matching_response(data: &str, id: Option<u64>) -> Option<Value> {
    let message: Value = serde_json::from_str(data).ok()?;
    let is_response = message.get("result").is_some() || message.get("error").is_some();
    let id_matches = match (id, message.get("id")) {
        (Some(want), Some(got)) => got.as_u64() == Some(want),
        _ => true,
    };
    (is_response && id_matches).then_some(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_response() {
        let data = r#"{"jsonrpc":"2.0","id":7,"result":{}}"#;
        assert!(matching_response(data, Some(7)).is_some());
        assert!(matching_response(data, Some(8)).is_none());
        let notification = r#"{"jsonrpc":"2.0","method":"notifications/message"}"#;
        assert!(matching_response(notification, Some(7)).is_none());
    }

    #[test]
    fn test_session_expired_is_recognizable() {
        let err: anyhow::Error = SessionExpired {
            session: "s-1".to_string(),
        }
        .into();
        let err = err.context("MCP tools/call failed");
        assert_eq!(
            err.downcast_ref::<SessionExpired>().map(|e| e.session.as_str()),
            Some("s-1")
        );
    }
}
