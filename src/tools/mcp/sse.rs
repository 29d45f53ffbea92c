//! Legacy HTTP+SSE transport.
//!
//! A GET on the configured URL opens an event stream whose first `endpoint`
//! event names the URL to POST messages to. The POSTs are only acknowledged
//! (202); responses come back as `message` events on the GET stream and are
//! routed to the waiting request by JSON-RPC id.
//!
//! The connection is opened lazily. When the stream ends, pending requests
//! fail and the next request reconnects and runs the handshake again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::{
    build_headers, call_remote_tool, initialize_params, list_all_tools, request_body,
    rpc_result, server_name, JsonRpc, SseDecoder,
};
use crate::tools::{ToolBackend, ToolOutput};
use crate::types::ToolDefinition;

/// The server no longer accepts messages for the announced endpoint.
#[derive(Debug, thiserror::Error)]
#[error("MCP session at {endpoint} is gone")]
struct SessionGone {
    endpoint: String,
}

type Pending = Arc<StdMutex<HashMap<u64, oneshot::Sender<Value>>>>;

fn lock_pending(pending: &Pending) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One open event stream and the POST endpoint it announced.
struct Connection {
    post_url: Url,
    pending: Pending,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Connection {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

pub struct SseMcpClient {
    url: String,
    headers: HeaderMap,
    client: reqwest::Client,
    timeout: Duration,
    connection: Mutex<Option<Arc<Connection>>>,
    next_id: AtomicU64,
}

impl SseMcpClient {
    /// `timeout` bounds connecting, each POST and each wait for a response;
    /// the event stream itself stays open indefinitely.
    pub fn new(
        url: impl Into<String>,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            url: url.into(),
            headers: build_headers(headers, "text/event-stream")?,
            client,
            timeout,
            connection: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    /// The open connection, connecting and initializing first if needed.
    async fn connection(&self) -> Result<Arc<Connection>> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref().filter(|c| c.is_open()) {
            return Ok(connection.clone());
        }
        *slot = None;

        let connection = Arc::new(self.connect().await?);
        let result = self
            .exchange(&connection, "initialize", initialize_params())
            .await
            .context("MCP initialize failed")?;
        tracing::info!(
            url = %self.url,
            endpoint = %connection.post_url,
            server = server_name(&result),
            "MCP SSE session initialized"
        );
        let notification = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        self.post(&connection, &notification).await?;

        *slot = Some(connection.clone());
        Ok(connection)
    }

    /// Open the event stream and wait for its `endpoint` event.
    async fn connect(&self) -> Result<Connection> {
        let request = self.client.get(&self.url).headers(self.headers.clone());
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .with_context(|| format!("Timed out connecting to MCP SSE endpoint {}", self.url))?
            .with_context(|| format!("MCP SSE request to {} failed", self.url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("MCP SSE endpoint returned HTTP {}", status.as_u16());
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut decoder = SseDecoder::default();
        let announced = tokio::time::timeout(self.timeout, async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.context("MCP stream read error")?;
                if let Some(event) = decoder
                    .push(&chunk)
                    .into_iter()
                    .find(|event| event.event == "endpoint")
                {
                    return Ok::<_, anyhow::Error>(event.data);
                }
            }
            bail!("MCP SSE stream closed before announcing an endpoint")
        })
        .await
        .context("Timed out waiting for the MCP endpoint event")??;

        let post_url = Url::parse(&self.url)
            .and_then(|base| base.join(announced.trim()))
            .with_context(|| format!("Invalid MCP endpoint '{}'", announced))?;

        let pending: Pending = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_messages(
            stream,
            decoder,
            pending.clone(),
            closed.clone(),
        ));
        Ok(Connection {
            post_url,
            pending,
            closed,
            reader,
        })
    }

    /// POST a request on `connection` and wait for its response event.
    async fn exchange(&self, connection: &Connection, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock_pending(&connection.pending).insert(id, tx);

        if let Err(e) = self.post(connection, &request_body(id, method, params)).await {
            lock_pending(&connection.pending).remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => bail!("MCP SSE stream closed while waiting for {}", method),
            Err(_) => {
                lock_pending(&connection.pending).remove(&id);
                bail!("Timed out waiting for MCP response to {}", method)
            }
        };
        rpc_result(method, response)
    }

    async fn post(&self, connection: &Connection, body: &Value) -> Result<()> {
        let response = self
            .client
            .post(connection.post_url.clone())
            .headers(self.headers.clone())
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("MCP request to {} failed", connection.post_url))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            connection.closed.store(true, Ordering::SeqCst);
            return Err(SessionGone {
                endpoint: connection.post_url.to_string(),
            }
            .into());
        }
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!(
                "MCP endpoint returned HTTP {}: {}",
                status.as_u16(),
                error_body.chars().take(400).collect::<String>()
            );
        }
        Ok(())
    }
}

/// Route `message` events to the requests waiting on them until the stream ends.
async fn read_messages<S, B>(mut stream: S, mut decoder: SseDecoder, pending: Pending, closed: Arc<AtomicBool>)
where
    S: Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, "MCP SSE stream read error");
                break;
            }
        };
        for event in decoder.push(chunk.as_ref()) {
            if event.event == "message" {
                deliver(&event.data, &pending);
            }
        }
    }
    for event in decoder.finish() {
        if event.event == "message" {
            deliver(&event.data, &pending);
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders fails every request still waiting.
    lock_pending(&pending).clear();
    tracing::warn!("MCP SSE stream closed");
}

fn deliver(data: &str, pending: &Pending) {
    let Ok(message) = serde_json::from_str::<Value>(data) else {
        tracing::debug!("Skipping non-JSON MCP SSE event");
        return;
    };
    let is_response = message.get("result").is_some() || message.get("error").is_some();
    let Some(id) = message.get("id").and_then(Value::as_u64).filter(|_| is_response) else {
        return;
    };
    if let Some(tx) = lock_pending(pending).remove(&id) {
        let _ = tx.send(message);
    }
}

#[async_trait]
impl JsonRpc for SseMcpClient {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let connection = self.connection().await?;
        let err = match self.exchange(&connection, method, params.clone()).await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };
        if err.downcast_ref::<SessionGone>().is_none() {
            return Err(err);
        }

        tracing::warn!(url = %self.url, method, "MCP SSE session gone, reconnecting");
        let connection = self.connection().await?;
        self.exchange(&connection, method, params).await
    }
}

#[async_trait]
impl ToolBackend for SseMcpClient {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        list_all_tools(self).await
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<ToolOutput> {
        call_remote_tool(self, name, args).await
    }

    fn name(&self) -> &str {
        "mcp-sse"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_routes_by_id() {
        let pending: Pending = Arc::default();
        let (tx, mut rx) = oneshot::channel();
        lock_pending(&pending).insert(3, tx);

        deliver(r#"{"jsonrpc":"2.0","method":"notifications/message"}"#, &pending);
        deliver(r#"{"jsonrpc":"2.0","id":4,"result":{}}"#, &pending);
        deliver("not json", &pending);
        assert!(rx.try_recv().is_err());

        deliver(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#, &pending);
        assert_eq!(rx.try_recv().unwrap()["result"]["ok"], true);
        assert!(lock_pending(&pending).is_empty());
    }

    #[test]
    fn test_relative_endpoint_resolves_against_stream_url() {
        let base = Url::parse("http://localhost:8000/sse").unwrap();
        assert_eq!(
            base.join("/messages/?session_id=abc").unwrap().as_str(),
            "http://localhost:8000/messages/?session_id=abc"
        );
        assert_eq!(
            base.join("http://other:9000/messages").unwrap().as_str(),
            "http://other:9000/messages"
        );
    }
}
