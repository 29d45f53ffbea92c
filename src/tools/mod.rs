//! Tool backends.
//!
//! A `ToolBackend` is where a selected tool actually runs. Two backends
//! exist:
//! - [`mcp::McpClient`] / [`mcp::SseMcpClient`]: a remote MCP server spoken
//!   to over HTTP
//! - [`ToolRouter`]: a registry of in-process [`Tool`] implementations
//!
//! Backends report failures two ways. An `Err` means the call could not be
//! made at all and aborts the dispatch. A `ToolOutput` with `is_error` set is
//! an in-band error result: it becomes a normal tool-result turn.

pub mod mcp;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::types::ToolDefinition;

/// Result of one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Raw payload, in whatever shape the tool produced
    pub payload: Value,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(payload: Value) -> Self {
        Self {
            payload,
            is_error: false,
        }
    }

    pub fn error(payload: Value) -> Self {
        Self {
            payload,
            is_error: true,
        }
    }
}

#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Tools this backend exposes.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>>;

    /// Run `name` with `args`.
    async fn call_tool(&self, name: &str, args: Value) -> Result<ToolOutput>;

    /// Backend display name (for logging).
    fn name(&self) -> &str;
}

/// Trait that in-process tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g. "query_term_database").
    fn name(&self) -> &str;

    /// What the tool does. The model reads this to decide when to use it.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's input parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given JSON arguments.
    async fn execute(&self, params: Value) -> Result<Value>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters_schema(),
        }
    }
}

/// Routes tool calls to in-process tool implementations by name.
pub struct ToolRouter {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolBackend for ToolRouter {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        Ok(self.definitions())
    }

    /// Unknown tools are a hard error; a tool's own failure is reported in-band.
    async fn call_tool(&self, name: &str, args: Value) -> Result<ToolOutput> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .with_context(|| format!("Unknown tool: {}", name))?;

        match tool.execute(args).await {
            Ok(payload) => Ok(ToolOutput::ok(payload)),
            Err(e) => Ok(ToolOutput::error(json!({ "error": format!("{:#}", e) }))),
        }
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Runtime::new().unwrap()
    }

    struct TermTool;

    #[async_trait]
    impl Tool for TermTool {
        fn name(&self) -> &str {
            "query_term_database"
        }

        fn description(&self) -> &str {
            "Look up a card term"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            })
        }

        async fn execute(&self, params: Value) -> Result<Value> {
            let query = params
                .get("query")
                .and_then(|v| v.as_str())
                .context("Missing required parameter: query")?;
            Ok(json!([{ "type": "text", "text": format!("{{\"term\": \"{}\"}}", query) }]))
        }
    }

    fn router() -> ToolRouter {
        let mut router = ToolRouter::new();
        router.register(Box::new(TermTool));
        router
    }

    #[test]
    fn test_definitions() {
        let router = router();
        assert_eq!(router.len(), 1);
        assert!(router.has_tool("query_term_database"));
        assert_eq!(router.definitions()[0].input_schema["required"][0], "query");
    }

    #[test]
    fn test_call_known_tool() {
        rt().block_on(async {
            let output = router()
                .call_tool("query_term_database", json!({ "query": "리볼빙" }))
                .await
                .unwrap();
            assert!(!output.is_error);
            assert_eq!(output.payload[0]["text"], "{\"term\": \"리볼빙\"}");
        });
    }

    #[test]
    fn test_tool_failure_is_in_band() {
        rt().block_on(async {
            let output = router()
                .call_tool("query_term_database", json!({}))
                .await
                .unwrap();
            assert!(output.is_error);
            assert!(output.payload["error"].as_str().unwrap().contains("query"));
        });
    }

    #[test]
    fn test_unknown_tool_is_err() {
        rt().block_on(async {
            let result = router().call_tool("nope", json!({})).await;
            assert!(result.unwrap_err().to_string().contains("Unknown tool"));
        });
    }
}
