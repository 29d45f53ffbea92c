//! Session id injection into tool arguments.
//!
//! The model never sees the caller's session id. Right before the tool step
//! runs, every call in the last turn that targets a tool declaring a
//! `session_id` field gets that argument set to the caller's id, replacing
//! whatever the model put there. Calls to other tools are not touched.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::catalog::{ToolCatalog, SESSION_ID_FIELD};
use crate::error::DispatchError;
use crate::graph::{RunConfig, ToolStep};
use crate::normalize::loads_json_string;
use crate::types::Message;

/// Validate a caller-supplied session id (UUID-shaped). Returns the trimmed id.
pub fn parse_session_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    uuid::Uuid::parse_str(trimmed).ok()?;
    Some(trimmed.to_string())
}

/// Inject `session_id` into the session-taking calls of the last turn.
///
/// Returns how many calls were rewritten. Re-running with the same id is a
/// no-op on the arguments.
pub fn inject_session_id(turns: &mut [Message], session_id: &str, catalog: &ToolCatalog) -> usize {
    let Some(last) = turns.last_mut() else {
        return 0;
    };
    let mut injected = 0;
    for call in last
        .tool_calls
        .iter_mut()
        .filter(|call| catalog.requires_session_id(&call.name))
    {
        set_session_arg(&mut call.args, session_id);
        injected += 1;
    }
    injected
}

fn set_session_arg(args: &mut Value, session_id: &str) {
    if let Value::String(raw) = args {
        let decoded = loads_json_string(raw).filter(Value::is_object);
        *args = decoded.unwrap_or_else(|| Value::Object(Map::new()));
    }
    if !args.is_object() {
        *args = Value::Object(Map::new());
    }
    if let Value::Object(map) = args {
        map.insert(
            SESSION_ID_FIELD.to_string(),
            Value::String(session_id.to_string()),
        );
    }
}

/// Wraps a tool step and injects the session id before it runs.
pub struct SessionInjector<S> {
    inner: S,
    catalog: Arc<ToolCatalog>,
}

impl<S> SessionInjector<S> {
    pub fn new(inner: S, catalog: Arc<ToolCatalog>) -> Self {
        Self { inner, catalog }
    }
}

#[async_trait]
impl<S: ToolStep> ToolStep for SessionInjector<S> {
    async fn run(&self, turns: &mut Vec<Message>, config: &RunConfig) -> Result<(), DispatchError> {
        let has_calls = turns.last().is_some_and(|m| !m.tool_calls.is_empty());
        if let (Some(raw), true) = (config.session_id.as_deref(), has_calls) {
            match parse_session_id(raw) {
                Some(session_id) => {
                    let injected = inject_session_id(turns, &session_id, &self.catalog);
                    tracing::debug!(%session_id, injected, "Injected session id into tool calls");
                }
                None => {
                    tracing::warn!(session_id = %raw, "Ignoring malformed session id");
                }
            }
        }
        self.inner.run(turns, config).await
    }
}
