//! Dispatch composition - the core of the query router.
//!
//! The Agent ties the dispatch graph to the history store and turns one
//! caller request into one caller response:
//!
//! ```text
//! DispatchRequest
//!     |
//!     v
//! [system] + history + [user] --> DispatchGraph --> turns
//!                                                     |
//!                   answer + tool summary  <----------+----> HistoryStore
//! ```
//!
//! A dispatch either completes and writes history, or fails and writes
//! nothing. Dropping the future mid-dispatch also writes nothing.

use std::sync::Arc;

use crate::catalog::ToolCatalog;
use crate::error::DispatchError;
use crate::extract::extract_tool_call;
use crate::graph::{DispatchGraph, RunConfig};
use crate::history::HistoryStore;
use crate::injector::parse_session_id;
use crate::trace::{log_agent_trace, pick_last_ai_text};
use crate::types::{DispatchRequest, DispatchResponse, Message, Role};

pub struct Agent {
    graph: DispatchGraph,
    history: Arc<HistoryStore>,
    system_prompt: String,
}

impl Agent {
    pub fn new(
        graph: DispatchGraph,
        history: Arc<HistoryStore>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            graph,
            history,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        self.graph.catalog()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Route one query.
    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchResponse, DispatchError> {
        if request.query.trim().is_empty() {
            return Err(DispatchError::EmptyQuery);
        }

        let session_id = match request.session_id.as_deref() {
            Some(raw) if !raw.trim().is_empty() => {
                let parsed = parse_session_id(raw);
                if parsed.is_none() {
                    tracing::warn!(session_id = %raw, "Invalid session id, dispatching without history");
                }
                parsed
            }
            _ => None,
        };

        // Held until the end of this call, so same-session dispatches queue up.
        let _session_guard = match &session_id {
            Some(id) => Some(self.history.lock_session(id).await),
            None => None,
        };

        let history = match &session_id {
            Some(id) => self.history.load(id).await,
            None => Vec::new(),
        };

        let mut turns = Vec::with_capacity(history.len() + 2);
        turns.push(Message::system(&self.system_prompt));
        turns.extend(history);
        let exchange_start = turns.len();
        turns.push(Message::user(&request.query));

        let config = RunConfig::with_session(session_id.clone());
        let turns = match self.graph.run(turns, &config).await {
            Ok(turns) => turns,
            Err(e) => {
                tracing::warn!(error = %e, session_id = session_id.as_deref().unwrap_or(""), "Dispatch failed");
                return Err(e);
            }
        };

        log_agent_trace(&turns);

        let answer = pick_last_ai_text(&turns).unwrap_or_default().to_string();
        let tool_response = extract_tool_call(&turns[exchange_start..]);
        tracing::info!(
            tool = tool_response
                .as_ref()
                .and_then(|s| s.tool_name.as_deref())
                .unwrap_or("none"),
            "Dispatch complete"
        );

        if let Some(id) = &session_id {
            let stored: Vec<Message> = turns
                .into_iter()
                .filter(|m| m.role != Role::System)
                .collect();
            self.history.replace(id, stored).await;
        }

        Ok(DispatchResponse {
            answer,
            tool_response,
        })
    }
}
