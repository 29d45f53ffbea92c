//! The dispatch graph.
//!
//! ```text
//! start ──> agent-decide ──(tool calls)──> tool-execute ──> end
//!                 │
//!                 └──(no tool calls)────> fallback ──────> end
//! ```
//!
//! The transition function is pure and only looks at the last turn;
//! [`DispatchGraph::run`] walks it, executing each node's effect on the
//! turn sequence. Failures are never retried and never routed to the
//! fallback node.

use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::ToolCatalog;
use crate::error::DispatchError;
use crate::llm::LlmProvider;
use crate::tools::ToolBackend;
use crate::types::{ChatRequest, Message, Role};

/// Per-dispatch configuration handed to every step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunConfig {
    pub session_id: Option<String>,
}

impl RunConfig {
    pub fn with_session(session_id: Option<String>) -> Self {
        Self { session_id }
    }
}

/// The tool-execute step: consumes the calls of the last turn and appends
/// their result turns.
#[async_trait]
pub trait ToolStep: Send + Sync {
    async fn run(&self, turns: &mut Vec<Message>, config: &RunConfig) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Start,
    AgentDecide,
    ToolExecute,
    Fallback,
    End,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Start => "start",
            Node::AgentDecide => "agent-decide",
            Node::ToolExecute => "tool-execute",
            Node::Fallback => "fallback",
            Node::End => "end",
        }
    }
}

/// Next node given the current one and the last turn of the sequence.
pub fn transition(node: Node, last: Option<&Message>) -> Node {
    match node {
        Node::Start => Node::AgentDecide,
        Node::AgentDecide => {
            if last.is_some_and(Message::has_tool_calls) {
                Node::ToolExecute
            } else {
                Node::Fallback
            }
        }
        Node::ToolExecute | Node::Fallback | Node::End => Node::End,
    }
}

/// Executes every call of the last turn against a backend, in order.
pub struct ToolNode {
    backend: Arc<dyn ToolBackend>,
}

impl ToolNode {
    pub fn new(backend: Arc<dyn ToolBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolStep for ToolNode {
    async fn run(&self, turns: &mut Vec<Message>, _config: &RunConfig) -> Result<(), DispatchError> {
        let calls = match turns.last() {
            Some(last) => last.tool_calls.clone(),
            None => return Ok(()),
        };
        for call in calls {
            tracing::info!(tool = %call.name, call_id = %call.id, "Executing tool");
            let output = self
                .backend
                .call_tool(&call.name, call.args.clone())
                .await
                .map_err(|cause| DispatchError::ToolBackend {
                    tool: call.name.clone(),
                    cause,
                })?;
            if output.is_error {
                tracing::warn!(tool = %call.name, "Tool reported an error result");
            }
            turns.push(Message::tool_result(
                &call.id,
                &call.name,
                output.payload,
                output.is_error,
            ));
        }
        Ok(())
    }
}

/// Model settings used by the agent-decide node.
#[derive(Debug, Clone)]
pub struct DecisionSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

pub struct DispatchGraph {
    llm: Arc<dyn LlmProvider>,
    catalog: Arc<ToolCatalog>,
    tool_step: Box<dyn ToolStep>,
    settings: DecisionSettings,
    fallback_answer: String,
}

impl DispatchGraph {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        catalog: Arc<ToolCatalog>,
        tool_step: Box<dyn ToolStep>,
        settings: DecisionSettings,
        fallback_answer: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            catalog,
            tool_step,
            settings,
            fallback_answer: fallback_answer.into(),
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Walk the graph from `start` to `end`, returning the full turn sequence.
    pub async fn run(
        &self,
        mut turns: Vec<Message>,
        config: &RunConfig,
    ) -> Result<Vec<Message>, DispatchError> {
        let mut node = Node::Start;
        while node != Node::End {
            match node {
                Node::Start | Node::End => {}
                Node::AgentDecide => self.decide(&mut turns).await?,
                Node::ToolExecute => self.tool_step.run(&mut turns, config).await?,
                Node::Fallback => self.fallback(&mut turns),
            }
            let next = transition(node, turns.last());
            tracing::debug!(from = node.as_str(), to = next.as_str(), "Graph transition");
            node = next;
        }
        Ok(turns)
    }

    async fn decide(&self, turns: &mut Vec<Message>) -> Result<(), DispatchError> {
        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages: turns.clone(),
            tools: self.catalog.definitions_for_model(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };
        let response = self
            .llm
            .chat_completion(&request)
            .await
            .map_err(|cause| DispatchError::Decision { cause })?;
        turns.push(response.into_message());
        Ok(())
    }

    /// Replace the model's free-form reply with the fixed fallback turn.
    fn fallback(&self, turns: &mut Vec<Message>) {
        let free_form = turns
            .last()
            .is_some_and(|m| m.role == Role::Assistant && m.tool_calls.is_empty());
        if free_form {
            if let Some(discarded) = turns.pop() {
                tracing::debug!(reply = %discarded.content, "Discarding free-form model reply");
            }
        }
        turns.push(Message::assistant(&self.fallback_answer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatResponse, ToolCall, ToolDefinition};
    use crate::tools::ToolOutput;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Runtime::new().unwrap()
    }

    struct ScriptedLlm {
        response: Mutex<Option<anyhow::Result<ChatResponse>>>,
        seen: Mutex<Option<ChatRequest>>,
    }

    impl ScriptedLlm {
        fn new(response: anyhow::Result<ChatResponse>) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(response)),
                seen: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn chat_completion(&self, request: &ChatRequest) -> anyhow::Result<ChatResponse> {
            *self.seen.lock().unwrap() = Some(request.clone());
            self.response
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(ChatResponse::default()))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct EchoBackend {
        fail: bool,
    }

    #[async_trait]
    impl ToolBackend for EchoBackend {
        async fn list_tools(&self) -> anyhow::Result<Vec<ToolDefinition>> {
            Ok(vec![])
        }

        async fn call_tool(&self, name: &str, args: Value) -> anyhow::Result<ToolOutput> {
            if self.fail {
                anyhow::bail!("backend down");
            }
            Ok(ToolOutput::ok(json!({"tool": name, "args": args})))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    fn graph(llm: Arc<ScriptedLlm>, fail: bool) -> DispatchGraph {
        let catalog = ToolCatalog::from_definitions([ToolDefinition {
            name: "get_card_recommendation".into(),
            description: "recommend".into(),
            input_schema: json!({"properties": {"query": {}, "session_id": {}}}),
        }]);
        DispatchGraph::new(
            llm,
            Arc::new(catalog),
            Box::new(ToolNode::new(Arc::new(EchoBackend { fail }))),
            DecisionSettings {
                model: "test".into(),
                max_tokens: 256,
                temperature: Some(0.3),
            },
            "FALLBACK",
        )
    }

    fn start_turns() -> Vec<Message> {
        vec![Message::system("route"), Message::user("편의점 할인 카드 추천해줘")]
    }

    #[test]
    fn test_transitions() {
        let calls = Message::assistant_with_tool_calls("", vec![ToolCall::new("1", "t", json!({}))]);
        let text = Message::assistant("hi");
        assert_eq!(transition(Node::Start, None), Node::AgentDecide);
        assert_eq!(transition(Node::AgentDecide, Some(&calls)), Node::ToolExecute);
        assert_eq!(transition(Node::AgentDecide, Some(&text)), Node::Fallback);
        assert_eq!(transition(Node::AgentDecide, None), Node::Fallback);
        assert_eq!(transition(Node::ToolExecute, Some(&calls)), Node::End);
        assert_eq!(transition(Node::Fallback, Some(&text)), Node::End);
        assert_eq!(transition(Node::End, None), Node::End);
    }

    #[test]
    fn test_fallback_replaces_free_form_reply() {
        rt().block_on(async {
            let llm = ScriptedLlm::new(Ok(ChatResponse {
                content: "Sure! Let me chat about the weather...".into(),
                tool_calls: vec![],
            }));
            let turns = graph(llm, false).run(start_turns(), &RunConfig::default()).await.unwrap();
            assert_eq!(turns.len(), 3);
            assert_eq!(turns[2], Message::assistant("FALLBACK"));
        });
    }

    #[test]
    fn test_tool_path_appends_results() {
        rt().block_on(async {
            let llm = ScriptedLlm::new(Ok(ChatResponse {
                content: String::new(),
                tool_calls: vec![ToolCall::new(
                    "c1",
                    "get_card_recommendation",
                    json!({"query": "편의점 할인 카드 추천해줘"}),
                )],
            }));
            let turns = graph(llm.clone(), false)
                .run(start_turns(), &RunConfig::default())
                .await
                .unwrap();
            assert_eq!(turns.len(), 4);
            assert!(turns[2].has_tool_calls());
            assert_eq!(turns[3].role, Role::Tool);
            assert_eq!(turns[3].tool_call_id.as_deref(), Some("c1"));
            assert_eq!(
                turns[3].payload,
                Some(json!({"tool": "get_card_recommendation", "args": {"query": "편의점 할인 카드 추천해줘"}}))
            );

            // The model never saw the session id field.
            let seen = llm.seen.lock().unwrap().clone().unwrap();
            assert_eq!(seen.tools.len(), 1);
            assert!(seen.tools[0].input_schema["properties"].get("session_id").is_none());
            assert_eq!(seen.messages.len(), 2);
        });
    }

    #[test]
    fn test_decision_failure_is_not_fallback() {
        rt().block_on(async {
            let llm = ScriptedLlm::new(Err(anyhow::anyhow!("timeout")));
            let err = graph(llm, false)
                .run(start_turns(), &RunConfig::default())
                .await
                .unwrap_err();
            assert!(matches!(err, DispatchError::Decision { .. }));
        });
    }

    #[test]
    fn test_backend_failure_surfaces() {
        rt().block_on(async {
            let llm = ScriptedLlm::new(Ok(ChatResponse {
                content: String::new(),
                tool_calls: vec![ToolCall::new("c1", "get_card_recommendation", json!({}))],
            }));
            let err = graph(llm, true)
                .run(start_turns(), &RunConfig::default())
                .await
                .unwrap_err();
            match err {
                DispatchError::ToolBackend { tool, .. } => assert_eq!(tool, "get_card_recommendation"),
                other => panic!("unexpected error: {other}"),
            }
        });
    }
}
