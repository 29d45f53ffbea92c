//! Model-decision providers.
//!
//! The `LlmProvider` trait hides the chat API behind one call: given the
//! turn sequence and the tool catalog, return the model's decision. Each
//! provider converts our `ChatRequest` into its own wire format and its
//! tool calls back into canonical `ToolCall`s via [`crate::wire`].

pub mod ollama;
pub mod openai_compatible;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::types::{ChatRequest, ChatResponse};

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and wait for the full decision.
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Return the provider's display name (for logging).
    fn name(&self) -> &str;
}

/// Create the provider named by `config.provider`.
pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn LlmProvider>> {
    let api_key = config.api_key();
    let api_base = config.api_base.clone();
    let timeout = config.request_timeout();

    match config.provider.as_str() {
        "openai_compatible" | "openai" => Ok(Box::new(
            openai_compatible::OpenAiCompatibleProvider::new(api_key, api_base, timeout)?,
        )),
        "ollama" => Ok(Box::new(ollama::OllamaProvider::new(api_base, timeout)?)),
        other => {
            bail!(
                "Unknown provider: '{}'. Supported: 'openai_compatible', 'ollama'",
                other
            )
        }
    }
}
