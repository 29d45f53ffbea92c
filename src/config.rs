//! Configuration management for query-router.
//!
//! Loaded from `~/.query-router/config.toml` (or `--config`), then
//! overridden from the environment. Every section has defaults, so an
//! empty or missing file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::history::HistoryConfig;

pub const DEFAULT_FALLBACK_ANSWER: &str = "죄송합니다. 저는 우리카드 상담 전문 AI로, \
    해당 질문에는 답변드리기 어렵습니다. 우리카드 관련 질문이 있으시면 언제든 물어보세요! 😊";

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"<role>당신은 우리카드 전문 상담 AI입니다. 사용자 질문을 분석하여 적절한 도구를 선택하세요.</role>

<tools>
1. get_card_description: 특정 카드명이 언급된 경우 (예: V카드, 7CORE, 트래블카드, 카드의정석)
2. get_card_recommendation: 카드명 없이 조건/혜택으로 추천 요청
3. consumption_recommend: "내 소비", "소비 패턴" 키워드 포함
4. query_faq_database: 절차/방법/정책/이유 질문 (어떻게, 왜, 방법)
5. query_term_database: 용어 정의 질문 (~이 뭐야?, ~란?)
6. none: 인사, 무관한 질문
</tools>

<priority>
아래 순서대로 체크하고, 먼저 해당되는 도구를 선택하세요:
0. "비교" 키워드(비교해줘, 차이, vs) → get_card_description
1. 카드명(V카드, S카드, 7CORE, 트래블카드, 트래블J카드, 카드의정석 등) → get_card_description
2. "내 소비", "소비 패턴", "내 지출" → consumption_recommend
3. "추천", "어떤 카드", "~할인 카드" → get_card_recommendation
4. "왜", "이유", "어떻게", "방법", "절차" → query_faq_database
5. "~이 뭐야?", "~란?", "~뜻" → query_term_database
</priority>

<query_rule>
도구에 쿼리 전달 시 사용자 질문을 원문 그대로 전달하세요. 요약/변형 금지.
</query_rule>

<rejection>
우리카드와 무관한 질문은 정중히 거절:
"죄송합니다. 저는 우리카드 상담 전문 AI로, 해당 질문에는 답변드리기 어렵습니다. 우리카드 관련 질문이 있으시면 언제든 물어보세요! 😊"
</rejection>"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "qwen3:8b".to_string()
}

fn default_api_key_env() -> String {
    "LLM_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> Option<f32> {
    Some(0.3)
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_base: None,
            api_key: None,
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl LlmConfig {
    /// `api_key` if set, else the variable named by `api_key_env`.
    /// A key is optional: local Ollama needs none.
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// How the MCP server is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpTransport {
    /// One POST per JSON-RPC message (`url` is the `/mcp` endpoint).
    #[default]
    StreamableHttp,
    /// Legacy HTTP+SSE: a GET event stream plus POSTs to the announced
    /// endpoint (`url` is the `/sse` endpoint).
    Sse,
}

impl McpTransport {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "streamable_http" | "streamable-http" | "http" => Some(Self::StreamableHttp),
            "sse" => Some(Self::Sse),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default = "default_mcp_url")]
    pub url: String,
    #[serde(default)]
    pub transport: McpTransport,
    /// Extra HTTP headers sent with every MCP request (e.g. auth).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_mcp_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_mcp_url() -> String {
    "http://localhost:8000/mcp".to_string()
}

fn default_mcp_timeout_secs() -> u64 {
    60
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            url: default_mcp_url(),
            transport: McpTransport::default(),
            headers: HashMap::new(),
            timeout_secs: default_mcp_timeout_secs(),
        }
    }
}

impl McpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Answer returned when the model picks no tool.
    #[serde(default = "default_fallback_answer")]
    pub fallback_answer: String,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_fallback_answer() -> String {
    DEFAULT_FALLBACK_ANSWER.to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            fallback_answer: default_fallback_answer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

impl AppConfig {
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".query-router").join("config.toml"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file yields the
    /// built-in defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Self::config_path()?;
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply environment overrides. `lookup` returns the value of a variable.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(base) = lookup("OLLAMA_BASE_URL") {
            self.llm.api_base = Some(base);
        }
        if let Some(model) = lookup("OLLAMA_MODEL_NAME") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("MCP_SERVER_URL") {
            self.mcp.url = url;
        }

        // Service-specific names win over the deployment names above.
        if let Some(provider) = lookup("QUERY_ROUTER_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Some(model) = lookup("QUERY_ROUTER_MODEL") {
            self.llm.model = model;
        }
        if let Some(api_base) = lookup("QUERY_ROUTER_API_BASE") {
            self.llm.api_base = Some(api_base);
        }
        if let Some(url) = lookup("QUERY_ROUTER_MCP_URL") {
            self.mcp.url = url;
        }
        if let Some(transport) = lookup("QUERY_ROUTER_MCP_TRANSPORT") {
            match McpTransport::parse(&transport) {
                Some(parsed) => self.mcp.transport = parsed,
                None => tracing::warn!(%transport, "Unknown MCP transport, keeping configured one"),
            }
        }
        if let Some(bind) = lookup("QUERY_ROUTER_BIND") {
            self.server.bind = bind;
        }
    }

    /// Write the default config to `path`, creating parent directories.
    pub fn save_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content =
            toml::to_string_pretty(&Self::default()).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}
