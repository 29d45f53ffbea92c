use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use query_router::agent::Agent;
use query_router::catalog::ToolCatalog;
use query_router::cli::{Cli, Command};
use query_router::config::AppConfig;
use query_router::graph::{DecisionSettings, DispatchGraph, ToolNode};
use query_router::history::HistoryStore;
use query_router::injector::SessionInjector;
use query_router::llm::{create_provider, LlmProvider};
use query_router::server::{self, AppState};
use query_router::tools::mcp;
use query_router::tools::ToolBackend;
use query_router::types::DispatchRequest;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Command::InitConfig = cli.command {
        let path = match cli.config {
            Some(path) => path,
            None => AppConfig::config_path()?,
        };
        AppConfig::save_default(&path)?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    let config = AppConfig::load(cli.config.as_deref())?;
    tracing::info!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        api_base = config.llm.api_base.as_deref().unwrap_or("(default)"),
        mcp = %config.mcp.url,
        mcp_transport = ?config.mcp.transport,
        "Loaded config"
    );

    let mcp = mcp::create_backend(&config.mcp)?;
    let catalog = Arc::new(load_catalog(mcp.as_ref()).await);

    match cli.command {
        Command::Tools => {
            for entry in catalog.entries() {
                let marker = if entry.accepts_session_id { " [session]" } else { "" };
                println!("{}{}", entry.definition.name, marker);
                if !entry.definition.description.is_empty() {
                    println!("    {}", entry.definition.description);
                }
            }
            Ok(())
        }
        Command::Ask { query, session_id } => {
            let agent = build_agent(&config, mcp, catalog)?;
            let request = DispatchRequest { query, session_id };
            let response = agent.dispatch(&request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let addr: SocketAddr = bind
                .parse()
                .with_context(|| format!("Invalid bind address: {}", bind))?;
            let agent = build_agent(&config, mcp, catalog)?;
            server::serve(addr, AppState { agent: Arc::new(agent) }).await
        }
        Command::InitConfig => Ok(()),
    }
}

/// Load the MCP tool list. An unreachable server yields an empty catalog:
/// the service still starts and every query takes the fallback path.
async fn load_catalog(backend: &dyn ToolBackend) -> ToolCatalog {
    match backend.list_tools().await {
        Ok(definitions) => {
            let catalog = ToolCatalog::from_definitions(definitions);
            if catalog.is_empty() {
                tracing::warn!(backend = backend.name(), "No tools available");
            } else {
                let names: Vec<&str> = catalog
                    .entries()
                    .iter()
                    .map(|e| e.definition.name.as_str())
                    .collect();
                tracing::info!(backend = backend.name(), tools = ?names, "Loaded tools");
            }
            catalog
        }
        Err(e) => {
            tracing::warn!(backend = backend.name(), error = %format!("{:#}", e), "Failed to load tools, starting without any");
            ToolCatalog::new()
        }
    }
}

fn build_agent(
    config: &AppConfig,
    backend: Arc<dyn ToolBackend>,
    catalog: Arc<ToolCatalog>,
) -> Result<Agent> {
    let llm: Arc<dyn LlmProvider> = Arc::from(create_provider(&config.llm)?);
    tracing::info!(provider = llm.name(), "Model provider ready");

    let tool_step = SessionInjector::new(ToolNode::new(backend), catalog.clone());
    let graph = DispatchGraph::new(
        llm,
        catalog,
        Box::new(tool_step),
        DecisionSettings {
            model: config.llm.model.clone(),
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
        },
        config.agent.fallback_answer.clone(),
    );
    let history = Arc::new(HistoryStore::new(config.history.clone()));
    Ok(Agent::new(graph, history, config.agent.system_prompt.clone()))
}
