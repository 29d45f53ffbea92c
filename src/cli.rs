use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "query-router", version, about = "Routes user queries to MCP tools via an LLM")]
pub struct Cli {
    /// Path to the config file (default: ~/.query-router/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server
    Serve {
        /// Address to bind, overriding the config
        #[arg(long)]
        bind: Option<String>,
    },
    /// Dispatch a single query and print the JSON response
    Ask {
        query: String,
        #[arg(long)]
        session_id: Option<String>,
    },
    /// List the tools loaded from the MCP server
    Tools,
    /// Write the default config file
    InitConfig,
}
