//! query-router: lets a language model route a user query to one of the
//! tools of an MCP server, injects the caller's session id into the tools
//! that need it, and normalizes whatever the tool returns.

pub mod agent;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod graph;
pub mod history;
pub mod injector;
pub mod llm;
pub mod normalize;
pub mod server;
pub mod tools;
pub mod trace;
pub mod types;
pub mod wire;
