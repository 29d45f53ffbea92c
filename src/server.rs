//! HTTP surface.
//!
//! ```text
//! GET  /                          banner
//! POST /llm/mcp-router/dispatch   {query, session_id?} -> {answer, tool_response?}
//! POST /llm/mcp-router/echo       echoes the JSON body
//! GET  /llm/mcp-router/tools      loaded tool catalog
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::agent::Agent;
use crate::error::DispatchError;
use crate::types::{DispatchRequest, DispatchResponse};

const BANNER: &str = "LLM Query Routing Server";

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
}

pub fn app_router(state: AppState) -> Router {
    let mcp_router = Router::new()
        .route("/dispatch", post(dispatch))
        .route("/echo", post(echo))
        .route("/tools", get(list_tools));

    Router::new()
        .route("/", get(root))
        .nest("/llm/mcp-router", mcp_router)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Query router listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}

async fn root() -> Json<Value> {
    Json(json!({ "message": BANNER }))
}

async fn echo(Json(payload): Json<Value>) -> Json<Value> {
    Json(payload)
}

async fn dispatch(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<DispatchResponse>, DispatchError> {
    state.agent.dispatch(&request).await.map(Json)
}

async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    let tools: Vec<Value> = state
        .agent
        .catalog()
        .entries()
        .iter()
        .map(|entry| {
            json!({
                "name": entry.definition.name,
                "description": entry.definition.description,
                "requires_session_id": entry.accepts_session_id,
            })
        })
        .collect();
    Json(json!({ "tools": tools }))
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self, "Dispatch request failed");
        }
        (status, Json(json!({ "detail": self.public_detail() }))).into_response()
    }
}
