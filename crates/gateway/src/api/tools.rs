//! Tools API endpoints.
//!
//! - `GET  /v1/tools`      - cached tool descriptors (no round-trip)
//! - `POST /v1/tools/call` - invoke one tool and return its result

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{api_error, mcp_error};
use crate::state::AppState;

/// Upper bound on a caller-supplied timeout.
const MAX_TIMEOUT_SECS: u64 = 600;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_tools(State(state): State<AppState>) -> Response {
    let Some(client) = &state.mcp else {
        return api_error(StatusCode::SERVICE_UNAVAILABLE, "no MCP server configured");
    };

    let tools: Vec<Value> = client
        .tools()
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.input_schema,
            })
        })
        .collect();

    Json(json!({
        "tools": tools,
        "stale": client.tools_stale(),
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tools/call
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    /// Per-call timeout; the session default applies when absent.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// A tool that ran and reported `isError` still answers 200; the flag is
/// in the body. Only failures to get a result become HTTP errors.
pub async fn call_tool(State(state): State<AppState>, Json(req): Json<ToolCallRequest>) -> Response {
    let Some(client) = &state.mcp else {
        return api_error(StatusCode::SERVICE_UNAVAILABLE, "no MCP server configured");
    };

    let timeout = req
        .timeout_secs
        .map(|secs| Duration::from_secs(secs.clamp(1, MAX_TIMEOUT_SECS)));

    match client.call_tool(&req.name, req.arguments, timeout).await {
        Ok(result) => {
            tracing::debug!(tool = %req.name, is_error = result.is_error, "tool call finished");
            Json(result).into_response()
        }
        Err(e) => mcp_error(&e),
    }
}
