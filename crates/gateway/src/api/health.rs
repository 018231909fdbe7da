//! `GET /health`: liveness plus MCP session summary.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use tw_mcp_client::SessionState;

use crate::state::AppState;

/// Answers 200 when every configured backend is usable, 503 when the MCP
/// session has dropped.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mcp = state.mcp.as_ref().map(|client| {
        let session = client.session();
        json!({
            "state": session.state,
            "tools": client.tools().len(),
            "tools_stale": client.tools_stale(),
            "protocol_version": session.protocol_version,
            "server": session.server_info,
        })
    });

    let degraded = state
        .mcp
        .as_ref()
        .is_some_and(|client| client.state() != SessionState::Ready);

    let body = json!({
        "status": if degraded { "degraded" } else { "ok" },
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "model": state.model.as_ref().map(|m| m.model_id()),
        "mcp": mcp,
    });

    let status = if degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(body))
}
