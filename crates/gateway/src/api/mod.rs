pub mod echo;
pub mod health;
pub mod tools;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use tw_mcp_client::McpError;

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/echo", get(echo::echo))
        .route("/health", get(health::health))
        .route("/v1/tools", get(tools::list_tools))
        .route("/v1/tools/call", post(tools::call_tool))
}

/// Build the router with `state` attached, ready to serve.
pub fn app(state: AppState) -> Router {
    router().with_state(state)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Map an MCP failure to an HTTP status and a caller-facing message.
///
/// Protocol detail goes to the log, not the response.
pub(crate) fn mcp_status(err: &McpError) -> (StatusCode, String) {
    tracing::warn!(error = %err, retryable = err.is_retryable(), "MCP request failed");
    match err {
        McpError::NotFound(name) => (StatusCode::NOT_FOUND, format!("unknown tool: {name}")),
        McpError::SchemaValidation(violations) => (StatusCode::UNPROCESSABLE_ENTITY, violations.to_string()),
        McpError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "tool call timed out".into()),
        McpError::Result(_) | McpError::Malformed(_) => {
            (StatusCode::BAD_GATEWAY, "tool server returned an error".into())
        }
        McpError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "tool call cancelled".into()),
        McpError::Connection(_)
        | McpError::Transport(_)
        | McpError::Handshake(_)
        | McpError::InvalidState { .. }
        | McpError::ConnectionLost => (StatusCode::SERVICE_UNAVAILABLE, "tool server unavailable".into()),
    }
}

pub(crate) fn mcp_error(err: &McpError) -> Response {
    let (status, message) = mcp_status(err);
    api_error(status, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tw_mcp_client::protocol::JsonRpcError;
    use tw_mcp_client::SessionState;

    #[test]
    fn status_mapping() {
        let cases = [
            (McpError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                McpError::Timeout {
                    method: "tools/call".into(),
                    after: Duration::from_secs(1),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (McpError::Result(JsonRpcError::new(-32000, "boom")), StatusCode::BAD_GATEWAY),
            (McpError::ConnectionLost, StatusCode::SERVICE_UNAVAILABLE),
            (
                McpError::InvalidState {
                    operation: "call_tool",
                    state: SessionState::Closed,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(mcp_status(&err).0, expected, "{err}");
        }
    }

    #[test]
    fn server_error_detail_is_not_leaked() {
        let (_, message) = mcp_status(&McpError::Result(JsonRpcError::new(-32000, "stack trace here")));
        assert!(!message.contains("stack trace"));
    }
}
