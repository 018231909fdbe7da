//! Error taxonomy of the client runtime.

use std::time::Duration;

use crate::codec::CodecError;
use crate::protocol::JsonRpcError;
use crate::schema::SchemaViolations;
use crate::session::SessionState;
use crate::transport::TransportError;

/// Every failure a public [`McpClient`](crate::McpClient) operation can
/// report. Callers branch on the variant.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// The transport could not be opened or its config is invalid.
    #[error("MCP connection failed: {0}")]
    Connection(String),

    #[error("MCP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed MCP message: {0}")]
    Malformed(String),

    #[error("MCP handshake failed: {0}")]
    Handshake(String),

    #[error("`{method}` timed out after {}ms", .after.as_millis())]
    Timeout { method: String, after: Duration },

    /// The server answered with a JSON-RPC error envelope.
    #[error("MCP server returned {0}")]
    Result(JsonRpcError),

    #[error(transparent)]
    SchemaValidation(#[from] SchemaViolations),

    #[error("MCP tool not found: {0}")]
    NotFound(String),

    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// The session closed while the request was pending.
    #[error("MCP connection lost")]
    ConnectionLost,

    #[error("MCP request cancelled")]
    Cancelled,
}

impl From<CodecError> for McpError {
    fn from(e: CodecError) -> Self {
        McpError::Malformed(e.to_string())
    }
}

impl McpError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. } | Self::Result(_))
    }
}
