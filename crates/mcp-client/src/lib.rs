//! `tw-mcp-client`: Model Context Protocol client runtime.
//!
//! This crate provides:
//! - JSON-RPC 2.0 envelope types and a codec for them.
//! - Subprocess, HTTP/SSE and in-process transports.
//! - A session state machine, request correlator and tool registry.
//! - [`McpClient`], the facade that composes them.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tw_mcp_client::{McpClient, TransportConfig};
//!
//! let config = TransportConfig::subprocess(["docker", "run", "-i", "mcp/everything"]);
//! let client = McpClient::connect(&config).await?;
//!
//! for tool in client.tools().iter() {
//!     println!("{}: {}", tool.name, tool.description);
//! }
//!
//! let result = client.call_tool("echo", json!({ "message": "hi" }), None).await?;
//! println!("{}", result.text());
//! client.close().await;
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod session;
pub mod transport;

// Re-exports for convenience.
pub use client::McpClient;
pub use codec::CodecError;
pub use config::{TransportConfig, TransportMode};
pub use correlator::PendingHandle;
pub use error::McpError;
pub use protocol::{RequestId, ToolCallContent, ToolCallResult};
pub use registry::{ToolDescriptor, ToolSnapshot};
pub use schema::{SchemaViolation, SchemaViolations};
pub use session::{Session, SessionState};
pub use transport::{McpTransport, TransportError};
