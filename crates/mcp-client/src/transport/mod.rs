//! MCP transport layer.
//!
//! A transport moves whole frames (one JSON document each) between the
//! client and a server. It knows nothing about ids or methods; correlation
//! happens above it. Supported variants:
//! - **Subprocess** ([`StdioTransport`]): spawn a child, newline-delimited
//!   frames over stdin/stdout.
//! - **Stream** ([`SseTransport`]): server-sent events in, HTTP POST out.
//! - **Channel** ([`ChannelTransport`]): in-process pair, for embedding and
//!   tests.

mod channel;
mod sse;
mod stdio;

pub use channel::{ChannelPeer, ChannelTransport};
pub use sse::SseTransport;
pub use stdio::StdioTransport;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tw_domain::config::{TransportConfig, TransportMode};

/// Trait for MCP server transports.
///
/// `recv` is only ever polled by the session's dispatch task, so
/// implementations may serialize it internally. `send` may be called
/// concurrently from any task.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Write one frame.
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Next inbound frame. `None` means the peer closed the stream and no
    /// further frames will arrive.
    async fn recv(&self) -> Option<Result<Vec<u8>, TransportError>>;

    /// Check if the transport is still alive.
    fn is_alive(&self) -> bool;

    /// Release the underlying process or connection. Safe to call more than
    /// once; a pending `recv` returns `None` afterwards.
    async fn shutdown(&self);
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP {status} from {url}: {body}")]
    Status { status: u16, url: String, body: String },

    #[error("MCP server process has exited")]
    ProcessExited,

    #[error("transport is closed")]
    Closed,

    #[error("connection dropped: {0}")]
    Disconnected(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("invalid transport config: {0}")]
    Config(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Http(e.to_string())
    }
}

/// Open the transport described by `config`.
///
/// The config is validated before any process is spawned or connection
/// opened. With `log_traffic` set the transport is wrapped in a
/// [`LoggingTransport`].
pub async fn open(config: &TransportConfig) -> Result<Arc<dyn McpTransport>, TransportError> {
    config.validate().map_err(TransportError::Config)?;

    let transport: Arc<dyn McpTransport> = match config.mode {
        TransportMode::Subprocess => Arc::new(StdioTransport::spawn(&config.command, &config.env)?),
        TransportMode::Stream => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| TransportError::Config("stream mode requires a `url`".into()))?;
            let wait = Duration::from_secs(config.handshake_timeout_seconds);
            Arc::new(SseTransport::connect(url, wait).await?)
        }
    };

    tracing::debug!(mode = %config.mode, "MCP transport opened");

    if config.log_traffic {
        Ok(Arc::new(LoggingTransport::new(transport, config.mode.to_string())))
    } else {
        Ok(transport)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Traffic logging
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Logs every frame that passes through the wrapped transport at debug level.
pub struct LoggingTransport {
    inner: Arc<dyn McpTransport>,
    label: String,
}

impl LoggingTransport {
    pub fn new(inner: Arc<dyn McpTransport>, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
        }
    }
}

#[async_trait]
impl McpTransport for LoggingTransport {
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        tracing::debug!(
            transport = %self.label,
            direction = "out",
            bytes = frame.len(),
            frame = %String::from_utf8_lossy(frame),
            "MCP frame"
        );
        self.inner.send(frame).await
    }

    async fn recv(&self) -> Option<Result<Vec<u8>, TransportError>> {
        let next = self.inner.recv().await;
        match &next {
            Some(Ok(frame)) => tracing::debug!(
                transport = %self.label,
                direction = "in",
                bytes = frame.len(),
                frame = %String::from_utf8_lossy(frame),
                "MCP frame"
            ),
            Some(Err(e)) => tracing::debug!(transport = %self.label, error = %e, "MCP receive failed"),
            None => tracing::debug!(transport = %self.label, "MCP stream ended"),
        }
        next
    }

    fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}
