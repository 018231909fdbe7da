//! MCP transport configuration.
//!
//! These are plain config structs used to deserialize the `[mcp]` section of
//! the gateway config. The client runtime that consumes them lives in the
//! `tw-mcp-client` crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How the client reaches the MCP server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Spawn a child process and speak newline-delimited JSON over its
    /// stdin/stdout.
    #[default]
    Subprocess,
    /// Open a server-sent-events stream and POST requests to the endpoint the
    /// server announces on it.
    Stream,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subprocess => f.write_str("subprocess"),
            Self::Stream => f.write_str("stream"),
        }
    }
}

/// Configuration for a single MCP server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub mode: TransportMode,

    /// Program and arguments to spawn (subprocess mode), e.g.
    /// `["docker", "run", "-i", "mcp/everything"]`.
    #[serde(default)]
    pub command: Vec<String>,

    /// SSE URL (stream mode), e.g. `http://localhost:3001/sse`.
    #[serde(default)]
    pub url: Option<String>,

    /// Default per-request timeout.
    #[serde(default = "d_60", alias = "timeoutSeconds")]
    pub timeout_seconds: u64,

    /// How long the `initialize` round-trip may take before the connection
    /// attempt fails.
    #[serde(default = "d_30", alias = "handshakeTimeoutSeconds")]
    pub handshake_timeout_seconds: u64,

    /// Log every frame sent and received at debug level.
    #[serde(default, alias = "logTraffic")]
    pub log_traffic: bool,

    /// Extra environment variables for the spawned process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Capabilities this client offers during the handshake. Only the ones
    /// the server also advertises end up active.
    #[serde(default = "d_capabilities")]
    pub capabilities: Vec<String>,

    /// Name reported in `clientInfo`.
    #[serde(default = "d_client_name", alias = "clientName")]
    pub client_name: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Subprocess,
            command: Vec::new(),
            url: None,
            timeout_seconds: d_60(),
            handshake_timeout_seconds: d_30(),
            log_traffic: false,
            env: HashMap::new(),
            capabilities: d_capabilities(),
            client_name: d_client_name(),
        }
    }
}

impl TransportConfig {
    /// Subprocess config for the given argv.
    pub fn subprocess<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: TransportMode::Subprocess,
            command: command.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Stream (HTTP + SSE) config for the given SSE URL.
    pub fn stream(url: impl Into<String>) -> Self {
        Self {
            mode: TransportMode::Stream,
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Check that the fields required by `mode` are present.
    pub fn validate(&self) -> Result<(), String> {
        match self.mode {
            TransportMode::Subprocess => {
                match self.command.first() {
                    Some(program) if !program.trim().is_empty() => {}
                    _ => return Err("subprocess mode requires a non-empty `command`".into()),
                }
            }
            TransportMode::Stream => match self.url.as_deref() {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
                Some(url) => return Err(format!("stream mode requires an http(s) `url`, got {url:?}")),
                None => return Err("stream mode requires a `url`".into()),
            },
        }
        if self.timeout_seconds == 0 {
            return Err("`timeout_seconds` must be greater than 0".into());
        }
        if self.handshake_timeout_seconds == 0 {
            return Err("`handshake_timeout_seconds` must be greater than 0".into());
        }
        Ok(())
    }
}

fn d_60() -> u64 {
    60
}

fn d_30() -> u64 {
    30
}

fn d_capabilities() -> Vec<String> {
    vec!["tools".into()]
}

fn d_client_name() -> String {
    "toolwire".into()
}
