//! Session state machine.
//!
//! ```text
//! Disconnected ─▶ Handshaking ─▶ Ready ─▶ Closing ─▶ Closed
//!                      │            │                  ▲
//!                      └────────────┴──────────────────┘
//! ```
//!
//! The facade owns the [`Session`] behind a lock and is the only thing that
//! moves it forward. Nothing moves backwards; a closed session stays closed.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::McpError;
use crate::protocol::{Implementation, InitializeResult, SUPPORTED_PROTOCOL_VERSIONS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Handshaking,
    Ready,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// Whether `self -> next` is a legal edge.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Handshaking)
                | (Disconnected, Closed)
                | (Handshaking, Ready)
                | (Handshaking, Closed)
                | (Ready, Closing)
                | (Ready, Closed)
                | (Closing, Closed)
        )
    }

    /// Closing or Closed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One connection's worth of negotiated state.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub state: SessionState,
    /// Set once the handshake succeeds.
    pub protocol_version: Option<String>,
    /// Capabilities both sides advertised.
    pub capabilities: BTreeSet<String>,
    pub server_info: Option<Implementation>,
    pub instructions: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Disconnected,
            protocol_version: None,
            capabilities: BTreeSet::new(),
            server_info: None,
            instructions: None,
            connected_at: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains(name)
    }

    /// Move to `next`, refusing edges the state machine does not have.
    pub fn advance(&mut self, next: SessionState) -> Result<(), McpError> {
        if !self.state.can_transition_to(next) {
            return Err(McpError::InvalidState {
                operation: "change session state",
                state: self.state,
            });
        }
        tracing::debug!(session_id = %self.id, from = %self.state, to = %next, "MCP session state change");
        self.state = next;
        Ok(())
    }

    /// Record a successful `initialize` result and enter Ready.
    ///
    /// Fails with [`McpError::Handshake`] (leaving the state untouched) when
    /// the server speaks a protocol revision this client does not.
    pub fn accept_handshake(&mut self, result: InitializeResult, offered: &[String]) -> Result<(), McpError> {
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
            return Err(McpError::Handshake(format!(
                "unsupported protocol version {:?} (supported: {})",
                result.protocol_version,
                SUPPORTED_PROTOCOL_VERSIONS.join(", ")
            )));
        }

        self.capabilities = negotiate(offered.iter().map(String::as_str), &result.capabilities);
        self.protocol_version = Some(result.protocol_version);
        self.server_info = result.server_info;
        self.instructions = result.instructions;
        self.connected_at = Some(Utc::now());
        self.advance(SessionState::Ready)
    }
}

/// Capabilities active for the session: those offered by the client that
/// the server also lists.
pub fn negotiate<'a>(offered: impl IntoIterator<Item = &'a str>, server: &Map<String, Value>) -> BTreeSet<String> {
    offered
        .into_iter()
        .filter(|name| server.contains_key(*name))
        .map(str::to_string)
        .collect()
}
