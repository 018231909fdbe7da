//! Client facade: the only thing outside this crate talks to.
//!
//! [`McpClient::connect`] opens the transport, spawns the dispatch task,
//! runs the handshake and discovers tools. The dispatch task drains the
//! transport for the lifetime of the session: responses go to the
//! correlator, server requests are answered, notifications are handled in
//! place. When the transport fails or ends, the dispatch task force-closes
//! the session.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use tw_domain::config::TransportConfig;

use crate::codec;
use crate::correlator::{Correlator, PendingHandle};
use crate::error::McpError;
use crate::protocol::{
    error_codes, methods, Envelope, InitializeParams, InitializeResult, JsonRpcError, RequestId, ToolCallResult,
};
use crate::registry::{ToolDescriptor, ToolRegistry, ToolSnapshot};
use crate::session::{Session, SessionState};
use crate::transport::{self, McpTransport};

/// How long `close` waits for the shutdown notice to be written.
const SHUTDOWN_NOTICE_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-session settings taken from the transport config.
#[derive(Debug, Clone)]
struct ClientOptions {
    request_timeout: Duration,
    handshake_timeout: Duration,
    capabilities: Vec<String>,
    client_name: String,
}

impl From<&TransportConfig> for ClientOptions {
    fn from(config: &TransportConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.timeout_seconds),
            handshake_timeout: Duration::from_secs(config.handshake_timeout_seconds),
            capabilities: config.capabilities.clone(),
            client_name: config.client_name.clone(),
        }
    }
}

struct Inner {
    session: RwLock<Session>,
    correlator: Correlator,
    registry: ToolRegistry,
    options: ClientOptions,
    /// Serializes teardown so a second `close` waits for the first.
    close_lock: tokio::sync::Mutex<()>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatch.get_mut().take() {
            handle.abort();
        }
    }
}

/// A connected MCP session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct McpClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.inner.session.read();
        f.debug_struct("McpClient")
            .field("session_id", &session.id)
            .field("state", &session.state)
            .finish()
    }
}

impl McpClient {
    /// Open the configured transport and bring the session to Ready.
    pub async fn connect(config: &TransportConfig) -> Result<Self, McpError> {
        config.validate().map_err(McpError::Connection)?;
        let transport = transport::open(config)
            .await
            .map_err(|e| McpError::Connection(e.to_string()))?;
        Self::connect_with(transport, config).await
    }

    /// Bring a session to Ready over an already-open transport. Only the
    /// timeout, capability and naming fields of `config` are used.
    pub async fn connect_with(transport: Arc<dyn McpTransport>, config: &TransportConfig) -> Result<Self, McpError> {
        let inner = Arc::new(Inner {
            session: RwLock::new(Session::new()),
            correlator: Correlator::new(transport.clone()),
            registry: ToolRegistry::new(),
            options: ClientOptions::from(config),
            close_lock: tokio::sync::Mutex::new(()),
            dispatch: Mutex::new(None),
        });

        let session_id = {
            let mut session = inner.session.write();
            session.advance(SessionState::Handshaking)?;
            session.id
        };
        tracing::debug!(session_id = %session_id, "MCP handshake starting");

        let handle = tokio::spawn(dispatch_loop(transport, Arc::downgrade(&inner)));
        *inner.dispatch.lock() = Some(handle);

        let client = Self { inner };
        if let Err(e) = client.handshake().await {
            client.teardown("handshake failed").await;
            return Err(e);
        }

        if client.inner.session.read().has_capability("tools") {
            let timeout = client.inner.options.request_timeout;
            match client.inner.registry.refresh(&client.inner.correlator, timeout).await {
                Ok(_) => {}
                Err(McpError::Result(e)) => {
                    tracing::warn!(error = %e, "tools/list returned error, session will have no tools");
                }
                Err(e) => {
                    client.teardown("tool discovery failed").await;
                    return Err(McpError::Connection(format!("tool discovery failed: {e}")));
                }
            }
        }

        Ok(client)
    }

    async fn handshake(&self) -> Result<(), McpError> {
        let options = &self.inner.options;
        let params = InitializeParams::new(&options.client_name, options.capabilities.iter().map(String::as_str));
        let params = serde_json::to_value(params).map_err(|e| McpError::Handshake(e.to_string()))?;

        let result = self
            .inner
            .correlator
            .request(methods::INITIALIZE, Some(params), options.handshake_timeout)
            .await
            .map_err(|e| match e {
                McpError::Timeout { after, .. } => {
                    McpError::Handshake(format!("no initialize response within {}s", after.as_secs()))
                }
                McpError::Result(err) => McpError::Handshake(format!("server rejected initialize: {err}")),
                other => McpError::Handshake(other.to_string()),
            })?;

        let result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::Handshake(format!("malformed initialize result: {e}")))?;

        self.inner
            .session
            .write()
            .accept_handshake(result, &options.capabilities)?;

        self.inner
            .correlator
            .notify(methods::INITIALIZED, None)
            .await
            .map_err(|e| McpError::Handshake(format!("could not send initialized: {e}")))?;

        let session = self.inner.session.read();
        tracing::info!(
            session_id = %session.id,
            protocol_version = session.protocol_version.as_deref().unwrap_or_default(),
            server = session.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or("unknown"),
            capabilities = ?session.capabilities,
            "MCP session ready"
        );
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Session
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Snapshot of the session.
    pub fn session(&self) -> Session {
        self.inner.session.read().clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.read().state
    }

    fn ensure_ready(&self, operation: &'static str) -> Result<(), McpError> {
        let state = self.state();
        if state == SessionState::Ready {
            Ok(())
        } else {
            Err(McpError::InvalidState { operation, state })
        }
    }

    /// Round-trip health check. Returns the latency.
    pub async fn ping(&self) -> Result<Duration, McpError> {
        self.ensure_ready("ping")?;
        let started = Instant::now();
        self.inner
            .correlator
            .request(methods::PING, None, self.inner.options.request_timeout)
            .await?;
        Ok(started.elapsed())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Tools
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Re-run discovery and return the fresh descriptors.
    pub async fn list_tools(&self) -> Result<Vec<Arc<ToolDescriptor>>, McpError> {
        let snapshot = self.refresh_tools().await?;
        Ok(snapshot.iter().cloned().collect())
    }

    /// Re-run discovery, replacing the registry snapshot.
    pub async fn refresh_tools(&self) -> Result<Arc<ToolSnapshot>, McpError> {
        self.ensure_ready("list_tools")?;
        self.inner
            .registry
            .refresh(&self.inner.correlator, self.inner.options.request_timeout)
            .await
    }

    /// The cached snapshot; no round-trip.
    pub fn tools(&self) -> Arc<ToolSnapshot> {
        self.inner.registry.snapshot()
    }

    /// Whether the server announced a tool-list change since the last
    /// refresh.
    pub fn tools_stale(&self) -> bool {
        self.inner.registry.is_stale()
    }

    /// Invoke a tool and wait for its result.
    ///
    /// `timeout` defaults to the configured request timeout. A result with
    /// `isError: true` is returned as `Ok`; only JSON-RPC error envelopes
    /// become [`McpError::Result`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolCallResult, McpError> {
        let handle = self.start_tool_call(name, arguments, timeout).await?;
        self.wait(handle).await
    }

    /// Validate and send a tool call without waiting for it. The returned
    /// handle's id can be passed to [`cancel`](Self::cancel).
    pub async fn start_tool_call(
        &self,
        name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<PendingHandle, McpError> {
        self.ensure_ready("call_tool")?;
        let tool = self.inner.registry.validate(name, &arguments)?;

        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        let params = json!({ "name": tool.name, "arguments": arguments });
        let timeout = timeout.unwrap_or(self.inner.options.request_timeout);

        self.inner
            .correlator
            .submit(methods::TOOLS_CALL, Some(params), timeout)
            .await
    }

    /// Wait for a call started with [`start_tool_call`](Self::start_tool_call).
    pub async fn wait(&self, handle: PendingHandle) -> Result<ToolCallResult, McpError> {
        let result = self.inner.correlator.wait(handle).await?;
        serde_json::from_value(result).map_err(|e| McpError::Malformed(format!("invalid tools/call result: {e}")))
    }

    /// Cancel an in-flight request. Best-effort: the server may still run
    /// the tool. Returns `false` if the request already finished.
    pub async fn cancel(&self, id: &RequestId) -> bool {
        self.inner.correlator.cancel(id, "cancelled by client").await
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Shutdown
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Close the session. Idempotent; concurrent callers all return once
    /// the session is Closed.
    pub async fn close(&self) {
        let _lock = self.inner.close_lock.lock().await;

        let was_ready = {
            let mut session = self.inner.session.write();
            match session.state {
                SessionState::Closing | SessionState::Closed => return,
                SessionState::Ready => session.advance(SessionState::Closing).is_ok(),
                _ => false,
            }
        };

        if was_ready {
            let notice = self.inner.correlator.notify(methods::SHUTDOWN, None);
            match tokio::time::timeout(SHUTDOWN_NOTICE_TIMEOUT, notice).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "shutdown notice not delivered"),
                Err(_) => tracing::debug!("shutdown notice timed out"),
            }
        }

        self.inner.correlator.transport().shutdown().await;
        self.inner.correlator.fail_all();
        let session_id = {
            let mut session = self.inner.session.write();
            let _ = session.advance(SessionState::Closed);
            session.id
        };
        tracing::info!(session_id = %session_id, "MCP session closed");
    }

    /// Force the session to Closed without the shutdown notice.
    async fn teardown(&self, reason: &str) {
        self.inner.teardown(reason).await;
    }
}

impl Inner {
    /// Forced close: Closed first, then fail pending requests, then release
    /// the transport. No-op if the session is already closing.
    async fn teardown(&self, reason: &str) {
        let _lock = self.close_lock.lock().await;
        let session_id = {
            let mut session = self.session.write();
            if session.state.is_terminal() {
                return;
            }
            let _ = session.advance(SessionState::Closed);
            session.id
        };
        let failed = self.correlator.fail_all();
        tracing::warn!(session_id = %session_id, reason, failed, "MCP session closed");
        self.correlator.transport().shutdown().await;
    }

    async fn handle_frame(&self, frame: &[u8]) {
        let envelope = match codec::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, bytes = frame.len(), "dropping malformed MCP frame");
                return;
            }
        };

        match envelope {
            Envelope::Response { id, result } => {
                self.correlator.complete(&id, Ok(result));
            }
            Envelope::ErrorResponse { id, error } => {
                self.correlator.complete(&id, Err(McpError::Result(error)));
            }
            Envelope::Request { id, method, .. } => self.answer_server_request(id, &method).await,
            Envelope::Notification { method, params } => self.handle_notification(&method, params),
        }
    }

    async fn answer_server_request(&self, id: RequestId, method: &str) {
        let reply = if method == methods::PING {
            Envelope::response(id, json!({}))
        } else {
            tracing::debug!(method, "rejecting unsupported MCP server request");
            Envelope::error_response(
                id,
                JsonRpcError::new(error_codes::METHOD_NOT_FOUND, format!("Method not found: {method}")),
            )
        };
        if let Err(e) = self.correlator.send(&reply).await {
            tracing::debug!(method, error = %e, "failed to answer MCP server request");
        }
    }

    fn handle_notification(&self, method: &str, params: Option<Value>) {
        match method {
            methods::TOOLS_LIST_CHANGED => {
                tracing::info!("MCP server tool list changed");
                self.registry.mark_stale();
            }
            methods::LOG_MESSAGE => log_server_message(params.unwrap_or(Value::Null)),
            other => tracing::debug!(method = %other, "ignoring MCP notification"),
        }
    }
}

/// Forward a `notifications/message` to tracing at a matching level.
fn log_server_message(params: Value) {
    let level = params.get("level").and_then(Value::as_str).unwrap_or("info");
    let logger = params.get("logger").and_then(Value::as_str).unwrap_or("server");
    let data = params.get("data").cloned().unwrap_or(Value::Null);
    match level {
        "debug" => tracing::debug!(logger, %data, "MCP server log"),
        "info" | "notice" => tracing::info!(logger, %data, "MCP server log"),
        _ => tracing::warn!(logger, level, %data, "MCP server log"),
    }
}

/// Drain the transport until it ends, then force-close the session.
///
/// Holds only a weak reference so dropping every client handle ends the
/// session.
async fn dispatch_loop(transport: Arc<dyn McpTransport>, inner: Weak<Inner>) {
    loop {
        let next = transport.recv().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match next {
            Some(Ok(frame)) => inner.handle_frame(&frame).await,
            Some(Err(e)) => {
                tracing::error!(error = %e, "MCP transport failed");
                inner.teardown("transport failed").await;
                break;
            }
            None => {
                inner.teardown("transport closed").await;
                break;
            }
        }
    }
    tracing::debug!("MCP dispatch task finished");
}
