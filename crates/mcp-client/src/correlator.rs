//! Request correlator.
//!
//! Owns the id -> pending-request table. Callers [`submit`](Correlator::submit)
//! a request and later [`wait`](Correlator::wait) on the returned handle; the
//! dispatch task feeds responses in through [`complete`](Correlator::complete).
//! Ids come from a per-session counter and are never reused, so a response
//! that arrives after its entry is gone (timeout, cancel) cannot be matched
//! to a newer request.
//!
//! Each entry carries its own deadline timer, started at submit. The entry
//! leaves the table when it is answered, cancelled, timed out, failed by
//! connection loss, or when its handle is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::codec;
use crate::error::McpError;
use crate::protocol::{methods, Envelope, RequestId};
use crate::transport::McpTransport;

/// What a pending request resolves to.
pub type Outcome = Result<Value, McpError>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending request tracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct PendingRequest {
    method: String,
    submitted_at: Instant,
    /// Single-assignment result slot.
    tx: oneshot::Sender<Outcome>,
    /// Deadline task; aborted when the entry is settled some other way.
    timer: Option<JoinHandle<()>>,
}

impl PendingRequest {
    fn resolve(mut self, outcome: Outcome) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        // The waiter may have gone away; nothing to do then.
        let _ = self.tx.send(outcome);
    }
}

#[derive(Default)]
struct Table {
    pending: HashMap<RequestId, PendingRequest>,
    /// Set by `fail_all`; no new entries are accepted afterwards.
    closed: bool,
}

type SharedTable = Arc<Mutex<Table>>;

/// Handle to one in-flight request. Only the issuer holds it.
///
/// Dropping the handle abandons the request and frees its table entry.
pub struct PendingHandle {
    id: RequestId,
    method: String,
    timeout: Duration,
    rx: oneshot::Receiver<Outcome>,
    table: Weak<Mutex<Table>>,
}

impl PendingHandle {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for PendingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingHandle")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let entry = table.lock().pending.remove(&self.id);
        if let Some(mut pending) = entry {
            if let Some(timer) = pending.timer.take() {
                timer.abort();
            }
            tracing::debug!(id = %self.id, method = %self.method, "MCP request abandoned");
        }
    }
}

/// Fires at `deadline` unless aborted first: removes the entry, resolves it
/// with [`McpError::Timeout`] and tells the server to stop.
async fn expire(
    table: Weak<Mutex<Table>>,
    transport: Weak<dyn McpTransport>,
    id: RequestId,
    deadline: tokio::time::Instant,
    timeout: Duration,
) {
    tokio::time::sleep_until(deadline).await;

    let Some(table) = table.upgrade() else {
        return;
    };
    let entry = table.lock().pending.remove(&id);
    let Some(mut pending) = entry else {
        return;
    };
    // This task is the timer; do not abort it.
    pending.timer = None;

    tracing::warn!(id = %id, method = %pending.method, timeout_ms = timeout.as_millis() as u64, "MCP request timed out");
    let method = pending.method.clone();
    pending.resolve(Err(McpError::Timeout { method, after: timeout }));

    if let Some(transport) = transport.upgrade() {
        send_cancel_notice(transport.as_ref(), &id, "request timed out").await;
    }
}

async fn send_cancel_notice(transport: &dyn McpTransport, id: &RequestId, reason: &str) {
    let params = json!({ "requestId": id, "reason": reason });
    let frame = codec::encode(&Envelope::notification(methods::CANCELLED, Some(params)));
    if let Err(e) = transport.send(&frame).await {
        tracing::debug!(id = %id, error = %e, "could not send cancellation notice");
    }
}

pub struct Correlator {
    transport: Arc<dyn McpTransport>,
    next_id: AtomicI64,
    table: SharedTable,
}

impl Correlator {
    pub fn new(transport: Arc<dyn McpTransport>) -> Self {
        Self {
            transport,
            next_id: AtomicI64::new(1),
            table: SharedTable::default(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn McpTransport> {
        &self.transport
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a request and write it to the transport.
    ///
    /// The `timeout` counts from now, whether or not anyone waits on the
    /// handle. Fails with [`McpError::ConnectionLost`] once the table has
    /// been drained by [`fail_all`](Self::fail_all), and with the transport
    /// error if the write fails (the entry is removed again).
    pub async fn submit(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<PendingHandle, McpError> {
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        let deadline = tokio::time::Instant::now() + timeout;

        {
            let mut table = self.table.lock();
            if table.closed {
                return Err(McpError::ConnectionLost);
            }
            let timer = tokio::spawn(expire(
                Arc::downgrade(&self.table),
                Arc::downgrade(&self.transport),
                id.clone(),
                deadline,
                timeout,
            ));
            let prev = table.pending.insert(
                id.clone(),
                PendingRequest {
                    method: method.to_string(),
                    submitted_at: Instant::now(),
                    tx,
                    timer: Some(timer),
                },
            );
            debug_assert!(prev.is_none(), "request id reused");
        }

        let handle = PendingHandle {
            id,
            method: method.to_string(),
            timeout,
            rx,
            table: Arc::downgrade(&self.table),
        };

        tracing::debug!(id = %handle.id, method, "sending MCP request");
        let frame = codec::encode(&Envelope::request(handle.id.clone(), method, params));
        // On failure the dropped handle removes the entry.
        self.transport.send(&frame).await?;

        Ok(handle)
    }

    /// Wait for the response to `handle`.
    ///
    /// Resolves with [`McpError::Timeout`] once the deadline set at submit
    /// passes; the entry is then gone, the server has been told (best-effort)
    /// to stop, and a late response will be dropped as unknown.
    pub async fn wait(&self, mut handle: PendingHandle) -> Outcome {
        match (&mut handle.rx).await {
            Ok(outcome) => outcome,
            // Sender dropped without filling the slot.
            Err(_) => Err(McpError::ConnectionLost),
        }
    }

    /// [`submit`](Self::submit) then [`wait`](Self::wait).
    pub async fn request(&self, method: &str, params: Option<Value>, timeout: Duration) -> Outcome {
        let handle = self.submit(method, params, timeout).await?;
        self.wait(handle).await
    }

    /// Fill the slot for `id`. Returns `false` (and logs) when no such
    /// request is pending.
    pub fn complete(&self, id: &RequestId, outcome: Outcome) -> bool {
        let entry = self.table.lock().pending.remove(id);
        match entry {
            Some(pending) => {
                tracing::debug!(
                    id = %id,
                    method = %pending.method,
                    elapsed_ms = pending.submitted_at.elapsed().as_millis() as u64,
                    ok = outcome.is_ok(),
                    "MCP request completed"
                );
                pending.resolve(outcome);
                true
            }
            None => {
                tracing::warn!(id = %id, "dropping MCP response for unknown request id");
                false
            }
        }
    }

    /// Cancel a pending request locally and tell the server.
    ///
    /// The waiter resolves with [`McpError::Cancelled`]. The server may
    /// still finish the work; its response will be dropped as unknown.
    /// Returns `false` if the request was no longer pending.
    pub async fn cancel(&self, id: &RequestId, reason: &str) -> bool {
        let entry = self.table.lock().pending.remove(id);
        let Some(pending) = entry else {
            return false;
        };
        tracing::debug!(id = %id, method = %pending.method, reason, "cancelling MCP request");
        pending.resolve(Err(McpError::Cancelled));
        send_cancel_notice(self.transport.as_ref(), id, reason).await;
        true
    }

    /// Fail every pending request with [`McpError::ConnectionLost`] and
    /// refuse new ones. Only the first call does anything; returns how many
    /// requests it failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<(RequestId, PendingRequest)> = {
            let mut table = self.table.lock();
            if table.closed {
                return 0;
            }
            table.closed = true;
            table.pending.drain().collect()
        };

        let count = drained.len();
        for (id, pending) in drained {
            tracing::debug!(id = %id, method = %pending.method, "failing MCP request: connection lost");
            pending.resolve(Err(McpError::ConnectionLost));
        }
        if count > 0 {
            tracing::warn!(count, "failed pending MCP requests after connection loss");
        }
        count
    }

    /// Send a notification (no id, no response).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.send(&Envelope::notification(method, params)).await
    }

    /// Write any envelope, e.g. a reply to a server-initiated request.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), McpError> {
        self.transport.send(&codec::encode(envelope)).await?;
        Ok(())
    }

    /// Number of in-flight requests.
    pub fn pending_count(&self) -> usize {
        self.table.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.table.lock().closed
    }
}
