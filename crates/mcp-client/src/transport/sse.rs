//! HTTP + server-sent-events transport.
//!
//! The client holds a long-lived `GET` on the SSE URL. The server first
//! announces, in an `endpoint` event, where the client should POST its
//! frames; every later `message` event carries one inbound frame.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};

use super::{McpTransport, TransportError};

/// Upper bound for a single POST of an outbound frame.
const POST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for the TCP connect of any request.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// SSE transport for servers exposed over HTTP.
pub struct SseTransport {
    http: reqwest::Client,
    sse_url: Url,
    endpoint: parking_lot::RwLock<Url>,
    reader: Mutex<SseReader>,
    /// How long opening (or reopening) the stream may take.
    open_timeout: Duration,
    closed: Notify,
    alive: AtomicBool,
}

impl SseTransport {
    /// Open the event stream and wait for the `endpoint` event. Each of the
    /// two steps may take up to `wait`.
    pub async fn connect(url: &str, wait: Duration) -> Result<Self, TransportError> {
        let sse_url = Url::parse(url).map_err(|e| TransportError::Config(format!("invalid SSE url {url:?}: {e}")))?;
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(wait))
            .build()?;

        let response = open_stream(&http, &sse_url, wait).await?;
        let mut reader = SseReader::new(response);

        let endpoint = tokio::time::timeout(wait, reader.wait_for_endpoint(&sse_url))
            .await
            .map_err(|_| {
                TransportError::Protocol(format!("no endpoint event within {}s", wait.as_secs()))
            })??;

        tracing::info!(sse_url = %sse_url, endpoint = %endpoint, "MCP SSE stream established");

        Ok(Self {
            http,
            sse_url,
            endpoint: parking_lot::RwLock::new(endpoint),
            reader: Mutex::new(reader),
            open_timeout: wait,
            closed: Notify::new(),
            alive: AtomicBool::new(true),
        })
    }

    /// Where outbound frames are currently POSTed.
    pub fn endpoint(&self) -> Url {
        self.endpoint.read().clone()
    }

    /// Replace a dead stream with a fresh one. Called at most once per
    /// failure; the caller surfaces the error if this fails.
    async fn reopen(&self, reader: &mut SseReader) -> Result<(), TransportError> {
        reader.response = None;
        reader.buffer.clear();
        tracing::warn!(sse_url = %self.sse_url, "MCP SSE stream lost, reconnecting");
        let response = open_stream(&self.http, &self.sse_url, self.open_timeout).await?;
        reader.response = Some(response);
        reader.fresh = true;
        tracing::info!(sse_url = %self.sse_url, "MCP SSE stream re-established");
        Ok(())
    }
}

/// GET the SSE URL. Gives up when no response headers arrive within
/// `timeout`.
async fn open_stream(
    http: &reqwest::Client,
    url: &Url,
    timeout: Duration,
) -> Result<reqwest::Response, TransportError> {
    let request = http.get(url.clone()).header(ACCEPT, "text/event-stream").send();
    let response = tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| TransportError::Http(format!("no response from {url} within {}ms", timeout.as_millis())))??;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            status,
            url: url.to_string(),
            body,
        });
    }
    Ok(response)
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let endpoint = self.endpoint();
        let response = self
            .http
            .post(endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .timeout(POST_TIMEOUT)
            .body(frame.to_vec())
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status,
                url: endpoint.to_string(),
                body,
            });
        }
        Ok(())
    }

    async fn recv(&self) -> Option<Result<Vec<u8>, TransportError>> {
        let mut reader = self.reader.lock().await;
        loop {
            if let Some(frame) = reader.frames.pop_front() {
                return Some(Ok(frame));
            }
            if !self.alive.load(Ordering::SeqCst) {
                return None;
            }

            let mut announced = None;
            let pulled = tokio::select! {
                _ = self.closed.notified() => return None,
                pulled = reader.pull(&self.sse_url, &mut announced) => pulled,
            };
            if let Some(endpoint) = announced {
                tracing::debug!(endpoint = %endpoint, "MCP SSE endpoint updated");
                *self.endpoint.write() = endpoint;
            }

            let reconnect_failed = match pulled {
                Ok(true) => continue,
                Ok(false) if reader.fresh => {
                    Some(TransportError::Disconnected("SSE stream closed right after reconnect".into()))
                }
                Ok(false) => None,
                Err(e) if reader.fresh => Some(e),
                Err(e) => {
                    tracing::warn!(error = %e, "MCP SSE stream failed");
                    None
                }
            };
            if let Some(e) = reconnect_failed {
                self.alive.store(false, Ordering::SeqCst);
                reader.response = None;
                return Some(Err(e));
            }
            if !self.alive.load(Ordering::SeqCst) {
                return None;
            }
            let reopened = tokio::select! {
                _ = self.closed.notified() => return None,
                reopened = self.reopen(&mut reader) => reopened,
            };
            if let Err(e) = reopened {
                self.alive.store(false, Ordering::SeqCst);
                reader.response = None;
                return Some(Err(e));
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.closed.notify_one();
        self.reader.lock().await.response = None;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SseReader {
    response: Option<reqwest::Response>,
    buffer: EventBuffer,
    frames: VecDeque<Vec<u8>>,
    /// Set by a reconnect, cleared by the first chunk on the new stream.
    fresh: bool,
}

impl SseReader {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response: Some(response),
            buffer: EventBuffer::default(),
            frames: VecDeque::new(),
            fresh: false,
        }
    }

    /// Read one chunk, queueing any frames it completes. An announced
    /// endpoint is written to `endpoint`. Returns `false` at end of stream.
    async fn pull(&mut self, base: &Url, endpoint: &mut Option<Url>) -> Result<bool, TransportError> {
        let Some(response) = self.response.as_mut() else {
            return Ok(false);
        };
        let Some(bytes) = response.chunk().await? else {
            return Ok(false);
        };
        self.fresh = false;
        self.buffer.push(&bytes);

        for event in self.buffer.drain_events() {
            match event.event.as_deref() {
                Some("endpoint") => match resolve_endpoint(base, &event.data) {
                    Ok(url) => *endpoint = Some(url),
                    Err(e) => tracing::warn!(error = %e, "ignoring bad MCP SSE endpoint event"),
                },
                None | Some("message") => self.frames.push_back(event.data.into_bytes()),
                Some(other) => tracing::debug!(event = %other, "ignoring MCP SSE event"),
            }
        }
        Ok(true)
    }

    async fn wait_for_endpoint(&mut self, base: &Url) -> Result<Url, TransportError> {
        let mut endpoint = None;
        loop {
            if let Some(url) = endpoint.take() {
                return Ok(url);
            }
            if !self.pull(base, &mut endpoint).await? {
                return Err(TransportError::Protocol("SSE stream closed before endpoint event".into()));
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct SseEvent {
    event: Option<String>,
    data: String,
}

/// Raw bytes of the event stream, with line endings normalised to `\n`.
///
/// Bytes are only decoded once a whole event has arrived, so a chunk
/// boundary inside a multi-byte character or a `\r\n` pair is harmless.
#[derive(Default)]
struct EventBuffer {
    bytes: Vec<u8>,
    /// The last byte pushed was a `\r`; a `\n` right after it is dropped.
    after_cr: bool,
}

impl EventBuffer {
    fn push(&mut self, chunk: &[u8]) {
        for &b in chunk {
            if std::mem::take(&mut self.after_cr) && b == b'\n' {
                continue;
            }
            if b == b'\r' {
                self.bytes.push(b'\n');
                self.after_cr = true;
            } else {
                self.bytes.push(b);
            }
        }
    }

    fn clear(&mut self) {
        self.bytes.clear();
        self.after_cr = false;
    }

    /// Pull complete events out of the buffer.
    ///
    /// Events are delimited by a blank line. Multiple `data:` lines are
    /// joined with `\n`; comments, `id:` and `retry:` lines are ignored, as
    /// are events without data. A trailing partial event stays buffered.
    fn drain_events(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();

        while let Some(pos) = self.bytes.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.bytes.drain(..pos + 2).collect();
            let Ok(block) = std::str::from_utf8(&block[..pos]) else {
                tracing::warn!(len = pos, "dropping MCP SSE event that is not valid UTF-8");
                continue;
            };

            let mut event = None;
            let mut data: Vec<&str> = Vec::new();
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    event = Some(name.trim().to_string());
                } else if let Some(payload) = line.strip_prefix("data:") {
                    data.push(payload.trim());
                }
            }
            let data = data.join("\n");
            if !data.is_empty() {
                events.push(SseEvent { event, data });
            }
        }

        events
    }
}

/// The endpoint event carries either a bare URI or `{"uri": ...}`; relative
/// URIs are resolved against the SSE URL.
fn resolve_endpoint(base: &Url, data: &str) -> Result<Url, TransportError> {
    let raw = if data.trim_start().starts_with('{') {
        let value: Value = serde_json::from_str(data)
            .map_err(|e| TransportError::Protocol(format!("endpoint event is not valid JSON: {e}")))?;
        value
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::Protocol("endpoint event has no `uri`".into()))?
            .to_string()
    } else {
        data.trim().to_string()
    };
    base.join(&raw)
        .map_err(|e| TransportError::Protocol(format!("invalid endpoint {raw:?}: {e}")))
}
