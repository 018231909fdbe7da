//! Client tests against an in-process HTTP + SSE MCP server built on axum.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use tw_mcp_client::transport::SseTransport;
use tw_mcp_client::{McpClient, McpError, McpTransport, SessionState, TransportConfig, TransportError};

#[derive(Default)]
struct ServerState {
    stream: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    connections: AtomicUsize,
    refuse: AtomicBool,
}

impl ServerState {
    /// End the current event stream, as a proxy timeout would.
    fn drop_stream(&self) {
        self.stream.lock().take();
    }
}

async fn sse_handler(State(state): State<Arc<ServerState>>) -> Response {
    if state.refuse.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    state.connections.fetch_add(1, Ordering::SeqCst);

    let (tx, rx) = mpsc::unbounded_channel();
    *state.stream.lock() = Some(tx);

    let endpoint = stream::once(async {
        Ok::<_, Infallible>(Event::default().event("endpoint").data("/messages?session=1"))
    });
    let messages = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (Ok(event), rx)) });
    Sse::new(endpoint.chain(messages)).into_response()
}

async fn message_handler(State(state): State<Arc<ServerState>>, Json(body): Json<Value>) -> StatusCode {
    if let Some(reply) = reply_to(&body) {
        if let Some(tx) = state.stream.lock().as_ref() {
            let _ = tx.send(Event::default().event("message").data(reply.to_string()));
        }
    }
    StatusCode::ACCEPTED
}

fn reply_to(request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let result = match request["method"].as_str()? {
        "initialize" => json!({
            "protocolVersion": "2025-03-26",
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": { "name": "axum-sse", "version": "0.1.0" },
            "instructions": "say hi"
        }),
        "tools/list" => json!({
            "tools": [{
                "name": "echo",
                "description": "Echo a message back",
                "inputSchema": {
                    "type": "object",
                    "properties": { "message": { "type": "string" } },
                    "required": ["message"]
                }
            }]
        }),
        "tools/call" => {
            let message = request["params"]["arguments"]["message"].as_str().unwrap_or_default();
            json!({ "content": [{ "type": "text", "text": format!("echo: {message}") }] })
        }
        "ping" => json!({}),
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {other}") }
            }))
        }
    };
    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

async fn start_server() -> (Arc<ServerState>, String) {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route("/sse", get(sse_handler))
        .route("/messages", post(message_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (state, format!("http://{addr}/sse"))
}

async fn connect(url: &str) -> McpClient {
    let mut config = TransportConfig::stream(url);
    config.timeout_seconds = 5;
    config.handshake_timeout_seconds = 5;
    McpClient::connect(&config).await.unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn handshake_and_call_over_sse() {
    let (_state, url) = start_server().await;
    let client = connect(&url).await;

    let session = client.session();
    assert_eq!(session.state, SessionState::Ready);
    assert_eq!(session.protocol_version.as_deref(), Some("2025-03-26"));
    assert_eq!(session.instructions.as_deref(), Some("say hi"));

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);

    let result = client.call_tool("echo", json!({ "message": "over http" }), None).await.unwrap();
    assert_eq!(result.text(), "echo: over http");

    client.ping().await.unwrap();
    client.close().await;
    assert_eq!(client.state(), SessionState::Closed);
}

#[tokio::test]
async fn stream_is_reopened_once_after_it_drops() {
    let (state, url) = start_server().await;
    let client = connect(&url).await;
    assert_eq!(state.connections.load(Ordering::SeqCst), 1);

    state.drop_stream();
    wait_until(|| state.connections.load(Ordering::SeqCst) == 2).await;
    // Give the new stream time to deliver its endpoint event.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = client.call_tool("echo", json!({ "message": "still here" }), None).await.unwrap();
    assert_eq!(result.text(), "echo: still here");
    assert_eq!(client.state(), SessionState::Ready);

    client.close().await;
}

#[tokio::test]
async fn failed_reconnect_closes_the_session() {
    let (state, url) = start_server().await;
    let client = connect(&url).await;

    state.refuse.store(true, Ordering::SeqCst);
    state.drop_stream();

    wait_until(|| client.state() == SessionState::Closed).await;
    assert!(matches!(
        client.call_tool("echo", json!({ "message": "x" }), None).await,
        Err(McpError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn unreachable_server_is_a_connection_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = McpClient::connect(&TransportConfig::stream(format!("http://{addr}/sse")))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Connection(_)));
}

/// Serves fixed raw chunks on `/sse`, a little apart, then holds the stream open.
async fn start_raw_server(chunks: Vec<&'static [u8]>) -> String {
    let handler = move || {
        let chunks = chunks.clone();
        async move {
            let body = stream::iter(chunks)
                .then(|chunk| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, Infallible>(chunk)
                })
                .chain(stream::pending());
            ([(CONTENT_TYPE, "text/event-stream")], Body::from_stream(body))
        }
    };
    let app = Router::new().route("/sse", get(handler));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/sse")
}

#[tokio::test]
async fn event_split_inside_a_character_and_a_crlf() {
    let url = start_raw_server(vec![
        b"event: endpoint\r\ndata: /messages\r\n\r\n",
        b"event: message\r",
        b"\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"text\":\"caf\xC3",
        b"\xA9\"}}\r\n\r\n",
    ])
    .await;

    let transport = SseTransport::connect(&url, Duration::from_secs(5)).await.unwrap();
    assert!(transport.endpoint().as_str().ends_with("/messages"));

    let frame = tokio::time::timeout(Duration::from_secs(5), transport.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let frame: Value = serde_json::from_slice(&frame).unwrap();
    assert_eq!(frame["result"]["text"], "café");

    transport.shutdown().await;
}

#[tokio::test]
async fn silent_server_fails_connect_within_the_wait() {
    // Accepts TCP connections but never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let url = format!("http://{addr}/sse");
    let connect = SseTransport::connect(&url, Duration::from_millis(300));
    let result = tokio::time::timeout(Duration::from_secs(5), connect).await.expect("connect hung");
    assert!(matches!(result, Err(TransportError::Http(_))));
}
