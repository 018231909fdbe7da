//! End-to-end client tests against a scripted in-process MCP server.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use tw_mcp_client::protocol::{error_codes, Envelope, JsonRpcError};
use tw_mcp_client::transport::{ChannelPeer, ChannelTransport};
use tw_mcp_client::{McpClient, McpError, SchemaViolation, SessionState, TransportConfig};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the server answers `initialize`.
#[derive(Clone)]
enum Init {
    Ok(Value),
    Version(&'static str),
    Reject,
    Silent,
}

struct Server {
    seen: Arc<Mutex<Vec<Envelope>>>,
    kill: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Server {
    /// Make the transport fail under the client.
    fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    fn methods(&self) -> Vec<String> {
        self.seen
            .lock()
            .iter()
            .filter_map(|e| e.method().map(str::to_string))
            .collect()
    }

    /// Wait for the client to hang up, then return every frame it sent.
    async fn finished(self) -> Vec<Envelope> {
        let _ = self.task.await;
        let seen = self.seen.lock().clone();
        seen
    }
}

fn tool_defs() -> Value {
    json!([
        {
            "name": "echo",
            "description": "Echo a message back",
            "inputSchema": {
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"]
            }
        },
        {
            "name": "add",
            "description": "Add two numbers",
            "inputSchema": {
                "type": "object",
                "properties": { "a": { "type": "number" }, "b": { "type": "number" } },
                "required": ["a", "b"]
            }
        },
        {
            "name": "delay",
            "description": "Reply with `tag` after `ms` milliseconds",
            "inputSchema": {
                "type": "object",
                "properties": { "ms": { "type": "integer" }, "tag": { "type": "string" } },
                "required": ["ms", "tag"]
            }
        },
        { "name": "hang", "description": "Never replies" },
        { "name": "fail", "description": "Replies with a JSON-RPC error" },
        { "name": "flaky", "description": "Replies with isError" }
    ])
}

fn text_result(text: &str, is_error: bool) -> Value {
    json!({ "content": [{ "type": "text", "text": text }], "isError": is_error })
}

fn respond(init: &Init, envelope: Envelope, defer: &mpsc::UnboundedSender<Envelope>) -> Option<Envelope> {
    let Envelope::Request { id, method, params } = envelope else {
        return None;
    };
    let params = params.unwrap_or(Value::Null);

    match method.as_str() {
        "initialize" => {
            let result = |version: &str, caps: &Value| {
                json!({
                    "protocolVersion": version,
                    "capabilities": caps,
                    "serverInfo": { "name": "scripted", "version": "0.0.1" }
                })
            };
            match init {
                Init::Ok(caps) => Some(Envelope::response(id, result("2024-11-05", caps))),
                Init::Version(v) => Some(Envelope::response(id, result(v, &json!({ "tools": {} })))),
                Init::Reject => Some(Envelope::error_response(id, JsonRpcError::new(-32602, "unsupported client"))),
                Init::Silent => None,
            }
        }
        "ping" => Some(Envelope::response(id, json!({}))),
        "tools/list" => Some(Envelope::response(id, json!({ "tools": tool_defs() }))),
        "tools/call" => {
            let args = &params["arguments"];
            match params["name"].as_str().unwrap_or_default() {
                "echo" => Some(Envelope::response(
                    id,
                    text_result(args["message"].as_str().unwrap_or_default(), false),
                )),
                "add" => {
                    let sum = args["a"].as_f64().unwrap_or_default() + args["b"].as_f64().unwrap_or_default();
                    Some(Envelope::response(id, text_result(&sum.to_string(), false)))
                }
                "delay" => {
                    let ms = args["ms"].as_u64().unwrap_or_default();
                    let tag = args["tag"].as_str().unwrap_or_default().to_string();
                    let defer = defer.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        let _ = defer.send(Envelope::response(id, text_result(&tag, false)));
                    });
                    None
                }
                "hang" => None,
                "fail" => Some(Envelope::error_response(id, JsonRpcError::new(-32000, "tool exploded"))),
                "flaky" => Some(Envelope::response(id, text_result("try again later", true))),
                other => Some(Envelope::error_response(
                    id,
                    JsonRpcError::new(-32602, format!("unknown tool {other}")),
                )),
            }
        }
        other => Some(Envelope::error_response(
            id,
            JsonRpcError::new(error_codes::METHOD_NOT_FOUND, format!("Method not found: {other}")),
        )),
    }
}

async fn run_server(
    mut peer: ChannelPeer,
    init: Init,
    seen: Arc<Mutex<Vec<Envelope>>>,
    mut kill: oneshot::Receiver<()>,
) {
    let (defer_tx, mut defer_rx) = mpsc::unbounded_channel::<Envelope>();
    loop {
        tokio::select! {
            killed = &mut kill => {
                if killed.is_ok() {
                    peer.fail("connection reset by peer");
                }
                return;
            }
            Some(reply) = defer_rx.recv() => {
                let _ = peer.send_envelope(&reply);
            }
            msg = peer.recv_envelope() => {
                let Some(Ok(envelope)) = msg else {
                    return;
                };
                seen.lock().push(envelope.clone());
                if let Some(reply) = respond(&init, envelope, &defer_tx) {
                    let _ = peer.send_envelope(&reply);
                }
            }
        }
    }
}

async fn connect_with(init: Init, config: TransportConfig) -> (Result<McpClient, McpError>, Server) {
    let (transport, peer) = ChannelTransport::pair();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (kill_tx, kill_rx) = oneshot::channel();
    let task = tokio::spawn(run_server(peer, init, seen.clone(), kill_rx));
    let client = McpClient::connect_with(Arc::new(transport), &config).await;
    (
        client,
        Server {
            seen,
            kill: Some(kill_tx),
            task,
        },
    )
}

async fn connect() -> (McpClient, Server) {
    let (client, server) = connect_with(Init::Ok(json!({ "tools": {}, "logging": {} })), TransportConfig::default()).await;
    (client.expect("connect"), server)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handshake
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn handshake_negotiates_intersection_and_discovers_tools() {
    let (client, server) = connect().await;

    let session = client.session();
    assert_eq!(session.state, SessionState::Ready);
    assert_eq!(session.capabilities, BTreeSet::from(["tools".to_string()]));
    assert_eq!(session.protocol_version.as_deref(), Some("2024-11-05"));
    assert_eq!(session.server_info.as_ref().unwrap().name, "scripted");

    assert_eq!(client.tools().len(), 6);
    assert_eq!(
        server.methods(),
        vec!["initialize", "notifications/initialized", "tools/list"]
    );

    let initialize = server.seen.lock()[0].clone();
    let Envelope::Request { params, .. } = initialize else {
        panic!("expected initialize request");
    };
    let params = params.unwrap();
    assert_eq!(params["protocolVersion"], "2024-11-05");
    assert_eq!(params["capabilities"], json!({ "tools": {} }));
    assert_eq!(params["clientInfo"]["name"], "toolwire");

    client.close().await;
}

#[tokio::test]
async fn rejected_initialize_is_a_handshake_error() {
    let (client, server) = connect_with(Init::Reject, TransportConfig::default()).await;
    let err = client.unwrap_err();
    assert!(matches!(err, McpError::Handshake(ref m) if m.contains("unsupported client")), "{err}");

    let seen = server.finished().await;
    assert_eq!(seen.len(), 1);
}

#[tokio::test]
async fn unsupported_protocol_version_is_a_handshake_error() {
    let (client, _server) = connect_with(Init::Version("1999-01-01"), TransportConfig::default()).await;
    assert!(matches!(client, Err(McpError::Handshake(ref m)) if m.contains("1999-01-01")));
}

#[tokio::test]
async fn silent_server_times_out_the_handshake() {
    let mut config = TransportConfig::default();
    config.handshake_timeout_seconds = 1;
    let started = Instant::now();
    let (client, _server) = connect_with(Init::Silent, config).await;
    assert!(matches!(client, Err(McpError::Handshake(ref m)) if m.contains("within 1s")));
    assert!(started.elapsed() >= Duration::from_secs(1));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool calls
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn call_tool_returns_text() {
    let (client, _server) = connect().await;

    let result = client.call_tool("echo", json!({ "message": "hello" }), None).await.unwrap();
    assert_eq!(result.text(), "hello");
    assert!(!result.is_error);

    let result = client.call_tool("add", json!({ "a": 1, "b": 2 }), None).await.unwrap();
    assert_eq!(result.text(), "3");

    client.close().await;
}

#[tokio::test]
async fn concurrent_calls_never_cross_talk() {
    let (client, _server) = connect().await;

    // Later calls finish first, so responses arrive in reverse order.
    let calls = (0..16u64).map(|i| {
        let client = client.clone();
        async move {
            let tag = format!("call-{i}");
            let args = json!({ "ms": (16 - i) * 10, "tag": tag });
            let result = client.call_tool("delay", args, None).await;
            (tag, result)
        }
    });

    for (tag, result) in futures_util::future::join_all(calls).await {
        assert_eq!(result.unwrap().text(), tag);
    }

    client.close().await;
}

#[tokio::test]
async fn timeout_then_late_response_is_dropped() {
    let (client, server) = connect().await;

    let started = Instant::now();
    let err = client
        .call_tool("delay", json!({ "ms": 1500, "tag": "late" }), Some(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Timeout { ref method, .. } if method == "tools/call"));
    assert!(started.elapsed() >= Duration::from_secs(1));

    // An unrelated call in flight while the late response lands.
    let in_flight = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .call_tool("delay", json!({ "ms": 800, "tag": "fresh" }), None)
                .await
        })
    };
    assert_eq!(in_flight.await.unwrap().unwrap().text(), "fresh");
    assert_eq!(client.state(), SessionState::Ready);

    let cancelled: Vec<_> = server
        .seen
        .lock()
        .iter()
        .filter(|e| e.method() == Some("notifications/cancelled"))
        .cloned()
        .collect();
    assert_eq!(cancelled.len(), 1);

    client.close().await;
}

#[tokio::test]
async fn validation_error_names_the_missing_field_and_sends_nothing() {
    let (client, server) = connect().await;

    let err = client.call_tool("add", json!({ "a": 1 }), None).await.unwrap_err();
    let McpError::SchemaValidation(violations) = err else {
        panic!("expected schema validation error, got {err:?}");
    };
    assert_eq!(violations.tool, "add");
    assert_eq!(violations.violations, vec![SchemaViolation::Missing { field: "b".into() }]);

    // Round-trip so every frame the client sent has reached the server.
    client.ping().await.unwrap();
    assert!(!server.methods().iter().any(|m| m == "tools/call"));

    client.close().await;
}

#[tokio::test]
async fn unknown_tool_is_not_found() {
    let (client, _server) = connect().await;
    let err = client.call_tool("nope", json!({}), None).await.unwrap_err();
    assert!(matches!(err, McpError::NotFound(ref name) if name == "nope"));
    client.close().await;
}

#[tokio::test]
async fn server_errors_and_tool_errors_are_distinguished() {
    let (client, _server) = connect().await;

    let err = client.call_tool("fail", json!({}), None).await.unwrap_err();
    assert!(matches!(err, McpError::Result(ref e) if e.code == -32000));
    assert!(err.is_retryable());

    let result = client.call_tool("flaky", json!({}), None).await.unwrap();
    assert!(result.is_error);
    assert_eq!(result.text(), "try again later");

    client.close().await;
}

#[tokio::test]
async fn cancel_resolves_the_caller_and_notifies_the_server() {
    let (client, server) = connect().await;

    let handle = client.start_tool_call("hang", json!({}), None).await.unwrap();
    let id = handle.id().clone();
    assert!(client.cancel(&id).await);
    assert!(matches!(client.wait(handle).await, Err(McpError::Cancelled)));

    client.ping().await.unwrap();
    let notice = server
        .seen
        .lock()
        .iter()
        .find(|e| e.method() == Some("notifications/cancelled"))
        .cloned()
        .unwrap();
    let Envelope::Notification { params, .. } = notice else {
        panic!("expected notification");
    };
    assert_eq!(params.unwrap()["requestId"], Value::from(id));

    client.close().await;
}

#[tokio::test]
async fn list_tools_round_trips() {
    let (client, server) = connect().await;
    let tools = client.list_tools().await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["add", "delay", "echo", "fail", "flaky", "hang"]);
    assert_eq!(server.methods().iter().filter(|m| *m == "tools/list").count(), 2);
    client.close().await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shutdown
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn transport_failure_fails_pending_calls_and_closes_the_session() {
    let (client, mut server) = connect().await;

    let first = client.start_tool_call("hang", json!({}), None).await.unwrap();
    let second = client.start_tool_call("hang", json!({}), None).await.unwrap();
    let waiters = [first, second].map(|handle| {
        let client = client.clone();
        tokio::spawn(async move { client.wait(handle).await })
    });

    server.kill();

    for waiter in waiters {
        assert!(matches!(waiter.await.unwrap(), Err(McpError::ConnectionLost)));
    }
    assert_eq!(client.state(), SessionState::Closed);

    let err = client.call_tool("echo", json!({ "message": "hi" }), None).await.unwrap_err();
    assert!(matches!(
        err,
        McpError::InvalidState {
            state: SessionState::Closed,
            ..
        }
    ));

    client.close().await;
    assert_eq!(client.state(), SessionState::Closed);
}

#[tokio::test]
async fn close_is_idempotent_and_sends_shutdown_notice() {
    let (client, server) = connect().await;

    let other = client.clone();
    tokio::join!(client.close(), other.close());
    client.close().await;
    assert_eq!(client.state(), SessionState::Closed);

    assert!(matches!(
        client.list_tools().await,
        Err(McpError::InvalidState { operation: "list_tools", .. })
    ));

    let seen = server.finished().await;
    let shutdowns = seen
        .iter()
        .filter(|e| e.method() == Some("notifications/shutdown"))
        .count();
    assert_eq!(shutdowns, 1);
}

#[tokio::test]
async fn dropping_the_server_closes_the_session() {
    let (client, mut server) = connect().await;
    server.task.abort();
    let _ = (&mut server.task).await;

    // The dispatch task notices the closed stream asynchronously.
    for _ in 0..100 {
        if client.state() == SessionState::Closed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(client.state(), SessionState::Closed);
    assert!(matches!(client.ping().await, Err(McpError::InvalidState { .. })));
}
