//! Unit tests for the JSON-RPC dispatcher over an in-memory duplex stream.
//!
//! The "agent" end of each test is driven by hand: it reads the lines the
//! connection writes and writes replies back.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

use acp_host::acp::connection::Attachment;
use acp_host::models::permission::PermissionOutcome;
use acp_host::models::update::{SessionUpdate, ToolCallStatus};
use acp_host::{AppError, Connection, ConnectionEvent, Subscription};

const WAIT: Duration = Duration::from_secs(5);

/// Hand-driven far end of a duplex stream.
struct Peer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl Peer {
    async fn next(&mut self) -> Value {
        let line = tokio::time::timeout(WAIT, self.lines.next_line())
            .await
            .expect("peer read timed out")
            .expect("peer read failed")
            .expect("stream closed");
        serde_json::from_str(&line).expect("connection wrote invalid JSON")
    }

    async fn send(&mut self, message: &Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }
}

fn connect() -> (Connection, Attachment, Peer) {
    let connection = Connection::new("test");
    let (host, peer) = tokio::io::duplex(64 * 1024);
    let (host_read, host_write) = tokio::io::split(host);
    let attachment = connection.attach_io(host_read, host_write);
    let (peer_read, peer_write) = tokio::io::split(peer);
    let peer = Peer {
        lines: BufReader::new(peer_read).lines(),
        writer: peer_write,
    };
    (connection, attachment, peer)
}

async fn next_event(events: &mut Subscription) -> ConnectionEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("no event")
        .expect("bus closed")
}

// ── Id correlation ───────────────────────────────────────────────────────────

/// Responses delivered in reverse order still resolve the right callers.
#[tokio::test]
async fn concurrent_requests_resolve_by_id_regardless_of_order() {
    let (connection, _attachment, mut peer) = connect();

    let first = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.request("test/first", json!({})).await })
    };
    let second = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.request("test/second", json!({})).await })
    };

    let a = peer.next().await;
    let b = peer.next().await;
    assert_eq!(a["jsonrpc"], "2.0");
    assert_ne!(a["id"], b["id"], "ids must be unique");

    for request in [&b, &a] {
        let method = request["method"].as_str().unwrap().to_owned();
        peer.send(&json!({"jsonrpc": "2.0", "id": request["id"], "result": {"method": method}}))
            .await;
    }

    let first = first.await.unwrap().expect("first request");
    let second = second.await.unwrap().expect("second request");
    assert_eq!(first, json!({"method": "test/first"}));
    assert_eq!(second, json!({"method": "test/second"}));
    assert_eq!(connection.pending_count(), 0);
}

/// Ids start at 1 and strictly increase.
#[tokio::test]
async fn ids_start_at_one_and_increase() {
    let (connection, _attachment, mut peer) = connect();

    for expected in 1..=3_u64 {
        let pending = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.request("test/echo", json!({})).await })
        };
        let request = peer.next().await;
        assert_eq!(request["id"], expected);
        peer.send(&json!({"jsonrpc": "2.0", "id": expected, "result": null}))
            .await;
        assert_eq!(pending.await.unwrap().unwrap(), Value::Null);
    }
}

/// An error response rejects the caller with the peer's code and message,
/// falling back to "Unknown JSON-RPC error".
#[tokio::test]
async fn error_responses_reject_the_caller() {
    let (connection, _attachment, mut peer) = connect();

    let pending = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.request("test/fail", json!({})).await })
    };
    let request = peer.next().await;
    peer.send(&json!({"jsonrpc": "2.0", "id": request["id"], "error": {"code": -32000}}))
        .await;

    match pending.await.unwrap() {
        Err(AppError::Rpc { code, message }) => {
            assert_eq!(code, -32000);
            assert_eq!(message, "Unknown JSON-RPC error");
        }
        other => panic!("expected rpc error, got {other:?}"),
    }
}

// ── Inbound routing ──────────────────────────────────────────────────────────

/// An unknown inbound method gets `-32601` and the connection keeps working.
#[tokio::test]
async fn unknown_method_gets_method_not_found_and_connection_survives() {
    let (connection, _attachment, mut peer) = connect();

    peer.send(&json!({"jsonrpc": "2.0", "id": 9, "method": "nonexistent"}))
        .await;
    let reply = peer.next().await;
    assert_eq!(reply["id"], 9);
    assert_eq!(reply["error"]["code"], -32601);
    assert!(reply.get("result").is_none());

    let pending = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.request("test/after", json!({})).await })
    };
    let request = peer.next().await;
    assert_eq!(request["method"], "test/after");
    peer.send(&json!({"jsonrpc": "2.0", "id": request["id"], "result": "ok"}))
        .await;
    assert_eq!(pending.await.unwrap().unwrap(), json!("ok"));
}

/// `session/update` notifications become typed events.
#[tokio::test]
async fn session_updates_are_forwarded_as_events() {
    let (connection, _attachment, mut peer) = connect();
    let mut events = connection.subscribe();

    peer.send(&json!({
        "jsonrpc": "2.0",
        "method": "session/update",
        "params": {
            "sessionId": "s1",
            "update": {"sessionUpdate": "agent_message_chunk", "content": {"type": "text", "text": "hi"}}
        }
    }))
    .await;

    match next_event(&mut events).await {
        ConnectionEvent::SessionUpdate(notification) => assert_eq!(notification.session_id, "s1"),
        other => panic!("expected session update, got {other:?}"),
    }
}

/// Updates with mistyped fields are still delivered as typed events.
#[tokio::test]
async fn session_updates_with_mistyped_fields_stay_typed() {
    let (connection, _attachment, mut peer) = connect();
    let mut events = connection.subscribe();

    peer.send(&json!({
        "jsonrpc": "2.0",
        "method": "session/update",
        "params": {
            "sessionId": "s1",
            "update": {
                "sessionUpdate": "plan",
                "entries": [{"content": "step one", "priority": 1}, {"status": "pending"}]
            }
        }
    }))
    .await;
    match next_event(&mut events).await {
        ConnectionEvent::SessionUpdate(notification) => match notification.update {
            SessionUpdate::Plan(plan) => assert_eq!(plan.entries.len(), 2),
            other => panic!("expected plan, got {other:?}"),
        },
        other => panic!("expected session update, got {other:?}"),
    }

    peer.send(&json!({
        "jsonrpc": "2.0",
        "method": "session/update",
        "params": {
            "sessionId": "s1",
            "update": {
                "sessionUpdate": "tool_call_update",
                "toolCallId": "c1",
                "status": "completed",
                "title": {"text": "x"}
            }
        }
    }))
    .await;
    match next_event(&mut events).await {
        ConnectionEvent::SessionUpdate(notification) => match notification.update {
            SessionUpdate::ToolCallUpdate(fields) => {
                assert_eq!(fields.tool_call_id, "c1");
                assert_eq!(fields.status, Some(ToolCallStatus::Completed));
                assert_eq!(fields.title, None);
            }
            other => panic!("expected tool_call_update, got {other:?}"),
        },
        other => panic!("expected session update, got {other:?}"),
    }
}

/// Unparsable lines are logged as `protocol_log` and do not break the stream.
#[tokio::test]
async fn unparsable_line_becomes_protocol_log() {
    let (connection, _attachment, mut peer) = connect();
    let mut events = connection.subscribe();

    peer.writer.write_all(b"{oops\n").await.unwrap();
    match next_event(&mut events).await {
        ConnectionEvent::ProtocolLog { text } => assert_eq!(text, "{oops"),
        other => panic!("expected protocol log, got {other:?}"),
    }
    assert!(connection.is_attached());
}

// ── Permission requests ──────────────────────────────────────────────────────

/// A permission request is surfaced under the string form of its id and can
/// be answered exactly once.
#[tokio::test]
async fn permission_request_is_answered_once_by_string_handle() {
    let (connection, _attachment, mut peer) = connect();
    let mut events = connection.subscribe();

    peer.send(&json!({
        "jsonrpc": "2.0",
        "id": 42,
        "method": "session/request_permission",
        "params": {
            "sessionId": "s1",
            "toolCall": {"toolCallId": "c1", "title": "Run ls", "kind": "bash"},
            "options": [
                {"optionId": "allow", "name": "Allow", "kind": "allow_once"},
                {"optionId": "reject", "name": "Reject", "kind": "reject_once"}
            ]
        }
    }))
    .await;

    let request = match next_event(&mut events).await {
        ConnectionEvent::PermissionRequest(request) => request,
        other => panic!("expected permission request, got {other:?}"),
    };
    assert_eq!(request.request_id, "42");
    assert_eq!(request.tool_kind.as_deref(), Some("bash"));
    assert_eq!(connection.pending_permission_ids(), vec!["42".to_owned()]);

    connection
        .respond_permission("42", PermissionOutcome::selected("allow"))
        .expect("first answer");
    let reply = peer.next().await;
    assert_eq!(reply["id"], 42, "the numeric request id must be echoed");
    assert_eq!(
        reply["result"],
        json!({"outcome": {"outcome": "selected", "optionId": "allow"}})
    );

    let second = connection.respond_permission("42", PermissionOutcome::Cancelled);
    match second {
        Err(AppError::NotFound(msg)) => assert!(msg.contains("unknown permission request id")),
        other => panic!("expected not found, got {other:?}"),
    }
}

/// A permission request with malformed params is rejected with `-32602`.
#[tokio::test]
async fn malformed_permission_request_gets_invalid_params() {
    let (_connection, _attachment, mut peer) = connect();

    peer.send(&json!({
        "jsonrpc": "2.0",
        "id": "p-1",
        "method": "session/request_permission",
        "params": {"options": "not a list"}
    }))
    .await;
    let reply = peer.next().await;
    assert_eq!(reply["id"], "p-1");
    assert_eq!(reply["error"]["code"], -32602);
}

// ── Transport and exit ───────────────────────────────────────────────────────

/// Without an attached process, `request` and `notify` fail immediately.
#[tokio::test]
async fn writes_without_process_fail_immediately() {
    let connection = Connection::new("idle");

    match connection.request("test/x", json!({})).await {
        Err(AppError::NotRunning(msg)) => assert!(msg.contains("process is not running")),
        other => panic!("expected not running, got {other:?}"),
    }
    assert!(matches!(
        connection.notify("test/x", json!({})),
        Err(AppError::NotRunning(_))
    ));
    assert_eq!(connection.pending_count(), 0);
}

/// Detaching on exit rejects every pending request with the exit reason and
/// later requests fail until a new process is attached.
#[tokio::test]
async fn exit_rejects_all_pending_then_not_running() {
    let (connection, attachment, mut peer) = connect();

    let calls: Vec<_> = (0..2)
        .map(|_| {
            let connection = connection.clone();
            tokio::spawn(async move { connection.request("test/slow", json!({})).await })
        })
        .collect();
    let _ = peer.next().await;
    let _ = peer.next().await;
    assert_eq!(connection.pending_count(), 2);

    assert!(connection.detach(
        attachment.generation(),
        "ACP process exited (code=1, signal=null)"
    ));
    for call in calls {
        match call.await.unwrap() {
            Err(AppError::Process(msg)) => assert!(msg.contains("code=1"), "got: {msg}"),
            other => panic!("expected process error, got {other:?}"),
        }
    }
    assert_eq!(connection.pending_count(), 0);
    assert!(matches!(
        connection.request("test/after", json!({})).await,
        Err(AppError::NotRunning(_))
    ));
}

/// Detach also drops the permission lookup, and a stale generation is a no-op.
#[tokio::test]
async fn stale_generation_cannot_detach_successor() {
    let (connection, first, _peer) = connect();
    let stale = first.generation();
    first.cancel();

    let (host, _peer2) = tokio::io::duplex(1024);
    let (read, write) = tokio::io::split(host);
    let second = connection.attach_io(read, write);
    assert_ne!(second.generation(), stale);

    assert!(!connection.detach(stale, "late exit of the old process"));
    assert!(connection.is_attached());
    assert!(connection.detach(second.generation(), "stopped"));
    assert!(!connection.is_attached());
}

/// A request deadline removes the waiter so the id is never resolved later.
#[tokio::test]
async fn request_with_timeout_expires_and_forgets_waiter() {
    let (connection, _attachment, mut peer) = connect();

    let result = connection
        .request_with_timeout("test/hang", json!({}), Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(AppError::Timeout(_))));
    assert_eq!(connection.pending_count(), 0);

    // The late reply matches nothing and is reported as a plain notification.
    let mut events = connection.subscribe();
    let request = peer.next().await;
    peer.send(&json!({"jsonrpc": "2.0", "id": request["id"], "result": 1}))
        .await;
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Notification { .. }
    ));
}

/// Notifications carry no id.
#[tokio::test]
async fn notify_writes_a_line_without_id() {
    let (connection, _attachment, mut peer) = connect();

    connection
        .notify("session/cancel", json!({"sessionId": "s1"}))
        .unwrap();
    let line = peer.next().await;
    assert_eq!(line["method"], "session/cancel");
    assert!(line.get("id").is_none());
}
