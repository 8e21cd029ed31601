//! Integration tests for the agent-side SDK: a host [`Connection`] and an
//! [`AgentSideConnection`] wired back to back over in-memory pipes.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use acp_host::acp::connection::Attachment;
use acp_host::acp::protocol::{INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};
use acp_host::agent::{Agent, AgentFuture, AgentSideConnection};
use acp_host::models::content::ContentBlock;
use acp_host::models::handshake::{Implementation, InitializeParams, InitializeResponse};
use acp_host::models::permission::{
    PermissionOption, PermissionOutcome, PermissionToolCall, RequestPermissionParams,
};
use acp_host::models::session::{
    CancelParams, NewSessionParams, NewSessionResponse, PromptParams, PromptResponse,
    SetModeParams, SetModelParams, StopReason,
};
use acp_host::models::update::{ContentChunk, SessionUpdate};
use acp_host::{AppError, Connection, ConnectionEvent};

use super::test_helpers::next_matching;

/// Minimal agent: echoes prompts, asks permission for prompts saying
/// "ask", and fails prompts saying "fail".
struct TestAgent {
    conn: AgentSideConnection,
    cancelled: Arc<Mutex<Vec<String>>>,
}

impl Agent for TestAgent {
    fn initialize(&self, params: InitializeParams) -> AgentFuture<'_, InitializeResponse> {
        Box::pin(async move {
            Ok(InitializeResponse {
                protocol_version: params.protocol_version,
                agent_info: Some(Implementation {
                    name: "test-agent".into(),
                    ..Implementation::default()
                }),
                ..InitializeResponse::default()
            })
        })
    }

    fn authenticate(&self, _params: Value) -> AgentFuture<'_, Value> {
        Box::pin(async {
            Err(AppError::Rpc {
                code: -32000,
                message: "authentication required".into(),
            })
        })
    }

    fn new_session(&self, _params: NewSessionParams) -> AgentFuture<'_, NewSessionResponse> {
        Box::pin(async {
            Ok(NewSessionResponse {
                session_id: Some("s1".into()),
                ..NewSessionResponse::default()
            })
        })
    }

    fn prompt(&self, params: PromptParams) -> AgentFuture<'_, PromptResponse> {
        Box::pin(async move {
            let text = params
                .prompt
                .iter()
                .find_map(ContentBlock::as_text)
                .unwrap_or_default()
                .to_owned();
            if text == "fail" {
                return Err(AppError::NotFound("nothing to do".into()));
            }
            if text == "ask" {
                let outcome = self
                    .conn
                    .request_permission(&RequestPermissionParams {
                        session_id: params.session_id.clone(),
                        tool_call: Some(PermissionToolCall {
                            tool_call_id: Some("t1".into()),
                            title: Some("Write file".into()),
                            kind: Some("edit".into()),
                        }),
                        options: vec![PermissionOption {
                            option_id: "yes".into(),
                            name: "Yes".into(),
                            kind: "allow_once".into(),
                        }],
                    })
                    .await?;
                let reply = match outcome {
                    PermissionOutcome::Selected { option_id } => format!("selected {option_id}"),
                    PermissionOutcome::Cancelled => "cancelled".to_owned(),
                };
                self.conn.session_update(
                    &params.session_id,
                    SessionUpdate::AgentMessageChunk(ContentChunk::text(reply)),
                )?;
            } else {
                self.conn.session_update(
                    &params.session_id,
                    SessionUpdate::AgentMessageChunk(ContentChunk::text(text)),
                )?;
            }
            Ok(PromptResponse {
                stop_reason: StopReason::EndTurn,
            })
        })
    }

    fn cancel(&self, params: CancelParams) -> AgentFuture<'_, ()> {
        Box::pin(async move {
            self.cancelled
                .lock()
                .unwrap()
                .push(params.session_id);
            Ok(())
        })
    }
}

struct Pair {
    host: Connection,
    _host_attachment: Attachment,
    _agent_attachment: Attachment,
    cancelled: Arc<Mutex<Vec<String>>>,
}

fn pair() -> Pair {
    let (host_io, agent_io) = tokio::io::duplex(64 * 1024);
    let cancelled = Arc::new(Mutex::new(Vec::new()));

    let agent_cancelled = Arc::clone(&cancelled);
    let agent = AgentSideConnection::new(move |conn| TestAgent {
        conn,
        cancelled: agent_cancelled,
    })
    .unwrap();
    let (agent_read, agent_write) = tokio::io::split(agent_io);
    let agent_attachment = agent.serve(agent_read, agent_write);

    let host = Connection::new("host");
    let (host_read, host_write) = tokio::io::split(host_io);
    let host_attachment = host.attach_io(host_read, host_write);

    Pair {
        host,
        _host_attachment: host_attachment,
        _agent_attachment: agent_attachment,
        cancelled,
    }
}

fn new_session_params() -> NewSessionParams {
    NewSessionParams {
        cwd: PathBuf::from("/"),
        mcp_servers: Vec::new(),
    }
}

// ── Routing ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn initialize_is_routed_to_the_agent() {
    let p = pair();
    let init = p
        .host
        .initialize(&InitializeParams::new(Implementation::default()))
        .await
        .unwrap();
    assert_eq!(init.protocol_version, 1);
    assert_eq!(init.agent_info.unwrap().name, "test-agent");
}

#[tokio::test]
async fn unserved_method_is_method_not_found() {
    let p = pair();
    match p.host.request("fs/read_text_file", json!({})).await {
        Err(AppError::Rpc { code, .. }) => assert_eq!(code, METHOD_NOT_FOUND),
        other => panic!("expected -32601, got {other:?}"),
    }
}

#[tokio::test]
async fn undecodable_params_are_invalid_params() {
    let p = pair();
    match p.host.request("session/prompt", json!({"prompt": 5})).await {
        Err(AppError::Rpc { code, .. }) => assert_eq!(code, INVALID_PARAMS),
        other => panic!("expected -32602, got {other:?}"),
    }
}

/// Agent errors become `-32603` unless they already carry a code.
#[tokio::test]
async fn agent_errors_map_to_rpc_codes() {
    let p = pair();
    p.host.new_session(&new_session_params()).await.unwrap();

    let failed = p
        .host
        .request(
            "session/prompt",
            json!({"sessionId": "s1", "prompt": [{"type": "text", "text": "fail"}]}),
        )
        .await;
    match failed {
        Err(AppError::Rpc { code, message }) => {
            assert_eq!(code, INTERNAL_ERROR);
            assert_eq!(message, "not found: nothing to do");
        }
        other => panic!("expected -32603, got {other:?}"),
    }

    match p.host.authenticate(json!({"methodId": "x"})).await {
        Err(AppError::Rpc { code, message }) => {
            assert_eq!(code, -32000);
            assert_eq!(message, "authentication required");
        }
        other => panic!("expected -32000, got {other:?}"),
    }
}

/// Optional methods fall back to permissive defaults.
#[tokio::test]
async fn optional_methods_have_defaults() {
    let p = pair();

    let loaded = p
        .host
        .load_session(&acp_host::models::session::LoadSessionParams {
            session_id: "old".into(),
            cwd: PathBuf::from("/"),
            mcp_servers: Vec::new(),
        })
        .await
        .unwrap();
    assert_eq!(loaded.session_id.as_deref(), Some("old"));

    let mode = p
        .host
        .set_mode(&SetModeParams {
            session_id: "s1".into(),
            mode_id: "plan".into(),
        })
        .await
        .unwrap();
    assert_eq!(mode, json!({"modes": []}));

    let model = p
        .host
        .set_model(&SetModelParams {
            session_id: "s1".into(),
            model_id: "m".into(),
        })
        .await
        .unwrap();
    assert_eq!(model, Value::Null);
}

// ── Agent → host traffic ─────────────────────────────────────────────────────

/// Session updates sent by the agent reach host subscribers before the
/// prompt resolves.
#[tokio::test]
async fn session_updates_precede_the_prompt_response() {
    let p = pair();
    let mut events = p.host.subscribe();

    let response = p
        .host
        .prompt(&PromptParams {
            session_id: "s1".into(),
            prompt: vec![ContentBlock::text("hello")],
        })
        .await
        .unwrap();
    assert_eq!(response.stop_reason, StopReason::EndTurn);

    match events.try_recv() {
        Some(ConnectionEvent::SessionUpdate(n)) => {
            assert_eq!(n.session_id, "s1");
            assert_eq!(
                n.update,
                SessionUpdate::AgentMessageChunk(ContentChunk::text("hello"))
            );
        }
        other => panic!("expected session update, got {other:?}"),
    }
}

/// A permission request round-trips through the host's answer.
#[tokio::test]
async fn permission_request_round_trip() {
    let p = pair();
    let mut events = p.host.subscribe();

    let turn = {
        let host = p.host.clone();
        tokio::spawn(async move {
            host.prompt(&PromptParams {
                session_id: "s1".into(),
                prompt: vec![ContentBlock::text("ask")],
            })
            .await
        })
    };

    let request = match next_matching(&mut events, |e| {
        matches!(e, ConnectionEvent::PermissionRequest(_))
    })
    .await
    {
        ConnectionEvent::PermissionRequest(request) => request,
        other => panic!("unexpected event {other:?}"),
    };
    assert_eq!(request.tool_kind.as_deref(), Some("edit"));
    assert_eq!(request.title.as_deref(), Some("Write file"));
    p.host
        .respond_permission(&request.request_id, PermissionOutcome::selected("yes"))
        .unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), turn)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(response.stop_reason, StopReason::EndTurn);

    match next_matching(&mut events, |e| matches!(e, ConnectionEvent::SessionUpdate(_))).await {
        ConnectionEvent::SessionUpdate(n) => assert_eq!(
            n.update,
            SessionUpdate::AgentMessageChunk(ContentChunk::text("selected yes"))
        ),
        other => panic!("unexpected event {other:?}"),
    }
}

/// `session/cancel` is delivered to the agent and never answered.
#[tokio::test]
async fn cancel_notification_reaches_agent() {
    let p = pair();
    p.host
        .cancel(&CancelParams {
            session_id: "s1".into(),
        })
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while p.cancelled.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("cancel never delivered");
    assert_eq!(*p.cancelled.lock().unwrap(), vec!["s1".to_owned()]);
    assert_eq!(p.host.pending_count(), 0);
}
