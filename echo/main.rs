#![forbid(unsafe_code)]

//! `acp-echo-agent`: a minimal ACP agent that echoes prompts back.
//!
//! Speaks ACP on stdin/stdout and logs to stderr. Each prompt produces a
//! plan, one `read` tool call and the echoed text in two chunks. Prompts
//! mentioning `bash` first ask the host for permission to run a `bash` tool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use acp_host::acp::protocol::{INVALID_PARAMS, PROTOCOL_VERSION};
use acp_host::agent::{Agent, AgentFuture, AgentSideConnection};
use acp_host::models::content::ContentBlock;
use acp_host::models::handshake::{Implementation, InitializeParams, InitializeResponse};
use acp_host::models::permission::{
    PermissionOption, PermissionOutcome, PermissionToolCall, RequestPermissionParams,
};
use acp_host::models::session::{
    CancelParams, LoadSessionParams, ModelInfo, NewSessionParams, NewSessionResponse,
    PromptParams, PromptResponse, SessionMode, SessionModeState, SessionModelState, SetModeParams,
    SetModelParams, StopReason,
};
use acp_host::models::update::{
    AvailableCommand, AvailableCommandsUpdate, CommandInput, ContentChunk, CurrentModeUpdate,
    CurrentModelUpdate, PlanEntry, PlanUpdate, SessionUpdate, ToolCallFields, ToolCallStatus,
};
use acp_host::{AppError, Result};

const MODES: &[(&str, &str)] = &[("default", "Default"), ("plan", "Plan")];
const MODEL_ID: &str = "echo-1";

#[derive(Debug)]
struct EchoSession {
    mode_id: String,
    /// (is_user, text) per turn, replayed by `session/load`.
    transcript: Vec<(bool, String)>,
    turn: Option<CancellationToken>,
}

struct EchoAgent {
    conn: AgentSideConnection,
    sessions: Mutex<HashMap<String, EchoSession>>,
    next_call: AtomicU64,
}

impl EchoAgent {
    fn new(conn: AgentSideConnection) -> Self {
        Self {
            conn,
            sessions: Mutex::new(HashMap::new()),
            next_call: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, EchoSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session_response(&self, session_id: &str) -> NewSessionResponse {
        let mode_id = self
            .lock()
            .get(session_id)
            .map_or_else(|| MODES[0].0.to_owned(), |s| s.mode_id.clone());
        NewSessionResponse {
            session_id: Some(session_id.to_owned()),
            modes: Some(SessionModeState {
                available_modes: MODES
                    .iter()
                    .map(|(id, name)| SessionMode {
                        id: (*id).to_owned(),
                        name: (*name).to_owned(),
                        description: None,
                    })
                    .collect(),
                current_mode_id: mode_id,
            }),
            models: Some(SessionModelState {
                available_models: vec![ModelInfo {
                    model_id: MODEL_ID.into(),
                    name: "Echo".into(),
                    description: Some("Repeats the prompt".into()),
                }],
                current_model_id: MODEL_ID.into(),
            }),
        }
    }

    fn announce_commands(&self, session_id: &str) -> Result<()> {
        self.conn.session_update(
            session_id,
            SessionUpdate::AvailableCommandsUpdate(AvailableCommandsUpdate {
                available_commands: vec![AvailableCommand {
                    name: "echo".into(),
                    description: Some("Echo the text back".into()),
                    input: Some(CommandInput {
                        hint: Some("text to echo".into()),
                    }),
                }],
            }),
        )
    }

    fn require_session(&self, session_id: &str) -> Result<()> {
        if self.lock().contains_key(session_id) {
            Ok(())
        } else {
            Err(AppError::Rpc {
                code: INVALID_PARAMS,
                message: format!("unknown session: {session_id}"),
            })
        }
    }

    async fn run_turn(
        &self,
        session_id: &str,
        text: String,
        cancel: &CancellationToken,
    ) -> Result<StopReason> {
        let send = |update| self.conn.session_update(session_id, update);

        send(SessionUpdate::Plan(PlanUpdate {
            entries: vec![
                plan_entry("Read the prompt", "in_progress"),
                plan_entry("Echo it back", "pending"),
            ],
        }))?;

        let call_id = format!("call_{}", self.next_call.fetch_add(1, Ordering::Relaxed));
        send(SessionUpdate::ToolCall(ToolCallFields {
            tool_call_id: call_id.clone(),
            title: Some("Read prompt".into()),
            kind: Some("read".into()),
            status: Some(ToolCallStatus::Pending),
            ..ToolCallFields::default()
        }))?;
        send(SessionUpdate::ToolCallUpdate(ToolCallFields {
            tool_call_id: call_id,
            status: Some(ToolCallStatus::Completed),
            content: Some(json!([{ "type": "content", "content": { "type": "text", "text": text } }])),
            ..ToolCallFields::default()
        }))?;

        let mut reply = text;
        if reply.contains("bash") {
            let outcome = tokio::select! {
                () = cancel.cancelled() => return Ok(StopReason::Cancelled),
                outcome = self.ask_for_bash(session_id) => outcome?,
            };
            let allowed = matches!(&outcome, PermissionOutcome::Selected { option_id } if option_id.starts_with("allow"));
            if !allowed {
                reply = "permission denied".into();
            }
        }
        if cancel.is_cancelled() {
            return Ok(StopReason::Cancelled);
        }

        send(SessionUpdate::Plan(PlanUpdate {
            entries: vec![
                plan_entry("Read the prompt", "completed"),
                plan_entry("Echo it back", "completed"),
            ],
        }))?;

        let (head, tail) = split_in_two(&reply);
        send(SessionUpdate::AgentMessageChunk(ContentChunk::text(head)))?;
        send(SessionUpdate::AgentMessageChunk(ContentChunk::text(tail)))?;

        if let Some(session) = self.lock().get_mut(session_id) {
            session.transcript.push((false, reply));
        }
        Ok(StopReason::EndTurn)
    }

    async fn ask_for_bash(&self, session_id: &str) -> Result<PermissionOutcome> {
        let call_id = format!("call_{}", self.next_call.fetch_add(1, Ordering::Relaxed));
        self.conn.session_update(
            session_id,
            SessionUpdate::ToolCall(ToolCallFields {
                tool_call_id: call_id.clone(),
                title: Some("Run bash".into()),
                kind: Some("bash".into()),
                status: Some(ToolCallStatus::Pending),
                ..ToolCallFields::default()
            }),
        )?;
        let params = RequestPermissionParams {
            session_id: session_id.to_owned(),
            tool_call: Some(PermissionToolCall {
                tool_call_id: Some(call_id.clone()),
                title: Some("Run bash".into()),
                kind: Some("bash".into()),
            }),
            options: vec![
                option("allow", "Allow once", "allow_once"),
                option("allow_always", "Always allow", "allow_always"),
                option("reject", "Reject", "reject_once"),
            ],
        };
        let outcome = self.conn.request_permission(&params).await?;
        debug!(?outcome, "bash permission answered");

        let status = match &outcome {
            PermissionOutcome::Selected { option_id } if option_id.starts_with("allow") => {
                ToolCallStatus::Completed
            }
            _ => ToolCallStatus::Failed,
        };
        self.conn.session_update(
            session_id,
            SessionUpdate::ToolCallUpdate(ToolCallFields {
                tool_call_id: call_id,
                status: Some(status),
                ..ToolCallFields::default()
            }),
        )?;
        Ok(outcome)
    }
}

impl Agent for EchoAgent {
    fn initialize(&self, params: InitializeParams) -> AgentFuture<'_, InitializeResponse> {
        Box::pin(async move {
            info!(client = ?params.client_info, "initialize");
            Ok(InitializeResponse {
                protocol_version: params.protocol_version.min(PROTOCOL_VERSION),
                agent_info: Some(Implementation {
                    name: "acp-echo-agent".into(),
                    title: "Echo Agent".into(),
                    version: env!("CARGO_PKG_VERSION").into(),
                }),
                agent_capabilities: Some(json!({ "loadSession": true })),
                auth_methods: Some(Vec::new()),
            })
        })
    }

    fn authenticate(&self, _params: Value) -> AgentFuture<'_, Value> {
        Box::pin(async { Ok(json!({})) })
    }

    fn new_session(&self, params: NewSessionParams) -> AgentFuture<'_, NewSessionResponse> {
        Box::pin(async move {
            let session_id = format!("sess_{}", Uuid::new_v4().simple());
            info!(%session_id, cwd = %params.cwd.display(), "session created");
            self.lock().insert(
                session_id.clone(),
                EchoSession {
                    mode_id: MODES[0].0.to_owned(),
                    transcript: Vec::new(),
                    turn: None,
                },
            );
            self.announce_commands(&session_id)?;
            Ok(self.session_response(&session_id))
        })
    }

    fn load_session(&self, params: LoadSessionParams) -> AgentFuture<'_, NewSessionResponse> {
        Box::pin(async move {
            self.require_session(&params.session_id)?;
            let transcript = self
                .lock()
                .get(&params.session_id)
                .map(|s| s.transcript.clone())
                .unwrap_or_default();
            for (is_user, text) in transcript {
                let chunk = ContentChunk::text(text);
                let update = if is_user {
                    SessionUpdate::UserMessageChunk(chunk)
                } else {
                    SessionUpdate::AgentMessageChunk(chunk)
                };
                self.conn.session_update(&params.session_id, update)?;
            }
            self.announce_commands(&params.session_id)?;
            Ok(self.session_response(&params.session_id))
        })
    }

    fn prompt(&self, params: PromptParams) -> AgentFuture<'_, PromptResponse> {
        Box::pin(async move {
            let text = prompt_text(&params.prompt);
            let text = text.strip_prefix("/echo ").map_or(text.clone(), str::to_owned);

            let cancel = CancellationToken::new();
            {
                let mut sessions = self.lock();
                let session = sessions.get_mut(&params.session_id).ok_or_else(|| {
                    AppError::Rpc {
                        code: INVALID_PARAMS,
                        message: format!("unknown session: {}", params.session_id),
                    }
                })?;
                session.transcript.push((true, text.clone()));
                session.turn = Some(cancel.clone());
            }

            let stop_reason = self.run_turn(&params.session_id, text, &cancel).await;
            if let Some(session) = self.lock().get_mut(&params.session_id) {
                session.turn = None;
            }
            let stop_reason = stop_reason?;
            info!(session_id = %params.session_id, %stop_reason, "turn finished");
            Ok(PromptResponse { stop_reason })
        })
    }

    fn cancel(&self, params: CancelParams) -> AgentFuture<'_, ()> {
        Box::pin(async move {
            if let Some(turn) = self
                .lock()
                .get(&params.session_id)
                .and_then(|s| s.turn.as_ref())
            {
                info!(session_id = %params.session_id, "cancelling turn");
                turn.cancel();
            }
            Ok(())
        })
    }

    fn set_session_mode(&self, params: SetModeParams) -> AgentFuture<'_, Value> {
        Box::pin(async move {
            if !MODES.iter().any(|(id, _)| *id == params.mode_id) {
                return Err(AppError::Rpc {
                    code: INVALID_PARAMS,
                    message: format!("unknown mode: {}", params.mode_id),
                });
            }
            match self.lock().get_mut(&params.session_id) {
                Some(session) => session.mode_id.clone_from(&params.mode_id),
                None => {
                    return Err(AppError::Rpc {
                        code: INVALID_PARAMS,
                        message: format!("unknown session: {}", params.session_id),
                    })
                }
            }
            self.conn.session_update(
                &params.session_id,
                SessionUpdate::CurrentModeUpdate(CurrentModeUpdate {
                    current_mode_id: params.mode_id,
                }),
            )?;
            Ok(json!({}))
        })
    }

    fn set_session_model(&self, params: SetModelParams) -> AgentFuture<'_, Value> {
        Box::pin(async move {
            self.require_session(&params.session_id)?;
            if params.model_id != MODEL_ID {
                return Err(AppError::Rpc {
                    code: INVALID_PARAMS,
                    message: format!("unknown model: {}", params.model_id),
                });
            }
            self.conn.session_update(
                &params.session_id,
                SessionUpdate::CurrentModelUpdate(CurrentModelUpdate {
                    current_model_id: params.model_id,
                }),
            )?;
            Ok(Value::Null)
        })
    }
}

fn prompt_text(prompt: &[ContentBlock]) -> String {
    prompt
        .iter()
        .filter_map(ContentBlock::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}

fn plan_entry(content: &str, status: &str) -> PlanEntry {
    PlanEntry {
        content: content.into(),
        priority: Some("medium".into()),
        status: Some(status.into()),
    }
}

fn option(id: &str, name: &str, kind: &str) -> PermissionOption {
    PermissionOption {
        option_id: id.into(),
        name: name.into(),
        kind: kind.into(),
    }
}

/// Split at the char boundary nearest the middle.
fn split_in_two(text: &str) -> (&str, &str) {
    let mut mid = text.len() / 2;
    while !text.is_char_boundary(mid) {
        mid -= 1;
    }
    text.split_at(mid)
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?;

    let conn = AgentSideConnection::new(EchoAgent::new)?;
    conn.serve(tokio::io::stdin(), tokio::io::stdout())
        .closed()
        .await;
    info!("host closed the connection");
    Ok(())
}
