//! Session request/response payloads and the derived per-session state.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::content::ContentBlock;
use crate::models::update::{AvailableCommand, PlanEntry, ToolCallStatus};

// ── Wire payloads ─────────────────────────────────────────────────────────────

/// Params of `session/new`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionParams {
    /// Working directory for the session.
    pub cwd: PathBuf,
    /// MCP servers the agent should connect to.
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// Params of `session/load`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadSessionParams {
    /// Session to resume.
    pub session_id: String,
    /// Working directory for the session.
    pub cwd: PathBuf,
    /// MCP servers the agent should connect to.
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// Result of `session/new` and `session/load`.
///
/// `session_id` is optional because `session/load` may omit it; the caller
/// already knows the id it asked for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResponse {
    /// Agent-assigned session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Mode options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modes: Option<SessionModeState>,
    /// Model options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<SessionModelState>,
}

/// Mode options and the current selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionModeState {
    /// Selectable modes.
    #[serde(default)]
    pub available_modes: Vec<SessionMode>,
    /// Current mode id.
    #[serde(default)]
    pub current_mode_id: String,
}

/// A selectable agent mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionMode {
    /// Mode id.
    #[serde(default)]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Model options and the current selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionModelState {
    /// Selectable models.
    #[serde(default)]
    pub available_models: Vec<ModelInfo>,
    /// Current model id.
    #[serde(default)]
    pub current_model_id: String,
}

/// A selectable model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model id.
    #[serde(default)]
    pub model_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Params of `session/prompt`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptParams {
    /// Target session.
    pub session_id: String,
    /// User turn.
    pub prompt: Vec<ContentBlock>,
}

/// Result of `session/prompt`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    /// Why the turn ended.
    pub stop_reason: StopReason,
}

/// Why a prompt turn ended. Open set: unknown reasons are preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StopReason {
    /// The agent finished its turn.
    EndTurn,
    /// The turn was cancelled via `session/cancel`.
    Cancelled,
    /// Token budget exhausted.
    MaxTokens,
    /// The model refused.
    Refusal,
    /// Anything else.
    Other(String),
}

impl From<String> for StopReason {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "end_turn" => Self::EndTurn,
            "cancelled" => Self::Cancelled,
            "max_tokens" => Self::MaxTokens,
            "refusal" => Self::Refusal,
            _ => Self::Other(raw),
        }
    }
}

impl From<StopReason> for String {
    fn from(reason: StopReason) -> Self {
        reason.to_string()
    }
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndTurn => f.write_str("end_turn"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::MaxTokens => f.write_str("max_tokens"),
            Self::Refusal => f.write_str("refusal"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

/// Params of the `session/cancel` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CancelParams {
    /// Session whose turn should stop.
    pub session_id: String,
}

/// Params of `session/set_mode`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SetModeParams {
    /// Target session.
    pub session_id: String,
    /// Mode to switch to.
    pub mode_id: String,
}

/// Params of `session/set_model`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SetModelParams {
    /// Target session.
    pub session_id: String,
    /// Model to switch to.
    pub model_id: String,
}

// ── Derived state ─────────────────────────────────────────────────────────────

/// Transcript role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Host user.
    User,
    /// Agent reply.
    Assistant,
    /// Agent reasoning.
    Thought,
}

/// One coalesced transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Who spoke.
    pub role: Role,
    /// Accumulated text.
    pub text: String,
}

/// A tracked tool call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Identifier.
    pub tool_call_id: String,
    /// Display title.
    pub title: Option<String>,
    /// Tool kind.
    pub kind: Option<String>,
    /// Lifecycle status.
    pub status: Option<ToolCallStatus>,
    /// Opaque output.
    pub content: Option<Value>,
    /// Opaque locations.
    pub locations: Option<Value>,
}

impl ToolCall {
    /// Whether the call reached `completed` or `failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(ToolCallStatus::is_terminal)
    }
}

/// Everything the host knows about one session, derived from updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// Session id.
    pub session_id: String,
    /// Working directory the session was opened with.
    pub cwd: Option<PathBuf>,
    /// Coalesced transcript.
    pub messages: Vec<Message>,
    /// Tool calls by id.
    pub tool_calls: HashMap<String, ToolCall>,
    /// Current plan.
    pub plan: Vec<PlanEntry>,
    /// Slash commands advertised by the agent.
    pub available_commands: Vec<AvailableCommand>,
    /// Current mode id.
    pub current_mode_id: Option<String>,
    /// Mode options.
    pub available_modes: Vec<SessionMode>,
    /// Current model id.
    pub current_model_id: Option<String>,
    /// Model options.
    pub available_models: Vec<ModelInfo>,
}

impl SessionState {
    /// Empty state for `session_id`.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Seed modes and models from a `session/new` or `session/load` result.
    pub fn apply_metadata(&mut self, response: &NewSessionResponse) {
        let modes = response.modes.clone().unwrap_or_default();
        self.available_modes = modes.available_modes;
        self.current_mode_id = non_empty(modes.current_mode_id);

        let models = response.models.clone().unwrap_or_default();
        self.available_models = models.available_models;
        self.current_model_id = non_empty(models.current_model_id);
    }

    /// Tool calls that have not reached a terminal status.
    pub fn active_tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.tool_calls.values().filter(|call| !call.is_terminal())
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}
