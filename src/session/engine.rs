//! Session engine: derives per-session state from `session/update` traffic.
//!
//! [`apply`] is a pure reducer over [`SessionState`]; [`SessionEngine`] keeps
//! one state per session id and feeds notifications through it. The engine
//! holds nothing that cannot be rebuilt by replaying the update stream, apart
//! from the mode/model metadata seeded by a `session/new` or `session/load`
//! response.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::debug;

use crate::models::session::{Message, NewSessionResponse, Role, SessionState, ToolCall};
use crate::models::update::{ContentChunk, SessionNotification, SessionUpdate, ToolCallFields};

/// Apply one update to `state` and return the new state.
#[must_use]
pub fn apply(mut state: SessionState, update: &SessionUpdate) -> SessionState {
    apply_in_place(&mut state, update);
    state
}

/// Fold a sequence of updates into a fresh state for `session_id`.
#[must_use]
pub fn replay<'a, I>(session_id: &str, updates: I) -> SessionState
where
    I: IntoIterator<Item = &'a SessionUpdate>,
{
    updates
        .into_iter()
        .fold(SessionState::new(session_id), apply)
}

fn apply_in_place(state: &mut SessionState, update: &SessionUpdate) {
    match update {
        SessionUpdate::AgentMessageChunk(chunk) => append_chunk(state, Role::Assistant, chunk),
        SessionUpdate::UserMessageChunk(chunk) => append_chunk(state, Role::User, chunk),
        SessionUpdate::ThoughtChunk(chunk) => append_chunk(state, Role::Thought, chunk),
        SessionUpdate::ToolCall(fields) => insert_tool_call(state, fields),
        SessionUpdate::ToolCallUpdate(fields) => patch_tool_call(state, fields),
        SessionUpdate::Plan(plan) => state.plan.clone_from(&plan.entries),
        SessionUpdate::AvailableCommandsUpdate(update) => {
            state
                .available_commands
                .clone_from(&update.available_commands);
        }
        SessionUpdate::CurrentModeUpdate(update) => {
            state.current_mode_id = Some(update.current_mode_id.clone());
        }
        SessionUpdate::CurrentModelUpdate(update) => {
            state.current_model_id = Some(update.current_model_id.clone());
        }
        SessionUpdate::Unknown => {}
    }
}

/// Append streamed text, coalescing with the previous entry of the same role.
fn append_chunk(state: &mut SessionState, role: Role, chunk: &ContentChunk) {
    let Some(text) = chunk
        .content
        .as_ref()
        .and_then(|block| block.as_text())
        .filter(|text| !text.is_empty())
    else {
        return;
    };

    match state.messages.last_mut() {
        Some(last) if last.role == role => last.text.push_str(text),
        _ => state.messages.push(Message {
            role,
            text: text.to_owned(),
        }),
    }
}

/// First sighting: every field is taken from the update, absent ones cleared.
fn insert_tool_call(state: &mut SessionState, fields: &ToolCallFields) {
    if fields.tool_call_id.is_empty() {
        return;
    }
    state.tool_calls.insert(
        fields.tool_call_id.clone(),
        ToolCall {
            tool_call_id: fields.tool_call_id.clone(),
            title: fields.title.clone(),
            kind: fields.kind.clone(),
            status: fields.status,
            content: fields.content.clone(),
            locations: fields.locations.clone(),
        },
    );
}

/// Patch: only fields present in the update overwrite the stored entry.
fn patch_tool_call(state: &mut SessionState, fields: &ToolCallFields) {
    if fields.tool_call_id.is_empty() {
        return;
    }
    let call = state
        .tool_calls
        .entry(fields.tool_call_id.clone())
        .or_insert_with(|| ToolCall {
            tool_call_id: fields.tool_call_id.clone(),
            ..ToolCall::default()
        });

    if let Some(title) = &fields.title {
        call.title = Some(title.clone());
    }
    if let Some(kind) = &fields.kind {
        call.kind = Some(kind.clone());
    }
    if let Some(status) = fields.status {
        call.status = Some(status);
    }
    if let Some(content) = &fields.content {
        call.content = Some(content.clone());
    }
    if let Some(locations) = &fields.locations {
        call.locations = Some(locations.clone());
    }
}

// ── Multi-session engine ─────────────────────────────────────────────────────

/// Derived state for every session seen on one connection.
#[derive(Debug, Default)]
pub struct SessionEngine {
    sessions: HashMap<String, SessionState>,
}

impl SessionEngine {
    /// Engine with no sessions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `session_id`, seeded with the modes and models of its
    /// `session/new` / `session/load` response.
    ///
    /// Updates that arrived for the session before its response (a
    /// `session/load` replay, an early command list) are kept.
    pub fn open(
        &mut self,
        session_id: &str,
        cwd: Option<PathBuf>,
        response: &NewSessionResponse,
    ) -> &SessionState {
        let state = self
            .sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| SessionState::new(session_id));
        state.cwd = cwd;
        state.apply_metadata(response);
        debug!(session_id, "session state opened");
        state
    }

    /// Feed one notification. Updates for a session never opened still
    /// create its state, so a `session/load` replay that races the load
    /// response is not lost.
    pub fn handle(&mut self, notification: &SessionNotification) -> &SessionState {
        let state = self
            .sessions
            .entry(notification.session_id.clone())
            .or_insert_with(|| SessionState::new(notification.session_id.clone()));
        apply_in_place(state, &notification.update);
        state
    }

    /// State of `session_id`, if known.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<&SessionState> {
        self.sessions.get(session_id)
    }

    /// Tool kind of `tool_call_id` in `session_id`, if recorded.
    #[must_use]
    pub fn tool_kind(&self, session_id: &str, tool_call_id: &str) -> Option<&str> {
        self.sessions
            .get(session_id)?
            .tool_calls
            .get(tool_call_id)?
            .kind
            .as_deref()
    }

    /// Forget `session_id`.
    pub fn remove(&mut self, session_id: &str) -> Option<SessionState> {
        self.sessions.remove(session_id)
    }

    /// Forget every session.
    pub fn reset(&mut self) {
        self.sessions.clear();
    }
}
