//! Unit tests for the session reducer and the multi-session engine.
//!
//! Updates are built from wire JSON so the tests also pin the
//! `sessionUpdate` discriminators.

use std::path::PathBuf;

use serde_json::{json, Value};

use acp_host::models::session::{NewSessionResponse, Role, SessionState};
use acp_host::models::update::{SessionNotification, SessionUpdate, ToolCallStatus};
use acp_host::session::{apply, replay, SessionEngine};

fn update(value: Value) -> SessionUpdate {
    serde_json::from_value(value).expect("valid session update")
}

fn agent_chunk(text: &str) -> SessionUpdate {
    update(json!({
        "sessionUpdate": "agent_message_chunk",
        "content": {"type": "text", "text": text}
    }))
}

fn user_chunk(text: &str) -> SessionUpdate {
    update(json!({
        "sessionUpdate": "user_message_chunk",
        "content": {"type": "text", "text": text}
    }))
}

// ── Transcript coalescing ────────────────────────────────────────────────────

/// Consecutive chunks of the same role merge into one message.
#[test]
fn consecutive_agent_chunks_coalesce() {
    let state = replay("s1", &[agent_chunk("He"), agent_chunk("llo")]);

    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].role, Role::Assistant);
    assert_eq!(state.messages[0].text, "Hello");
}

/// A chunk of a different role starts a new message.
#[test]
fn interleaved_roles_start_new_messages() {
    let state = replay(
        "s1",
        &[
            user_chunk("hi"),
            agent_chunk("He"),
            user_chunk("again"),
            agent_chunk("llo"),
        ],
    );

    let roles: Vec<Role> = state.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert_eq!(state.messages[3].text, "llo");
}

/// Empty and non-text chunks change nothing.
#[test]
fn empty_and_non_text_chunks_are_ignored() {
    let image = update(json!({
        "sessionUpdate": "agent_message_chunk",
        "content": {"type": "image", "data": "AAAA", "mimeType": "image/png"}
    }));
    let state = replay("s1", &[agent_chunk(""), image]);
    assert!(state.messages.is_empty());
}

/// `agent_thought_chunk` is accepted as an alias of `thought_chunk`.
#[test]
fn thought_chunks_accept_both_discriminators() {
    let state = replay(
        "s1",
        &[
            update(json!({
                "sessionUpdate": "thought_chunk",
                "content": {"type": "text", "text": "thinking "}
            })),
            update(json!({
                "sessionUpdate": "agent_thought_chunk",
                "content": {"type": "text", "text": "harder"}
            })),
        ],
    );
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].role, Role::Thought);
    assert_eq!(state.messages[0].text, "thinking harder");
}

// ── Tool calls ───────────────────────────────────────────────────────────────

/// `tool_call_update` only overwrites the fields it carries.
#[test]
fn tool_call_update_patches_present_fields() {
    let state = replay(
        "s1",
        &[
            update(json!({
                "sessionUpdate": "tool_call",
                "toolCallId": "c1",
                "title": "Read file",
                "kind": "read",
                "status": "pending"
            })),
            update(json!({
                "sessionUpdate": "tool_call_update",
                "toolCallId": "c1",
                "status": "completed"
            })),
        ],
    );

    let call = &state.tool_calls["c1"];
    assert_eq!(call.title.as_deref(), Some("Read file"));
    assert_eq!(call.kind.as_deref(), Some("read"));
    assert_eq!(call.status, Some(ToolCallStatus::Completed));
    assert!(call.is_terminal());
}

/// A second `tool_call` for the same id replaces the entry wholesale.
#[test]
fn repeated_tool_call_overwrites_every_field() {
    let state = replay(
        "s1",
        &[
            update(json!({
                "sessionUpdate": "tool_call",
                "toolCallId": "c1",
                "title": "Old title",
                "kind": "edit",
                "status": "in_progress"
            })),
            update(json!({
                "sessionUpdate": "tool_call",
                "toolCallId": "c1",
                "status": "pending"
            })),
        ],
    );

    let call = &state.tool_calls["c1"];
    assert_eq!(call.title, None);
    assert_eq!(call.kind, None);
    assert_eq!(call.status, Some(ToolCallStatus::Pending));
}

/// An update for an unseen id creates the entry from what it carries.
#[test]
fn tool_call_update_for_unknown_id_creates_entry() {
    let state = apply(
        SessionState::new("s1"),
        &update(json!({
            "sessionUpdate": "tool_call_update",
            "toolCallId": "late",
            "kind": "bash",
            "status": "failed"
        })),
    );

    let call = &state.tool_calls["late"];
    assert_eq!(call.tool_call_id, "late");
    assert_eq!(call.kind.as_deref(), Some("bash"));
    assert_eq!(call.title, None);
    assert_eq!(state.active_tool_calls().count(), 0);
}

/// Unknown status strings are kept as `Unknown` rather than failing.
#[test]
fn unknown_tool_status_is_tolerated() {
    let state = apply(
        SessionState::new("s1"),
        &update(json!({
            "sessionUpdate": "tool_call",
            "toolCallId": "c9",
            "status": "exploded"
        })),
    );
    assert_eq!(state.tool_calls["c9"].status, Some(ToolCallStatus::Unknown));
    assert_eq!(state.active_tool_calls().count(), 1);
}

/// A mistyped field reads as absent; the rest of the patch still applies.
#[test]
fn mistyped_tool_call_fields_do_not_drop_the_update() {
    let state = replay(
        "s1",
        &[
            update(json!({
                "sessionUpdate": "tool_call",
                "toolCallId": "c1",
                "title": "Read file",
                "status": "pending"
            })),
            update(json!({
                "sessionUpdate": "tool_call_update",
                "toolCallId": "c1",
                "status": "completed",
                "title": {"text": "x"},
                "kind": 7
            })),
        ],
    );

    let call = &state.tool_calls["c1"];
    assert_eq!(call.status, Some(ToolCallStatus::Completed));
    assert_eq!(call.title.as_deref(), Some("Read file"));
    assert_eq!(call.kind, None);
}

/// On first sighting a mistyped field is simply left unset.
#[test]
fn mistyped_first_sighting_keeps_valid_fields() {
    let state = apply(
        SessionState::new("s1"),
        &update(json!({
            "sessionUpdate": "tool_call",
            "toolCallId": "c2",
            "title": ["not", "a", "string"],
            "kind": "edit",
            "status": 3
        })),
    );

    let call = &state.tool_calls["c2"];
    assert_eq!(call.title, None);
    assert_eq!(call.kind.as_deref(), Some("edit"));
    assert_eq!(call.status, None);
}

// ── Replacement lists and metadata ───────────────────────────────────────────

#[test]
fn available_commands_are_replaced() {
    let state = replay(
        "s1",
        &[
            update(json!({
                "sessionUpdate": "available_commands_update",
                "availableCommands": [{"name": "a"}, {"name": "b"}]
            })),
            update(json!({
                "sessionUpdate": "available_commands_update",
                "availableCommands": [{"name": "c", "description": "only"}]
            })),
        ],
    );
    assert_eq!(state.available_commands.len(), 1);
    assert_eq!(state.available_commands[0].name, "c");
}

/// Plan entries are coerced to `{content, priority?, status?}`: missing or
/// mistyped content becomes text or empty, mistyped optionals are dropped.
#[test]
fn plan_entries_are_coerced() {
    let state = apply(
        SessionState::new("s1"),
        &update(json!({
            "sessionUpdate": "plan",
            "entries": [
                {"content": "step one", "priority": 1},
                {"status": "pending"},
                {"content": 42, "priority": "high", "status": "completed"},
                "not an entry"
            ]
        })),
    );

    let plan: Vec<(&str, Option<&str>, Option<&str>)> = state
        .plan
        .iter()
        .map(|e| (e.content.as_str(), e.priority.as_deref(), e.status.as_deref()))
        .collect();
    assert_eq!(
        plan,
        vec![
            ("step one", None, None),
            ("", None, Some("pending")),
            ("42", Some("high"), Some("completed")),
            ("", None, None),
        ]
    );
}

/// A non-array plan replaces the plan with an empty one.
#[test]
fn plan_without_entry_array_clears_plan() {
    let state = replay(
        "s1",
        &[
            update(json!({"sessionUpdate": "plan", "entries": [{"content": "a"}]})),
            update(json!({"sessionUpdate": "plan", "entries": {"content": "b"}})),
        ],
    );
    assert!(state.plan.is_empty());
}

#[test]
fn model_update_sets_current_model() {
    let state = apply(
        SessionState::new("s1"),
        &update(json!({"sessionUpdate": "current_model_update", "currentModelId": "m2"})),
    );
    assert_eq!(state.current_model_id.as_deref(), Some("m2"));
}

/// Unknown discriminators deserialize and leave the state untouched.
#[test]
fn unknown_update_kind_is_ignored() {
    let unknown = update(json!({"sessionUpdate": "something_new", "payload": 1}));
    assert_eq!(unknown, SessionUpdate::Unknown);

    let before = replay("s1", &[agent_chunk("x")]);
    let after = apply(before.clone(), &unknown);
    assert_eq!(before, after);
}

// ── Engine ───────────────────────────────────────────────────────────────────

fn notification(session_id: &str, update: SessionUpdate) -> SessionNotification {
    SessionNotification {
        session_id: session_id.to_owned(),
        update,
    }
}

/// Sessions are tracked independently.
#[test]
fn engine_keeps_sessions_apart() {
    let mut engine = SessionEngine::new();
    engine.handle(&notification("a", agent_chunk("one")));
    engine.handle(&notification("b", agent_chunk("two")));

    assert_eq!(engine.get("a").unwrap().messages[0].text, "one");
    assert_eq!(engine.get("b").unwrap().messages[0].text, "two");
    assert!(engine.get("c").is_none());
}

/// Opening a session after its replay arrived keeps the replay and seeds
/// the metadata from the response.
#[test]
fn open_keeps_earlier_updates_and_seeds_metadata() {
    let mut engine = SessionEngine::new();
    engine.handle(&notification("s1", user_chunk("earlier")));

    let response: NewSessionResponse = serde_json::from_value(json!({
        "sessionId": "s1",
        "modes": {
            "availableModes": [{"id": "default", "name": "Default"}, {"id": "plan", "name": "Plan"}],
            "currentModeId": "default"
        }
    }))
    .unwrap();
    let state = engine.open("s1", Some(PathBuf::from("/work")), &response);

    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.current_mode_id.as_deref(), Some("default"));
    assert_eq!(state.available_modes.len(), 2);
    assert_eq!(state.cwd.as_deref(), Some(std::path::Path::new("/work")));
    assert_eq!(state.current_model_id, None);
}

#[test]
fn engine_reports_tool_kind_and_forgets_on_reset() {
    let mut engine = SessionEngine::new();
    engine.handle(&notification(
        "s1",
        update(json!({"sessionUpdate": "tool_call", "toolCallId": "c1", "kind": "bash"})),
    ));

    assert_eq!(engine.tool_kind("s1", "c1"), Some("bash"));
    assert_eq!(engine.tool_kind("s1", "c2"), None);
    assert_eq!(engine.tool_kind("s2", "c1"), None);

    engine.reset();
    assert!(engine.get("s1").is_none());
}
