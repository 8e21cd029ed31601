//! `session/update` payloads.
//!
//! Each `sessionUpdate` discriminator maps to one [`SessionUpdate`] variant.
//! Discriminators this crate does not know deserialize to
//! [`SessionUpdate::Unknown`] and are ignored by the session engine.
//!
//! Payload fields decode leniently: a field of the wrong JSON type reads as
//! absent (or empty) instead of rejecting the whole update, so one odd field
//! never hides the rest of a patch.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::content::ContentBlock;

/// Params of a `session/update` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    /// Session the update belongs to.
    pub session_id: String,
    /// The update itself.
    pub update: SessionUpdate,
}

/// Closed set of streaming session updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// Streaming assistant text.
    AgentMessageChunk(ContentChunk),
    /// Echo of user input (replayed on `session/load`).
    UserMessageChunk(ContentChunk),
    /// Streaming agent reasoning.
    #[serde(alias = "agent_thought_chunk")]
    ThoughtChunk(ContentChunk),
    /// First sighting of a tool call.
    ToolCall(ToolCallFields),
    /// Patch to an existing tool call.
    ToolCallUpdate(ToolCallFields),
    /// Full replacement of the execution plan.
    Plan(PlanUpdate),
    /// Full replacement of the slash-command list.
    AvailableCommandsUpdate(AvailableCommandsUpdate),
    /// Current mode changed.
    CurrentModeUpdate(CurrentModeUpdate),
    /// Current model changed.
    CurrentModelUpdate(CurrentModelUpdate),
    /// Any discriminator not modelled here.
    #[serde(other)]
    Unknown,
}

/// Payload of the three `*_chunk` updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContentChunk {
    /// Chunk content; only text contributes to the transcript.
    #[serde(
        default,
        deserialize_with = "lenient::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub content: Option<ContentBlock>,
}

impl ContentChunk {
    /// Text chunk shorthand.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Some(ContentBlock::text(text)),
        }
    }
}

/// Lifecycle of a tool call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Announced, not started.
    Pending,
    /// Running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Status string this crate does not know.
    #[serde(other)]
    Unknown,
}

impl ToolCallStatus {
    /// Whether the UI should treat the call as finished.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

/// Fields shared by `tool_call` and `tool_call_update`.
///
/// Every field except the id is optional; absence means "not present in
/// this update", which matters for patch semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallFields {
    /// Tool call identifier; updates with an empty id are ignored.
    #[serde(default, deserialize_with = "lenient::text")]
    pub tool_call_id: String,
    /// Display title.
    #[serde(
        default,
        deserialize_with = "lenient::string",
        skip_serializing_if = "Option::is_none"
    )]
    pub title: Option<String>,
    /// Tool kind (`read`, `edit`, `bash`, …).
    #[serde(
        default,
        deserialize_with = "lenient::string",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,
    /// Lifecycle status.
    #[serde(
        default,
        deserialize_with = "lenient::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<ToolCallStatus>,
    /// Opaque tool output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Opaque file locations touched by the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Value>,
}

/// Payload of a `plan` update.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanUpdate {
    /// New plan, replacing the old one entirely.
    #[serde(default, deserialize_with = "lenient::list")]
    pub entries: Vec<PlanEntry>,
}

/// One entry of the execution plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanEntry {
    /// Entry text; empty when the agent omitted it.
    #[serde(default, deserialize_with = "lenient::text")]
    pub content: String,
    /// Free-form priority (`high`, `medium`, `low`).
    #[serde(
        default,
        deserialize_with = "lenient::string",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<String>,
    /// Free-form status (`pending`, `in_progress`, `completed`).
    #[serde(
        default,
        deserialize_with = "lenient::string",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<String>,
}

/// Payload of an `available_commands_update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableCommandsUpdate {
    /// Full replacement list.
    #[serde(default, deserialize_with = "lenient::list")]
    pub available_commands: Vec<AvailableCommand>,
}

/// A slash command advertised by the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailableCommand {
    /// Command name without the leading `/`.
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    /// One-line description.
    #[serde(
        default,
        deserialize_with = "lenient::string",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,
    /// Input hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<CommandInput>,
}

/// Input hint for a slash command.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandInput {
    /// Placeholder text shown after the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Payload of a `current_mode_update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentModeUpdate {
    /// New mode id.
    #[serde(default, deserialize_with = "lenient::text")]
    pub current_mode_id: String,
}

/// Payload of a `current_model_update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentModelUpdate {
    /// New model id.
    #[serde(default, deserialize_with = "lenient::text")]
    pub current_model_id: String,
}

/// Field decoders that never fail on a wrong JSON type.
mod lenient {
    use super::{Deserialize, DeserializeOwned, Deserializer, Value};

    /// Strings only; anything else reads as absent.
    pub(super) fn string<'de, D>(de: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(de)? {
            Value::String(s) => Some(s),
            _ => None,
        })
    }

    /// Strings as-is, numbers and booleans stringified, anything else empty.
    pub(super) fn text<'de, D>(de: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(de)? {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => String::new(),
        })
    }

    /// Whatever decodes as `T`; anything else reads as absent.
    pub(super) fn optional<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        Ok(serde_json::from_value(Value::deserialize(de)?).ok())
    }

    /// An array whose items that fail to decode fall back to their default;
    /// a non-array reads as empty.
    pub(super) fn list<'de, D, T>(de: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        Ok(match Value::deserialize(de)? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| serde_json::from_value(item).unwrap_or_default())
                .collect(),
            _ => Vec::new(),
        })
    }
}
