//! Permission negotiation data model.

use serde::{Deserialize, Serialize};

/// Params of an inbound `session/request_permission` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionParams {
    /// Session the tool call belongs to.
    #[serde(default)]
    pub session_id: String,
    /// The tool call awaiting authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<PermissionToolCall>,
    /// Choices offered to the user.
    #[serde(default)]
    pub options: Vec<PermissionOption>,
}

/// Tool call summary embedded in a permission request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionToolCall {
    /// Tool call identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Tool kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// One choice in a permission request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Identifier sent back in the outcome.
    pub option_id: String,
    /// Display label.
    #[serde(default)]
    pub name: String,
    /// `allow_once`, `allow_always`, `reject_once`, `reject_always`, or
    /// anything else the agent invents.
    #[serde(default)]
    pub kind: String,
}

impl PermissionOption {
    /// Whether this option grants permission.
    #[must_use]
    pub fn is_allow(&self) -> bool {
        self.kind.starts_with("allow")
    }
}

/// The user's decision, sent back as `{"outcome": …}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PermissionOutcome {
    /// The request was dismissed.
    Cancelled,
    /// An option was picked.
    Selected {
        /// The chosen option.
        #[serde(rename = "optionId")]
        option_id: String,
    },
}

impl PermissionOutcome {
    /// Shorthand for `selected{optionId}`.
    #[must_use]
    pub fn selected(option_id: impl Into<String>) -> Self {
        Self::Selected {
            option_id: option_id.into(),
        }
    }
}

/// Result body of a `session/request_permission` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestPermissionResponse {
    /// The decision.
    pub outcome: PermissionOutcome,
}

/// A permission request as seen by the host, keyed by its string handle.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    /// String form of the JSON-RPC id; used to answer the request.
    pub request_id: String,
    /// Session the request belongs to.
    pub session_id: String,
    /// Tool call being authorized, if the agent named one.
    pub tool_call_id: Option<String>,
    /// Tool kind, used as the key for remembered choices.
    pub tool_kind: Option<String>,
    /// Display title.
    pub title: Option<String>,
    /// Choices offered.
    pub options: Vec<PermissionOption>,
}

impl PermissionRequest {
    /// Flatten wire params into the host-side view.
    #[must_use]
    pub fn from_params(request_id: String, params: RequestPermissionParams) -> Self {
        let tool_call = params.tool_call.unwrap_or_default();
        Self {
            request_id,
            session_id: params.session_id,
            tool_call_id: tool_call.tool_call_id,
            tool_kind: tool_call.kind.filter(|k| !k.is_empty()),
            title: tool_call.title,
            options: params.options,
        }
    }

    /// Look up an offered option by id.
    #[must_use]
    pub fn option(&self, option_id: &str) -> Option<&PermissionOption> {
        self.options.iter().find(|o| o.option_id == option_id)
    }
}
