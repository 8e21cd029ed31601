//! `initialize` / `authenticate` payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::acp::protocol::PROTOCOL_VERSION;

/// Params of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version spoken by the host.
    pub protocol_version: u32,
    /// What the host can do for the agent.
    #[serde(default)]
    pub client_capabilities: ClientCapabilities,
    /// Host identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<Implementation>,
}

impl InitializeParams {
    /// Params for a host that offers no file-system or terminal access.
    #[must_use]
    pub fn new(client_info: Implementation) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            client_capabilities: ClientCapabilities::default(),
            client_info: Some(client_info),
        }
    }
}

/// Host capabilities advertised to the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientCapabilities {
    /// File-system access.
    #[serde(default)]
    pub fs: FsCapabilities,
    /// Terminal access.
    #[serde(default)]
    pub terminal: bool,
}

/// File-system capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FsCapabilities {
    /// `fs/read_text_file` supported.
    #[serde(default)]
    pub read_text_file: bool,
    /// `fs/write_text_file` supported.
    #[serde(default)]
    pub write_text_file: bool,
}

/// Name, title and version of either peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Implementation {
    /// Machine name.
    #[serde(default)]
    pub name: String,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Version string.
    #[serde(default)]
    pub version: String,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// Protocol version the agent settled on.
    #[serde(default)]
    pub protocol_version: u32,
    /// Agent identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_info: Option<Implementation>,
    /// Opaque capability map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_capabilities: Option<Value>,
    /// Authentication methods the agent accepts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_methods: Option<Vec<Value>>,
}
