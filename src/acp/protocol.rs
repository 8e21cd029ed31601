//! JSON-RPC 2.0 envelope shapes and ACP method names.
//!
//! Inbound traffic is classified from loosely-typed [`Value`]s (see
//! [`crate::acp::reader::Frame`]); the types here describe what the host
//! writes back onto the wire.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppError;

/// Protocol version advertised during `initialize`.
pub const PROTOCOL_VERSION: u32 = 1;

/// JSON-RPC version literal carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method not found.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid params.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal error (catch-all for failures during dispatch).
pub const INTERNAL_ERROR: i64 = -32603;

/// Fallback message when a peer's error object has no `message`.
pub const UNKNOWN_RPC_ERROR: &str = "Unknown JSON-RPC error";

/// ACP method names.
pub mod methods {
    /// Protocol handshake (host → agent request).
    pub const INITIALIZE: &str = "initialize";
    /// Authentication (host → agent request).
    pub const AUTHENTICATE: &str = "authenticate";
    /// Create a session (host → agent request).
    pub const SESSION_NEW: &str = "session/new";
    /// Resume a session (host → agent request).
    pub const SESSION_LOAD: &str = "session/load";
    /// Send a user turn (host → agent request).
    pub const SESSION_PROMPT: &str = "session/prompt";
    /// Advisory cancellation (host → agent notification).
    pub const SESSION_CANCEL: &str = "session/cancel";
    /// Switch mode (host → agent request).
    pub const SESSION_SET_MODE: &str = "session/set_mode";
    /// Switch model (host → agent request).
    pub const SESSION_SET_MODEL: &str = "session/set_model";
    /// Streaming session state (agent → host notification).
    pub const SESSION_UPDATE: &str = "session/update";
    /// Tool authorization (agent → host request).
    pub const SESSION_REQUEST_PERMISSION: &str = "session/request_permission";
}

/// Outbound request envelope.
#[derive(Debug, Serialize)]
pub struct OutgoingRequest<'a> {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Connection-unique, strictly increasing id.
    pub id: u64,
    /// Method name.
    pub method: &'a str,
    /// Method parameters.
    pub params: Value,
}

/// Outbound notification envelope (no id, no reply).
#[derive(Debug, Serialize)]
pub struct OutgoingNotification<'a> {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Method name.
    pub method: &'a str,
    /// Method parameters.
    pub params: Value,
}

/// Outbound response envelope; exactly one of `result` / `error` is set.
#[derive(Debug, Serialize)]
pub struct OutgoingResponse {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Id copied verbatim from the request being answered.
    pub id: Value,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl OutgoingResponse {
    /// Build a response from a handler outcome.
    #[must_use]
    pub fn from_outcome(id: Value, outcome: std::result::Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(result) => Self {
                jsonrpc: JSONRPC_VERSION,
                id,
                result: Some(result),
                error: None,
            },
            Err(error) => Self {
                jsonrpc: JSONRPC_VERSION,
                id,
                result: None,
                error: Some(error),
            },
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Construct an error with no `data`.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// `-32601` for `method`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// `-32602` with `message`.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    /// `-32603` with `message`.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

impl Display for RpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}

impl From<AppError> for RpcError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Rpc { code, message } => Self::new(code, message),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<RpcError> for AppError {
    fn from(err: RpcError) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

/// Build the caller-facing error for an inbound error object.
///
/// Missing or non-string `message` falls back to [`UNKNOWN_RPC_ERROR`];
/// missing `code` falls back to [`INTERNAL_ERROR`].
#[must_use]
pub fn error_from_wire(error: &Value) -> AppError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or(UNKNOWN_RPC_ERROR)
        .to_owned();
    let code = error
        .get("code")
        .and_then(Value::as_i64)
        .unwrap_or(INTERNAL_ERROR);
    AppError::Rpc { code, message }
}

/// String handle for an inbound request id.
///
/// Numbers and strings both map to their plain textual form, so an agent
/// that sends `"id": 7` is answered through the handle `"7"`.
#[must_use]
pub fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
