//! ACP initialization handshake.
//!
//! After an agent process is spawned the host sends one `initialize`
//! request before anything else. Unlike ordinary requests the handshake has
//! a deadline: a process that never answers must count as a failed startup
//! attempt rather than hang the retry loop.

use std::time::Duration;

use tracing::{debug, info};

use crate::acp::connection::Connection;
use crate::acp::protocol::{methods, PROTOCOL_VERSION};
use crate::models::handshake::{InitializeParams, InitializeResponse};
use crate::{AppError, Result};

/// Send `initialize` and wait up to `timeout` for the agent's answer.
///
/// # Errors
///
/// - `AppError::Timeout`: no answer within `timeout`.
/// - `AppError::Process`: the agent exited during the handshake.
/// - `AppError::Rpc`: the agent rejected the request.
/// - `AppError::Acp("handshake: …")`: the answer is not an
///   `InitializeResponse`.
pub async fn initialize(
    connection: &Connection,
    params: &InitializeParams,
    timeout: Duration,
) -> Result<InitializeResponse> {
    debug!(protocol_version = params.protocol_version, "handshake: sending initialize");

    let result = connection
        .request_with_timeout(methods::INITIALIZE, serde_json::to_value(params)?, timeout)
        .await?;
    let response: InitializeResponse = serde_json::from_value(result)
        .map_err(|e| AppError::Acp(format!("handshake: unexpected initialize result: {e}")))?;

    let agent = response
        .agent_info
        .as_ref()
        .map_or("unknown", |info| info.name.as_str());
    info!(
        agent,
        protocol_version = response.protocol_version,
        "handshake: agent initialized"
    );
    if response.protocol_version != PROTOCOL_VERSION {
        debug!(
            requested = PROTOCOL_VERSION,
            negotiated = response.protocol_version,
            "handshake: agent negotiated a different protocol version"
        );
    }

    Ok(response)
}
