//! Agent-side ACP SDK.
//!
//! An agent implements [`Agent`]; [`AgentSideConnection`] serves it over a
//! stream pair (normally the agent's own stdin/stdout). Inbound calls are
//! decoded and routed to the trait methods:
//!
//! - params that do not decode are answered with `-32602`;
//! - methods the agent does not serve are answered with `-32601`;
//! - any error returned by the agent becomes `-32603` with its message,
//!   unless it already carries a JSON-RPC code ([`AppError::Rpc`]);
//! - notifications (`session/cancel`) are routed but never answered.
//!
//! The agent talks back through the same [`AgentSideConnection`]:
//! [`AgentSideConnection::session_update`] streams progress and
//! [`AgentSideConnection::request_permission`] asks the host before running
//! a tool.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::acp::connection::{Attachment, Connection, HandlerFuture, IncomingHandler};
use crate::acp::events::Subscription;
use crate::acp::protocol::{methods, RpcError};
use crate::models::handshake::{InitializeParams, InitializeResponse};
use crate::models::permission::{
    PermissionOutcome, RequestPermissionParams, RequestPermissionResponse,
};
use crate::models::session::{
    CancelParams, LoadSessionParams, NewSessionParams, NewSessionResponse, PromptParams,
    PromptResponse, SetModeParams, SetModelParams,
};
use crate::models::update::{SessionNotification, SessionUpdate};
use crate::{AppError, Result};

/// Boxed future returned by [`Agent`] methods.
pub type AgentFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Methods an ACP agent serves.
///
/// `load_session`, `set_session_mode` and `set_session_model` have
/// permissive defaults so minimal agents only implement the core five.
pub trait Agent: Send + Sync {
    /// Answer the `initialize` handshake.
    fn initialize(&self, params: InitializeParams) -> AgentFuture<'_, InitializeResponse>;

    /// Authenticate the host. The payload is agent-defined.
    fn authenticate(&self, params: Value) -> AgentFuture<'_, Value>;

    /// Create a session.
    fn new_session(&self, params: NewSessionParams) -> AgentFuture<'_, NewSessionResponse>;

    /// Resume a session, replaying its transcript as `session/update`s.
    fn load_session(&self, params: LoadSessionParams) -> AgentFuture<'_, NewSessionResponse> {
        debug!(session_id = %params.session_id, "load_session not implemented, returning empty state");
        Box::pin(async { Ok(NewSessionResponse::default()) })
    }

    /// Run one user turn. Resolves when the turn ends.
    fn prompt(&self, params: PromptParams) -> AgentFuture<'_, PromptResponse>;

    /// Stop the turn in flight, if any. Notification: never answered.
    fn cancel(&self, params: CancelParams) -> AgentFuture<'_, ()>;

    /// Switch the session's mode.
    fn set_session_mode(&self, params: SetModeParams) -> AgentFuture<'_, Value> {
        debug!(session_id = %params.session_id, "set_session_mode not implemented");
        Box::pin(async { Ok(json!({ "modes": [] })) })
    }

    /// Switch the session's model.
    fn set_session_model(&self, params: SetModelParams) -> AgentFuture<'_, Value> {
        debug!(session_id = %params.session_id, "set_session_model not implemented");
        Box::pin(async { Ok(Value::Null) })
    }
}

/// Methods routed to an [`Agent`].
const AGENT_METHODS: &[&str] = &[
    methods::INITIALIZE,
    methods::AUTHENTICATE,
    methods::SESSION_NEW,
    methods::SESSION_LOAD,
    methods::SESSION_PROMPT,
    methods::SESSION_CANCEL,
    methods::SESSION_SET_MODE,
    methods::SESSION_SET_MODEL,
];

/// [`IncomingHandler`] that decodes ACP calls for an [`Agent`].
struct AgentDispatcher<A> {
    agent: A,
}

impl<A: Agent> IncomingHandler for AgentDispatcher<A> {
    fn handles(&self, method: &str) -> bool {
        AGENT_METHODS.contains(&method)
    }

    fn handle<'a>(&'a self, method: &'a str, params: Value) -> HandlerFuture<'a> {
        Box::pin(async move {
            let agent = &self.agent;
            match method {
                methods::INITIALIZE => reply(agent.initialize(decode(params)?).await),
                methods::AUTHENTICATE => reply(agent.authenticate(params).await),
                methods::SESSION_NEW => reply(agent.new_session(decode(params)?).await),
                methods::SESSION_LOAD => reply(agent.load_session(decode(params)?).await),
                methods::SESSION_PROMPT => reply(agent.prompt(decode(params)?).await),
                methods::SESSION_CANCEL => reply(agent.cancel(decode(params)?).await),
                methods::SESSION_SET_MODE => reply(agent.set_session_mode(decode(params)?).await),
                methods::SESSION_SET_MODEL => {
                    reply(agent.set_session_model(decode(params)?).await)
                }
                other => Err(RpcError::method_not_found(other)),
            }
        })
    }
}

fn decode<T: DeserializeOwned>(params: Value) -> std::result::Result<T, RpcError> {
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(e.to_string()))
}

fn reply<T: Serialize>(outcome: Result<T>) -> std::result::Result<Value, RpcError> {
    let value = outcome?;
    serde_json::to_value(value).map_err(|e| RpcError::internal(e.to_string()))
}

/// Agent end of an ACP connection.
#[derive(Debug, Clone)]
pub struct AgentSideConnection {
    connection: Connection,
}

impl AgentSideConnection {
    /// Build a connection serving the agent produced by `make_agent`.
    ///
    /// The factory receives a handle to the connection so the agent can send
    /// session updates and permission requests. That handle keeps the
    /// connection alive for as long as the agent lives.
    ///
    /// # Errors
    ///
    /// Only if the handler slot is already taken, which cannot happen for a
    /// fresh connection.
    pub fn new<A, F>(make_agent: F) -> Result<Self>
    where
        A: Agent + 'static,
        F: FnOnce(Self) -> A,
    {
        let this = Self {
            connection: Connection::new("agent"),
        };
        let agent = make_agent(this.clone());
        this.connection
            .set_handler(Arc::new(AgentDispatcher { agent }))?;
        Ok(this)
    }

    /// Serve over `reader` / `writer`. Await [`Attachment::closed`] to run
    /// until the host closes its end.
    pub fn serve<R, W>(&self, reader: R, writer: W) -> Attachment
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.connection.attach_io(reader, writer)
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Subscribe to inbound traffic the agent does not serve.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.connection.subscribe()
    }

    /// Stream one `session/update` to the host.
    ///
    /// # Errors
    ///
    /// [`AppError::NotRunning`] when the host side is gone.
    pub fn session_update(&self, session_id: &str, update: SessionUpdate) -> Result<()> {
        let notification = SessionNotification {
            session_id: session_id.to_owned(),
            update,
        };
        self.connection
            .notify(methods::SESSION_UPDATE, serde_json::to_value(notification)?)
    }

    /// Ask the host to authorize a tool call and wait for the decision.
    ///
    /// # Errors
    ///
    /// Any request error, or [`AppError::Acp`] for a malformed answer.
    pub async fn request_permission(
        &self,
        params: &RequestPermissionParams,
    ) -> Result<PermissionOutcome> {
        let response: RequestPermissionResponse = self
            .connection
            .call(methods::SESSION_REQUEST_PERMISSION, params)
            .await
            .map_err(|err| match err {
                AppError::Acp(msg) => AppError::Acp(format!("permission response: {msg}")),
                other => other,
            })?;
        Ok(response.outcome)
    }
}
