//! Conversation view: one active session over a [`Connection`].
//!
//! The view owns the [`SessionEngine`] and the [`PermissionNegotiator`] for
//! the conversation and is fed [`ConnectionEvent`]s by its owner through
//! [`ConversationView::handle_event`]. Opening a session resets both, which
//! also forgets remembered permission choices.

use std::future::Future;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::acp::connection::Connection;
use crate::acp::events::{AcpStatus, ConnectionEvent, Subscription};
use crate::models::content::ContentBlock;
use crate::models::permission::{PermissionOutcome, PermissionRequest};
use crate::models::session::{
    CancelParams, LoadSessionParams, NewSessionParams, PromptParams, PromptResponse,
    SessionState, SetModeParams, SetModelParams,
};
use crate::models::update::SessionUpdate;
use crate::orchestrator::permission::{PermissionNegotiator, Resolution};
use crate::session::SessionEngine;
use crate::{AppError, Result};

/// What a connection event changed, for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewChange {
    /// A `session/update` was applied.
    SessionUpdated {
        /// Session the update belongs to.
        session_id: String,
        /// The applied update.
        update: SessionUpdate,
    },
    /// A permission request needs the user.
    PermissionRequested(PermissionRequest),
    /// A permission request was answered by policy or a remembered choice.
    PermissionResolved {
        /// Handle of the answered request.
        request_id: String,
        /// The outcome sent.
        outcome: PermissionOutcome,
    },
    /// The process went away; awaiting permission requests were discarded.
    Disconnected {
        /// Exit description, absent for an explicit stop.
        reason: Option<String>,
        /// Handles of the discarded requests.
        discarded: Vec<String>,
    },
    /// Supervisor status change.
    Status {
        /// New status.
        status: AcpStatus,
        /// Failure reason, if any.
        reason: Option<String>,
    },
    /// Nothing the view tracks.
    None,
}

/// State of one conversation with the agent.
#[derive(Debug)]
pub struct ConversationView {
    connection: Connection,
    sessions: SessionEngine,
    permissions: PermissionNegotiator,
    session_id: Option<String>,
}

impl ConversationView {
    /// View over `connection` with the given auto-allow policy.
    #[must_use]
    pub fn new(connection: Connection, auto_allow: bool) -> Self {
        Self {
            connection,
            sessions: SessionEngine::new(),
            permissions: PermissionNegotiator::new(auto_allow),
            session_id: None,
        }
    }

    /// Subscribe to the events this view should be fed.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.connection.subscribe()
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Id of the active session.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Derived state of the active session.
    #[must_use]
    pub fn state(&self) -> Option<&SessionState> {
        self.sessions.get(self.session_id.as_deref()?)
    }

    /// The session engine.
    #[must_use]
    pub fn sessions(&self) -> &SessionEngine {
        &self.sessions
    }

    /// The permission negotiator.
    #[must_use]
    pub fn permissions(&self) -> &PermissionNegotiator {
        &self.permissions
    }

    /// Mutable access to the permission negotiator (policy changes).
    pub fn permissions_mut(&mut self) -> &mut PermissionNegotiator {
        &mut self.permissions
    }

    /// Forget the active session, its derived state and remembered choices.
    pub fn reset(&mut self) {
        self.sessions.reset();
        self.permissions.reset();
        self.session_id = None;
    }

    /// Open a new session in `cwd` and make it active.
    ///
    /// # Errors
    ///
    /// Any `session/new` error.
    pub async fn new_session(&mut self, cwd: &Path) -> Result<&SessionState> {
        self.reset();
        let response = self
            .connection
            .new_session(&NewSessionParams {
                cwd: cwd.to_path_buf(),
                mcp_servers: Vec::new(),
            })
            .await?;
        let session_id = response
            .session_id
            .clone()
            .ok_or_else(|| AppError::Acp("session/new returned no sessionId".into()))?;
        info!(session_id, "session opened");
        self.session_id = Some(session_id.clone());
        Ok(self
            .sessions
            .open(&session_id, Some(cwd.to_path_buf()), &response))
    }

    /// Resume `session_id` in `cwd` and make it active.
    ///
    /// The agent replays the transcript as `session/update` notifications;
    /// they reach the engine through [`ConversationView::handle_event`].
    ///
    /// # Errors
    ///
    /// Any `session/load` error.
    pub async fn load_session(&mut self, session_id: &str, cwd: &Path) -> Result<&SessionState> {
        self.reset();
        let response = self
            .connection
            .load_session(&LoadSessionParams {
                session_id: session_id.to_owned(),
                cwd: cwd.to_path_buf(),
                mcp_servers: Vec::new(),
            })
            .await?;
        let loaded = response
            .session_id
            .clone()
            .unwrap_or_else(|| session_id.to_owned());
        info!(session_id = %loaded, "session loaded");
        self.session_id = Some(loaded.clone());
        Ok(self.sessions.open(&loaded, Some(cwd.to_path_buf()), &response))
    }

    /// Feed one connection event into the view.
    pub fn handle_event(&mut self, event: &ConnectionEvent) -> ViewChange {
        match event {
            ConnectionEvent::SessionUpdate(notification) => {
                self.sessions.handle(notification);
                ViewChange::SessionUpdated {
                    session_id: notification.session_id.clone(),
                    update: notification.update.clone(),
                }
            }
            ConnectionEvent::PermissionRequest(request) => self.on_permission_request(request),
            ConnectionEvent::Disconnected { reason } => self.on_disconnect(Some(reason.clone())),
            ConnectionEvent::Stopped => self.on_disconnect(None),
            ConnectionEvent::Status { status, reason, .. } => ViewChange::Status {
                status: *status,
                reason: reason.clone(),
            },
            _ => ViewChange::None,
        }
    }

    /// Answer a surfaced permission request.
    ///
    /// With `remember`, a `selected` outcome is reused for later requests of
    /// the same tool kind in this view.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`]: `request_id` is unknown or already answered.
    /// - [`AppError::NotRunning`]: the process is gone.
    pub fn respond_permission(
        &mut self,
        request_id: &str,
        outcome: PermissionOutcome,
        remember: bool,
    ) -> Result<()> {
        self.permissions.respond(request_id, &outcome, remember)?;
        self.connection.respond_permission(request_id, outcome)
    }

    /// Send a prompt to the active session.
    ///
    /// The returned future owns everything it needs, so the caller can keep
    /// feeding events into the view while the turn runs.
    ///
    /// # Errors
    ///
    /// [`AppError::NotFound`] immediately when no session is active; the
    /// future fails with any `session/prompt` error.
    pub fn prompt(
        &self,
        prompt: Vec<ContentBlock>,
    ) -> Result<impl Future<Output = Result<PromptResponse>> + Send + 'static> {
        let params = PromptParams {
            session_id: self.require_session()?.to_owned(),
            prompt,
        };
        let connection = self.connection.clone();
        Ok(async move { connection.prompt(&params).await })
    }

    /// Ask the agent to stop the current turn. Advisory.
    ///
    /// # Errors
    ///
    /// [`AppError::NotFound`] with no active session, or
    /// [`AppError::NotRunning`].
    pub fn cancel(&self) -> Result<()> {
        let session_id = self.require_session()?.to_owned();
        debug!(session_id, "cancelling turn");
        self.connection.cancel(&CancelParams { session_id })
    }

    /// Request a mode switch. The view changes when the agent reports it.
    ///
    /// # Errors
    ///
    /// [`AppError::NotFound`] with no active session, or any request error.
    pub async fn set_mode(&self, mode_id: &str) -> Result<Value> {
        let params = SetModeParams {
            session_id: self.require_session()?.to_owned(),
            mode_id: mode_id.to_owned(),
        };
        self.connection.set_mode(&params).await
    }

    /// Request a model switch. The view changes when the agent reports it.
    ///
    /// # Errors
    ///
    /// [`AppError::NotFound`] with no active session, or any request error.
    pub async fn set_model(&self, model_id: &str) -> Result<Value> {
        let params = SetModelParams {
            session_id: self.require_session()?.to_owned(),
            model_id: model_id.to_owned(),
        };
        self.connection.set_model(&params).await
    }

    /// Working directory of the active session.
    #[must_use]
    pub fn cwd(&self) -> Option<PathBuf> {
        self.state()?.cwd.clone()
    }

    fn on_permission_request(&mut self, request: &PermissionRequest) -> ViewChange {
        match self.permissions.on_request(request, &self.sessions) {
            Resolution::Resolved(outcome) => {
                if let Err(err) = self
                    .connection
                    .respond_permission(&request.request_id, outcome.clone())
                {
                    warn!(request_id = %request.request_id, %err, "failed to answer permission request");
                }
                ViewChange::PermissionResolved {
                    request_id: request.request_id.clone(),
                    outcome,
                }
            }
            Resolution::Surface => ViewChange::PermissionRequested(request.clone()),
        }
    }

    fn on_disconnect(&mut self, reason: Option<String>) -> ViewChange {
        let discarded = self.permissions.discard_awaiting();
        if !discarded.is_empty() {
            debug!(count = discarded.len(), "discarded awaiting permission requests");
        }
        ViewChange::Disconnected { reason, discarded }
    }

    fn require_session(&self) -> Result<&str> {
        self.session_id
            .as_deref()
            .ok_or_else(|| AppError::NotFound("no active session".into()))
    }
}
