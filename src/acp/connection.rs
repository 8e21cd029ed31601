//! JSON-RPC dispatcher over a pair of ndjson streams.
//!
//! A [`Connection`] correlates outbound requests with inbound responses,
//! routes inbound notifications and requests, and publishes everything a
//! collaborator may care about on its [`EventBus`].
//!
//! # State
//!
//! All mutable dispatcher state lives behind one mutex:
//!
//! - the outbound line channel of the attached process (absent when no
//!   process is attached),
//! - `pending`: request id → waiter, populated by [`Connection::request`],
//! - `permission_ids`: string handle → raw JSON-RPC id of every unanswered
//!   `session/request_permission`.
//!
//! Ids come from a per-connection counter that starts at 1 and is never
//! rewound, so an id is never reused even across process restarts.
//!
//! # Inbound routing
//!
//! | Inbound shape                                  | Routed to                            |
//! |------------------------------------------------|--------------------------------------|
//! | not JSON                                       | [`ConnectionEvent::ProtocolLog`]     |
//! | no `method`, `id` pending                      | waiter resolved / rejected           |
//! | `session/update`                               | [`ConnectionEvent::SessionUpdate`]   |
//! | `session/request_permission` with `id`         | [`ConnectionEvent::PermissionRequest`] |
//! | method the [`IncomingHandler`] handles         | handler task; reply if `id` present  |
//! | other method with `id`                         | `-32601` error response              |
//! | anything else                                  | [`ConnectionEvent::Notification`]    |

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::events::{ConnectionEvent, EventBus, Subscription};
use crate::acp::protocol::{
    error_from_wire, id_key, methods, OutgoingNotification, OutgoingRequest, OutgoingResponse,
    RpcError, JSONRPC_VERSION,
};
use crate::acp::reader::{run_reader, Frame};
use crate::acp::writer::run_writer;
use crate::models::permission::{
    PermissionOutcome, PermissionRequest, RequestPermissionParams, RequestPermissionResponse,
};
use crate::models::update::SessionNotification;
use crate::{AppError, Result};

/// Boxed future returned by an [`IncomingHandler`].
pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<Value, RpcError>> + Send + 'a>>;

/// Handler for inbound requests and notifications.
///
/// Host-side connections usually install none; the agent side installs one
/// that routes ACP methods to an [`Agent`](crate::agent::Agent).
pub trait IncomingHandler: Send + Sync {
    /// Whether `method` is served by this handler.
    fn handles(&self, method: &str) -> bool;

    /// Serve one call. For notifications the outcome is only logged.
    fn handle<'a>(&'a self, method: &'a str, params: Value) -> HandlerFuture<'a>;
}

type Waiter = oneshot::Sender<Result<Value>>;

#[derive(Debug)]
struct Outbound {
    generation: u64,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Debug, Default)]
struct ConnState {
    outbound: Option<Outbound>,
    pending: HashMap<u64, Waiter>,
    permission_ids: HashMap<String, Value>,
}

struct Inner {
    label: String,
    next_id: AtomicU64,
    next_generation: AtomicU64,
    state: Mutex<ConnState>,
    events: EventBus,
    handler: OnceLock<Arc<dyn IncomingHandler>>,
}

/// Cheaply clonable handle to one JSON-RPC connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("label", &self.inner.label)
            .field("attached", &self.is_attached())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

/// Reader and writer tasks of one attached stream pair.
#[derive(Debug)]
pub struct Attachment {
    generation: u64,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Attachment {
    /// Generation number to pass to [`Connection::detach`].
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop both tasks without waiting for them.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the inbound stream to end, however long that takes, then
    /// stop the writer.
    pub async fn closed(self) {
        if let Err(err) = self.reader.await {
            warn!(%err, "acp reader task failed");
        }
        self.cancel.cancel();
        if let Err(err) = self.writer.await {
            warn!(%err, "acp writer task failed");
        }
    }

    /// Wait up to `grace` for the inbound stream to end, then stop both
    /// tasks and wait for them.
    ///
    /// Lines the peer wrote before exiting are dispatched within the grace
    /// period; a stream held open by a lingering grandchild is cut off.
    pub async fn finished(mut self, grace: Duration) {
        let drained = tokio::time::timeout(grace, &mut self.reader).await;
        self.cancel.cancel();
        let reader = match drained {
            Ok(joined) => joined,
            Err(_) => {
                debug!(generation = self.generation, "acp reader still open after grace, cancelling");
                self.reader.await
            }
        };
        if let Err(err) = reader {
            warn!(%err, "acp reader task failed");
        }
        if let Err(err) = self.writer.await {
            warn!(%err, "acp writer task failed");
        }
    }
}

impl Connection {
    /// Create a detached connection. `label` tags every log line.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                label: label.into(),
                next_id: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
                state: Mutex::new(ConnState::default()),
                events: EventBus::new(),
                handler: OnceLock::new(),
            }),
        }
    }

    /// Install the handler for inbound calls. Only one handler may be set.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] if a handler is already installed.
    pub fn set_handler(&self, handler: Arc<dyn IncomingHandler>) -> Result<()> {
        self.inner
            .handler
            .set(handler)
            .map_err(|_| AppError::Acp("incoming handler already installed".into()))
    }

    /// Subscribe to connection events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.inner.events.subscribe()
    }

    /// The connection's event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Publish `event` to every subscriber.
    pub fn emit(&self, event: &ConnectionEvent) {
        self.inner.events.publish(event);
    }

    // ── Attachment ───────────────────────────────────────────────────────────

    /// Route outbound lines to `tx` and return the attachment's generation.
    ///
    /// A previous attachment, if any, is detached first.
    pub fn attach(&self, tx: mpsc::UnboundedSender<String>) -> u64 {
        let previous = self.lock().outbound.as_ref().map(|o| o.generation);
        if let Some(previous) = previous {
            self.detach(previous, "ACP connection replaced by a new process");
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        self.lock().outbound = Some(Outbound { generation, tx });
        debug!(label = %self.inner.label, generation, "acp connection attached");
        generation
    }

    /// Attach a stream pair, spawning reader and writer tasks.
    pub fn attach_io<R, W>(&self, reader: R, writer: W) -> Attachment
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = self.attach(tx);
        let cancel = CancellationToken::new();
        let label = self.inner.label.clone();

        let writer = tokio::spawn(run_writer(label.clone(), writer, rx, cancel.clone()));
        let reader = tokio::spawn(run_reader(label, reader, self.clone(), cancel.clone()));

        Attachment {
            generation,
            cancel,
            reader,
            writer,
        }
    }

    /// Drop the attachment `generation` and reject everything pending on it.
    ///
    /// The outbound channel, the pending map and the permission lookup are
    /// cleared under one lock; every waiter is then rejected with
    /// [`AppError::Process`]`(reason)`. Returns `false` (and does nothing)
    /// when `generation` is not the current attachment, so a late exit of a
    /// replaced process cannot disturb its successor.
    pub fn detach(&self, generation: u64, reason: &str) -> bool {
        let (pending, dropped_permissions) = {
            let mut state = self.lock();
            if state.outbound.as_ref().map(|o| o.generation) != Some(generation) {
                return false;
            }
            state.outbound = None;
            let dropped_permissions = state.permission_ids.len();
            state.permission_ids.clear();
            (std::mem::take(&mut state.pending), dropped_permissions)
        };

        info!(
            label = %self.inner.label,
            generation,
            rejected = pending.len(),
            dropped_permissions,
            reason,
            "acp connection detached"
        );
        for (_, waiter) in pending {
            // The caller may have stopped waiting; nothing to do then.
            let _ = waiter.send(Err(AppError::Process(reason.to_owned())));
        }
        true
    }

    /// Whether a live outbound stream is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.lock()
            .outbound
            .as_ref()
            .is_some_and(|o| !o.tx.is_closed())
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Handles of unanswered permission requests.
    #[must_use]
    pub fn pending_permission_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().permission_ids.keys().cloned().collect();
        ids.sort();
        ids
    }

    // ── Outbound ─────────────────────────────────────────────────────────────

    /// Send a request and wait for its response.
    ///
    /// There is no deadline: the call resolves when the matching response
    /// arrives or when the process goes away.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotRunning`] immediately if no process is attached.
    /// - [`AppError::Rpc`] if the peer answered with an error object.
    /// - [`AppError::Process`] if the process exited or was stopped first.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let (_, rx) = self.start_request(method, params)?;
        await_response(rx).await
    }

    /// Like [`Connection::request`] with a deadline.
    ///
    /// On expiry the waiter is removed, so a late response is treated as
    /// unmatched and a later exit does not see it.
    ///
    /// # Errors
    ///
    /// As [`Connection::request`], plus [`AppError::Timeout`].
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value> {
        let (id, rx) = self.start_request(method, params)?;
        if let Ok(outcome) = tokio::time::timeout(deadline, await_response(rx)).await {
            outcome
        } else {
            self.lock().pending.remove(&id);
            Err(AppError::Timeout(format!(
                "{method} (id {id}) got no response within {deadline:?}"
            )))
        }
    }

    /// Send a notification. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// [`AppError::NotRunning`] if no process is attached.
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        let state = self.lock();
        self.send_locked(
            &state,
            &OutgoingNotification {
                jsonrpc: JSONRPC_VERSION,
                method,
                params,
            },
        )
    }

    /// Answer an inbound request identified by its raw `id`.
    ///
    /// # Errors
    ///
    /// [`AppError::NotRunning`] if no process is attached.
    pub fn respond(&self, id: Value, outcome: std::result::Result<Value, RpcError>) -> Result<()> {
        let state = self.lock();
        self.send_locked(&state, &OutgoingResponse::from_outcome(id, outcome))
    }

    /// Answer the permission request whose string handle is `request_id`.
    ///
    /// Each handle can be answered once; the handle is consumed even if the
    /// write then fails.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`] for an unknown or already-answered handle.
    /// - [`AppError::NotRunning`] if no process is attached.
    pub fn respond_permission(&self, request_id: &str, outcome: PermissionOutcome) -> Result<()> {
        let id = self
            .lock()
            .permission_ids
            .remove(request_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("unknown permission request id: {request_id}"))
            })?;
        let result = serde_json::to_value(RequestPermissionResponse { outcome })?;
        self.respond(id, Ok(result))
    }

    // ── Inbound ──────────────────────────────────────────────────────────────

    /// Route one decoded line. Called by the reader task in arrival order.
    pub fn dispatch_frame(&self, frame: Frame) {
        let message = match frame {
            Frame::Message(message) => message,
            Frame::Unparsed(text) => {
                warn!(label = %self.inner.label, line = %text, "acp: unparsable line");
                self.emit(&ConnectionEvent::ProtocolLog { text });
                return;
            }
        };

        let id = message.get("id").filter(|id| !id.is_null()).cloned();
        let Some(method) = message.get("method").and_then(Value::as_str).map(str::to_owned) else {
            self.dispatch_response(id, message);
            return;
        };
        let params = message
            .get("params")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        match (method.as_str(), id) {
            (methods::SESSION_UPDATE, _) => self.dispatch_session_update(params, message),
            (methods::SESSION_REQUEST_PERMISSION, Some(id)) => {
                self.dispatch_permission_request(id, params);
            }
            (_, id) => self.dispatch_call(&method, id, params, message),
        }
    }

    fn dispatch_response(&self, id: Option<Value>, message: Value) {
        let waiter = id
            .as_ref()
            .and_then(Value::as_u64)
            .and_then(|id| self.lock().pending.remove(&id));

        let Some(waiter) = waiter else {
            debug!(label = %self.inner.label, ?id, "acp: message matched no pending request");
            self.emit(&ConnectionEvent::Notification { payload: message });
            return;
        };

        let outcome = match message.get("error").filter(|e| !e.is_null()) {
            Some(error) => Err(error_from_wire(error)),
            None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
        };
        // The caller may have timed out and dropped the receiver.
        let _ = waiter.send(outcome);
    }

    fn dispatch_session_update(&self, params: Value, message: Value) {
        match serde_json::from_value::<SessionNotification>(params) {
            Ok(notification) => self.emit(&ConnectionEvent::SessionUpdate(notification)),
            Err(err) => {
                warn!(label = %self.inner.label, %err, "acp: malformed session/update");
                self.emit(&ConnectionEvent::Notification { payload: message });
            }
        }
    }

    fn dispatch_permission_request(&self, id: Value, params: Value) {
        match serde_json::from_value::<RequestPermissionParams>(params) {
            Ok(params) => {
                let request_id = id_key(&id);
                self.lock().permission_ids.insert(request_id.clone(), id);
                debug!(label = %self.inner.label, request_id, "acp: permission requested");
                self.emit(&ConnectionEvent::PermissionRequest(
                    PermissionRequest::from_params(request_id, params),
                ));
            }
            Err(err) => {
                warn!(label = %self.inner.label, %err, "acp: malformed permission request");
                self.respond_or_log(id, Err(RpcError::invalid_params(err.to_string())));
            }
        }
    }

    fn dispatch_call(&self, method: &str, id: Option<Value>, params: Value, message: Value) {
        let handler = self
            .inner
            .handler
            .get()
            .filter(|handler| handler.handles(method))
            .cloned();

        match (handler, id) {
            (Some(handler), id) => {
                let connection = self.clone();
                let method = method.to_owned();
                tokio::spawn(async move {
                    let outcome = handler.handle(&method, params).await;
                    match id {
                        Some(id) => connection.respond_or_log(id, outcome),
                        None => {
                            if let Err(err) = outcome {
                                warn!(method, %err, "acp: notification handler failed");
                            }
                        }
                    }
                });
            }
            (None, Some(id)) => {
                debug!(label = %self.inner.label, method, "acp: method not found");
                self.respond_or_log(id, Err(RpcError::method_not_found(method)));
            }
            (None, None) => self.emit(&ConnectionEvent::Notification { payload: message }),
        }
    }

    // ── Private helpers ──────────────────────────────────────────────────────

    fn start_request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<(u64, oneshot::Receiver<Result<Value>>)> {
        let mut state = self.lock();
        if !state.outbound.as_ref().is_some_and(|o| !o.tx.is_closed()) {
            return Err(AppError::not_running());
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.send_locked(
            &state,
            &OutgoingRequest {
                jsonrpc: JSONRPC_VERSION,
                id,
                method,
                params,
            },
        )?;

        let (tx, rx) = oneshot::channel();
        state.pending.insert(id, tx);
        Ok((id, rx))
    }

    fn send_locked<T: Serialize>(&self, state: &ConnState, message: &T) -> Result<()> {
        let outbound = state
            .outbound
            .as_ref()
            .ok_or_else(AppError::not_running)?;
        let line = serde_json::to_string(message)?;
        debug!(label = %self.inner.label, direction = "out", line = %line, "acp rpc");
        outbound.tx.send(line).map_err(|_| AppError::not_running())
    }

    fn respond_or_log(&self, id: Value, outcome: std::result::Result<Value, RpcError>) {
        if let Err(err) = self.respond(id, outcome) {
            warn!(label = %self.inner.label, %err, "acp: failed to send response");
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn await_response(rx: oneshot::Receiver<Result<Value>>) -> Result<Value> {
    rx.await.unwrap_or_else(|_| {
        Err(AppError::Process(
            "connection dropped before a response arrived".into(),
        ))
    })
}
