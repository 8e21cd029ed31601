//! Connection events and the per-connection publish/subscribe bus.
//!
//! Every [`Connection`](crate::acp::connection::Connection) owns one
//! [`EventBus`]. Subscribers receive every event published after they
//! subscribed, in publication order, on an unbounded channel so a slow
//! consumer never makes the read loop drop a permission request.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::models::permission::PermissionRequest;
use crate::models::update::SessionNotification;

/// Lifecycle status reported by the process supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcpStatus {
    /// No agent process.
    Disconnected,
    /// Startup in progress (possibly retrying).
    Starting,
    /// Process running and handshake done.
    Connected,
    /// Startup retries exhausted; an explicit start is required.
    Error,
}

/// Everything a connection reports to its collaborators.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A process was attached.
    Connected {
        /// Resolved launch command.
        command: String,
        /// Working directory of the process.
        cwd: PathBuf,
    },
    /// The process went away on its own (exit or spawn error).
    Disconnected {
        /// Description including exit code and signal.
        reason: String,
    },
    /// The process was stopped on request.
    Stopped,
    /// One line of the agent's stderr.
    Stderr {
        /// The line, without terminator.
        text: String,
    },
    /// A line that was not valid JSON.
    ProtocolLog {
        /// The raw line.
        text: String,
    },
    /// Any inbound message not routed elsewhere.
    Notification {
        /// The raw message.
        payload: Value,
    },
    /// A `session/update` notification.
    SessionUpdate(SessionNotification),
    /// A `session/request_permission` request awaiting an answer.
    PermissionRequest(PermissionRequest),
    /// Supervisor status change.
    Status {
        /// New status.
        status: AcpStatus,
        /// Startup attempt number, when retrying.
        attempt: Option<u32>,
        /// Failure reason, when there is one.
        reason: Option<String>,
    },
}

#[derive(Debug, Default)]
struct BusInner {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<ConnectionEvent>>,
}

/// Fan-out of [`ConnectionEvent`]s to any number of subscribers.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, tx);
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every live subscriber.
    ///
    /// Subscribers whose receiver has been dropped are pruned.
    pub fn publish(&self, event: &ConnectionEvent) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }
}

/// Receiving end of an [`EventBus`] subscription.
///
/// Dropping the subscription unsubscribes; [`Subscription::unsubscribe`]
/// does the same explicitly.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    bus: Weak<Mutex<BusInner>>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving events.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .subscribers
                .remove(&self.id);
        }
    }
}
