//! Agent process supervisor.
//!
//! Owns the lifetime of the agent subprocess behind one long-lived
//! [`Connection`]: spawning, wiring stdio, the `initialize` handshake, exit
//! detection, teardown, and a bounded startup retry loop.
//!
//! Each spawned process is attached under a fresh generation number. Exit
//! handling detaches only its own generation, so a late exit of a replaced
//! process never clears the state of its successor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::process::{Child, ChildStderr};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::codec::LineReader;
use crate::acp::connection::{Attachment, Connection};
use crate::acp::events::{AcpStatus, ConnectionEvent};
use crate::acp::handshake;
use crate::acp::spawner::{describe_exit, spawn_agent, SpawnConfig};
use crate::models::handshake::{InitializeParams, InitializeResponse};
use crate::{AppError, Result};

/// How long a dead process's stdout may keep delivering buffered lines.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Default number of startup attempts.
pub const DEFAULT_START_ATTEMPTS: u32 = 3;

/// Default delay between startup attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Fixed-delay startup retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay between consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_START_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Everything the supervisor needs to start an agent.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Command line and working directory.
    pub spawn: SpawnConfig,
    /// Params of the `initialize` handshake.
    pub initialize: InitializeParams,
    /// Deadline for the handshake response.
    pub startup_timeout: Duration,
    /// Whether [`Supervisor::ensure_started`] uses the retry loop.
    pub auto_start: bool,
    /// Retry loop policy.
    pub retry: RetryPolicy,
}

#[derive(Debug)]
struct Running {
    generation: u64,
    cancel: CancellationToken,
    monitor: JoinHandle<()>,
    init: Option<InitializeResponse>,
}

#[derive(Debug)]
struct Inner {
    config: SupervisorConfig,
    connection: Connection,
    start_lock: tokio::sync::Mutex<()>,
    running: Mutex<Option<Running>>,
    status: Mutex<AcpStatus>,
    initialized: AtomicBool,
}

/// Cheaply clonable handle to the agent process supervisor.
#[derive(Debug, Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Supervisor for `config`, publishing on a fresh connection.
    #[must_use]
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_connection(config, Connection::new("host"))
    }

    /// Supervisor publishing on `connection`.
    #[must_use]
    pub fn with_connection(config: SupervisorConfig, connection: Connection) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connection,
                start_lock: tokio::sync::Mutex::new(()),
                running: Mutex::new(None),
                status: Mutex::new(AcpStatus::Disconnected),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// The supervised connection. Survives process restarts.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Supervisor configuration.
    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> AcpStatus {
        *self
            .inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a process is attached and has completed the handshake.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst) && self.inner.connection.is_attached()
    }

    /// Start the agent once, without retrying.
    ///
    /// Idempotent: when a process is already running and initialized its
    /// handshake result is returned without spawning. An explicit start
    /// also leaves the terminal [`AcpStatus::Error`] state.
    ///
    /// # Errors
    ///
    /// Spawn failure ([`AppError::Process`]) or any handshake error.
    pub async fn start(&self) -> Result<InitializeResponse> {
        if let Some(init) = self.current_init() {
            return Ok(init);
        }
        self.set_status(AcpStatus::Starting, None, None);
        match self.start_once().await {
            Ok(init) => Ok(init),
            Err(err) => {
                self.set_status(AcpStatus::Disconnected, None, Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Start the agent, retrying on failure per the [`RetryPolicy`].
    ///
    /// Every failed attempt but the last reports [`AcpStatus::Starting`]
    /// with its attempt number and reason. When the last attempt fails the
    /// status becomes [`AcpStatus::Error`] and stays there until an explicit
    /// [`Supervisor::start`].
    ///
    /// # Errors
    ///
    /// [`AppError::Startup`] once every attempt has failed.
    pub async fn start_with_retry(&self) -> Result<InitializeResponse> {
        if let Some(init) = self.current_init() {
            return Ok(init);
        }

        let RetryPolicy { attempts, delay } = self.inner.config.retry;
        let attempts = attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            self.set_status(AcpStatus::Starting, Some(attempt), None);
            match self.start_once().await {
                Ok(init) => return Ok(init),
                Err(err) => {
                    last_error = err.to_string();
                    warn!(attempt, attempts, error = %err, "agent startup attempt failed");
                    if attempt < attempts {
                        self.set_status(AcpStatus::Starting, Some(attempt), Some(last_error.clone()));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.set_status(AcpStatus::Error, Some(attempts), Some(last_error.clone()));
        Err(AppError::Startup(format!(
            "agent failed to start after {attempts} attempts: {last_error}"
        )))
    }

    /// Make sure an initialized agent is running.
    ///
    /// Cheap when it already is. Otherwise starts it, through the retry loop
    /// when `auto_start` is configured.
    ///
    /// # Errors
    ///
    /// [`AppError::Startup`] in the terminal [`AcpStatus::Error`] state, or
    /// any start error.
    pub async fn ensure_started(&self) -> Result<InitializeResponse> {
        if let Some(init) = self.current_init() {
            return Ok(init);
        }
        if self.status() == AcpStatus::Error {
            return Err(AppError::Startup(
                "agent startup retries exhausted; start it explicitly".into(),
            ));
        }
        if self.inner.config.auto_start {
            self.start_with_retry().await
        } else {
            self.start().await
        }
    }

    /// Stop the running agent. No-op when nothing is running.
    ///
    /// Dispatcher state is cleared before this returns: pending requests are
    /// rejected with "ACP process stopped" and a [`ConnectionEvent::Stopped`]
    /// is published.
    pub async fn stop(&self) {
        let Some(running) = self.lock_running().take() else {
            return;
        };
        self.inner.initialized.store(false, Ordering::SeqCst);
        let detached = self
            .inner
            .connection
            .detach(running.generation, "ACP process stopped");
        running.cancel.cancel();
        if let Err(err) = running.monitor.await {
            warn!(%err, "agent monitor task failed");
        }

        info!(generation = running.generation, "agent process stopped");
        if detached {
            self.inner.connection.emit(&ConnectionEvent::Stopped);
        }
        self.set_status(AcpStatus::Disconnected, None, None);
    }

    // ── Private helpers ──────────────────────────────────────────────────────

    async fn start_once(&self) -> Result<InitializeResponse> {
        let _guard = self.inner.start_lock.lock().await;
        if let Some(init) = self.current_init() {
            return Ok(init);
        }
        self.reap_stale().await;

        let config = &self.inner.config;
        let connection = &self.inner.connection;

        let process = match spawn_agent(&config.spawn) {
            Ok(process) => process,
            Err(err) => {
                connection.emit(&ConnectionEvent::Disconnected {
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        let attachment = connection.attach_io(process.stdout, process.stdin);
        let generation = attachment.generation();
        let cancel = CancellationToken::new();
        tokio::spawn(forward_stderr(
            connection.clone(),
            process.stderr,
            cancel.clone(),
        ));
        let monitor = tokio::spawn(monitor_process(
            Arc::clone(&self.inner),
            process.child,
            attachment,
            cancel.clone(),
        ));
        *self.lock_running() = Some(Running {
            generation,
            cancel,
            monitor,
            init: None,
        });

        connection.emit(&ConnectionEvent::Connected {
            command: config.spawn.command.clone(),
            cwd: config.spawn.cwd.clone(),
        });

        match handshake::initialize(connection, &config.initialize, config.startup_timeout).await {
            Ok(init) => {
                if let Some(running) = self
                    .lock_running()
                    .as_mut()
                    .filter(|r| r.generation == generation)
                {
                    running.init = Some(init.clone());
                }
                self.inner.initialized.store(true, Ordering::SeqCst);
                self.set_status(AcpStatus::Connected, None, None);
                Ok(init)
            }
            Err(err) => {
                self.abandon(generation, &format!("ACP startup failed: {err}"))
                    .await;
                Err(err)
            }
        }
    }

    /// Tear down generation `generation` after a failed handshake.
    async fn abandon(&self, generation: u64, reason: &str) {
        let running = {
            let mut slot = self.lock_running();
            match slot.as_ref() {
                Some(r) if r.generation == generation => slot.take(),
                _ => None,
            }
        };
        let Some(running) = running else {
            return;
        };
        let detached = self.inner.connection.detach(generation, reason);
        running.cancel.cancel();
        if let Err(err) = running.monitor.await {
            warn!(%err, "agent monitor task failed");
        }
        if detached {
            self.inner.connection.emit(&ConnectionEvent::Disconnected {
                reason: reason.to_owned(),
            });
        }
    }

    /// Drop a [`Running`] record whose process has already gone away.
    async fn reap_stale(&self) {
        let stale = {
            let mut slot = self.lock_running();
            if self.inner.connection.is_attached() {
                None
            } else {
                slot.take()
            }
        };
        if let Some(stale) = stale {
            stale.cancel.cancel();
            if let Err(err) = stale.monitor.await {
                warn!(%err, "agent monitor task failed");
            }
        }
    }

    fn current_init(&self) -> Option<InitializeResponse> {
        if !self.is_initialized() {
            return None;
        }
        self.lock_running().as_ref().and_then(|r| r.init.clone())
    }

    fn set_status(&self, status: AcpStatus, attempt: Option<u32>, reason: Option<String>) {
        set_status(&self.inner, status, attempt, reason);
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn set_status(inner: &Inner, status: AcpStatus, attempt: Option<u32>, reason: Option<String>) {
    *inner.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    debug!(?status, attempt, reason = reason.as_deref(), "acp status changed");
    inner.connection.emit(&ConnectionEvent::Status {
        status,
        attempt,
        reason,
    });
}

/// Wait for the child to exit (or for cancellation) and clean up after it.
async fn monitor_process(
    inner: Arc<Inner>,
    mut child: Child,
    attachment: Attachment,
    cancel: CancellationToken,
) {
    let generation = attachment.generation();
    tokio::select! {
        status = child.wait() => {
            let reason = match status {
                Ok(status) => describe_exit(status),
                Err(err) => format!("ACP process error: {err}"),
            };
            attachment.finished(DRAIN_GRACE).await;
            if inner.connection.detach(generation, &reason) {
                inner.initialized.store(false, Ordering::SeqCst);
                warn!(generation, %reason, "agent process exited");
                inner.connection.emit(&ConnectionEvent::Disconnected { reason: reason.clone() });
                let status = *inner.status.lock().unwrap_or_else(PoisonError::into_inner);
                if status == AcpStatus::Connected {
                    set_status(&inner, AcpStatus::Disconnected, None, Some(reason));
                }
            }
        }
        () = cancel.cancelled() => {
            if let Err(err) = child.start_kill() {
                debug!(generation, %err, "agent process already gone");
            }
            match child.wait().await {
                Ok(status) => debug!(generation, status = %describe_exit(status), "agent process reaped"),
                Err(err) => warn!(generation, %err, "failed to reap agent process"),
            }
            attachment.finished(DRAIN_GRACE).await;
        }
    }
}

/// Publish each stderr line as a [`ConnectionEvent::Stderr`].
async fn forward_stderr(connection: Connection, stderr: ChildStderr, cancel: CancellationToken) {
    let mut lines = LineReader::new(stderr);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(None) => break,
                Ok(Some(text)) => {
                    debug!(stderr = %text, "agent stderr");
                    connection.emit(&ConnectionEvent::Stderr { text });
                }
                Err(AppError::Acp(_)) => warn!("agent stderr line too long, skipped"),
                Err(err) => {
                    debug!(%err, "agent stderr closed");
                    break;
                }
            },
        }
    }
}
