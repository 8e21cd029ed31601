//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Framing or protocol violation on the ACP stream.
    Acp(String),
    /// The peer answered a request with a JSON-RPC error object.
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Human-readable message from the peer.
        message: String,
    },
    /// A write was attempted while no agent process is attached.
    NotRunning(String),
    /// Agent process failed to spawn or exited.
    Process(String),
    /// Startup handshake failed after the bounded retry loop.
    Startup(String),
    /// A request exceeded its optional deadline.
    Timeout(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Transport error raised when writing without a live agent process.
    #[must_use]
    pub fn not_running() -> Self {
        Self::NotRunning("ACP process is not running".into())
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Acp(msg) => write!(f, "acp: {msg}"),
            Self::Rpc { code, message } => write!(f, "rpc error {code}: {message}"),
            Self::NotRunning(msg) => write!(f, "not running: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Startup(msg) => write!(f, "startup: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Acp(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
