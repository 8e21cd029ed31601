#![forbid(unsafe_code)]

//! Host and agent ends of the Agent Client Protocol (ACP): JSON-RPC 2.0 over
//! newline-delimited JSON on a subprocess's stdio.

pub mod acp;
pub mod agent;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod session;

pub use acp::connection::Connection;
pub use acp::events::{AcpStatus, ConnectionEvent, Subscription};
pub use config::GlobalConfig;
pub use errors::{AppError, Result};
