//! Agent Client Protocol (ACP) stream handling.
//!
//! This module manages bidirectional NDJSON JSON-RPC communication with an
//! agent process over its stdio.
//!
//! - `codec`: ndjson framing and the line reader built on it.
//! - `reader` / `writer`: the two stream tasks of an attachment.
//! - `protocol`: envelope shapes, error codes, method names.
//! - `connection`: the dispatcher: request/response correlation and
//!   inbound routing.
//! - `events`: what a connection publishes, and the bus it publishes on.
//! - `client`: typed host-side calls.
//! - `handshake`: the `initialize` exchange with a deadline.
//! - `spawner`: launch-command resolution and process spawning.

pub mod client;
pub mod codec;
pub mod connection;
pub mod events;
pub mod handshake;
pub mod protocol;
pub mod reader;
pub mod spawner;
pub mod writer;
