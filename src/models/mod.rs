//! Domain model module declarations.
//!
//! Wire payloads use `camelCase` field names as ACP does; derived host-side
//! state lives next to the payloads it is derived from.

pub mod content;
pub mod handshake;
pub mod permission;
pub mod session;
pub mod update;
