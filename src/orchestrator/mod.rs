//! Host-side orchestration.
//!
//! Covers agent process supervision, permission negotiation, and the
//! conversation view that ties a connection to derived session state.

pub mod conversation;
pub mod permission;
pub mod supervisor;

pub use conversation::{ConversationView, ViewChange};
pub use permission::{PermissionNegotiator, Resolution};
pub use supervisor::{RetryPolicy, Supervisor, SupervisorConfig};
