//! Session state derived from streaming `session/update` notifications.

pub mod engine;

pub use engine::{apply, replay, SessionEngine};
