//! Permission negotiator.
//!
//! Decides, for every inbound `session/request_permission`, whether it can
//! be answered without asking the user:
//!
//! 1. auto-allow policy: the first option whose kind starts with `allow`;
//! 2. a choice remembered for the request's tool kind, if that option is
//!    offered again;
//! 3. otherwise the request is surfaced and stays awaiting until
//!    [`PermissionNegotiator::respond`] is called.
//!
//! Remembered choices are scoped to one conversation view and cleared by
//! [`PermissionNegotiator::reset`].

use std::collections::HashMap;

use tracing::{debug, info};

use crate::models::permission::{PermissionOutcome, PermissionRequest};
use crate::session::SessionEngine;
use crate::{AppError, Result};

/// Remembered-choice key for requests that name no tool kind.
pub const FALLBACK_TOOL_KIND: &str = "other";

/// What to do with an inbound permission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Answer immediately with this outcome; the user never sees it.
    Resolved(PermissionOutcome),
    /// Show it to the user and wait for [`PermissionNegotiator::respond`].
    Surface,
}

/// Per-view permission state.
#[derive(Debug, Default)]
pub struct PermissionNegotiator {
    auto_allow: bool,
    remembered: HashMap<String, String>,
    awaiting: HashMap<String, AwaitingRequest>,
}

#[derive(Debug)]
struct AwaitingRequest {
    kind: String,
    request: PermissionRequest,
}

impl PermissionNegotiator {
    /// Negotiator with the given auto-allow policy.
    #[must_use]
    pub fn new(auto_allow: bool) -> Self {
        Self {
            auto_allow,
            ..Self::default()
        }
    }

    /// Whether auto-allow is active.
    #[must_use]
    pub fn auto_allow(&self) -> bool {
        self.auto_allow
    }

    /// Switch the auto-allow policy.
    pub fn set_auto_allow(&mut self, auto_allow: bool) {
        self.auto_allow = auto_allow;
    }

    /// Decide what to do with `request`.
    ///
    /// When the request carries no tool kind, the kind recorded for its
    /// tool call in `sessions` is used.
    pub fn on_request(
        &mut self,
        request: &PermissionRequest,
        sessions: &SessionEngine,
    ) -> Resolution {
        if self.auto_allow {
            if let Some(option) = request.options.iter().find(|o| o.is_allow()) {
                info!(
                    request_id = %request.request_id,
                    option_id = %option.option_id,
                    "permission auto-allowed"
                );
                return Resolution::Resolved(PermissionOutcome::selected(&option.option_id));
            }
        }

        let kind = tool_kind_key(request, sessions);
        if let Some(option_id) = self.remembered.get(&kind) {
            if request.option(option_id).is_some() {
                info!(
                    request_id = %request.request_id,
                    kind,
                    option_id,
                    "permission resolved from remembered choice"
                );
                return Resolution::Resolved(PermissionOutcome::selected(option_id));
            }
        }

        debug!(request_id = %request.request_id, kind, "permission awaiting choice");
        self.awaiting.insert(
            request.request_id.clone(),
            AwaitingRequest {
                kind,
                request: request.clone(),
            },
        );
        Resolution::Surface
    }

    /// Record the user's decision for an awaiting request.
    ///
    /// With `remember`, a `selected` outcome becomes the automatic answer
    /// for later requests of the same tool kind.
    ///
    /// # Errors
    ///
    /// [`AppError::NotFound`] if `request_id` is not awaiting a choice.
    pub fn respond(
        &mut self,
        request_id: &str,
        outcome: &PermissionOutcome,
        remember: bool,
    ) -> Result<PermissionRequest> {
        let awaiting = self.awaiting.remove(request_id).ok_or_else(|| {
            AppError::NotFound(format!("unknown permission request id: {request_id}"))
        })?;

        if let (true, PermissionOutcome::Selected { option_id }) = (remember, outcome) {
            debug!(kind = %awaiting.kind, option_id, "permission choice remembered");
            self.remembered.insert(awaiting.kind, option_id.clone());
        }
        Ok(awaiting.request)
    }

    /// Option id remembered for `kind`.
    #[must_use]
    pub fn remembered(&self, kind: &str) -> Option<&str> {
        self.remembered.get(kind).map(String::as_str)
    }

    /// Requests awaiting a choice, oldest id first.
    ///
    /// Numeric handles sort by value and come before any non-numeric ones,
    /// which sort as strings.
    #[must_use]
    pub fn awaiting(&self) -> Vec<&PermissionRequest> {
        let mut requests: Vec<&PermissionRequest> =
            self.awaiting.values().map(|a| &a.request).collect();
        requests.sort_by(|a, b| arrival_key(&a.request_id).cmp(&arrival_key(&b.request_id)));
        requests
    }

    /// Drop every awaiting request, returning their ids. Used when the
    /// process goes away and the requests can no longer be answered.
    pub fn discard_awaiting(&mut self) -> Vec<String> {
        self.awaiting.drain().map(|(id, _)| id).collect()
    }

    /// Forget awaiting requests and remembered choices.
    pub fn reset(&mut self) {
        self.awaiting.clear();
        self.remembered.clear();
    }
}

/// The key a request's choice is remembered under.
#[must_use]
pub fn tool_kind_key(request: &PermissionRequest, sessions: &SessionEngine) -> String {
    request
        .tool_kind
        .as_deref()
        .or_else(|| {
            request
                .tool_call_id
                .as_deref()
                .and_then(|id| sessions.tool_kind(&request.session_id, id))
        })
        .filter(|kind| !kind.is_empty())
        .unwrap_or(FALLBACK_TOOL_KIND)
        .to_owned()
}

fn arrival_key(request_id: &str) -> (bool, u64, &str) {
    match request_id.parse::<u64>() {
        Ok(n) => (false, n, request_id),
        Err(_) => (true, 0, request_id),
    }
}
