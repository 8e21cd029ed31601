//! Typed host-side ACP calls.
//!
//! Thin wrappers over [`Connection::request`] / [`Connection::notify`] that
//! serialize typed params and deserialize typed results.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::acp::connection::Connection;
use crate::acp::protocol::methods;
use crate::models::handshake::{InitializeParams, InitializeResponse};
use crate::models::session::{
    CancelParams, LoadSessionParams, NewSessionParams, NewSessionResponse, PromptParams,
    PromptResponse, SetModeParams, SetModelParams,
};
use crate::{AppError, Result};

impl Connection {
    /// Send a typed request and decode its result.
    ///
    /// # Errors
    ///
    /// Any [`Connection::request`] error, or [`AppError::Acp`] when the
    /// result does not match `R`.
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.request(method, params).await?;
        decode(method, result)
    }

    /// `initialize` handshake.
    ///
    /// # Errors
    ///
    /// See [`Connection::call`].
    pub async fn initialize(&self, params: &InitializeParams) -> Result<InitializeResponse> {
        self.call(methods::INITIALIZE, params).await
    }

    /// `authenticate` with an agent-defined payload.
    ///
    /// # Errors
    ///
    /// See [`Connection::call`].
    pub async fn authenticate(&self, params: Value) -> Result<Value> {
        self.request(methods::AUTHENTICATE, params).await
    }

    /// `session/new`.
    ///
    /// # Errors
    ///
    /// See [`Connection::call`]; also [`AppError::Acp`] when the agent
    /// returns no session id.
    pub async fn new_session(&self, params: &NewSessionParams) -> Result<NewSessionResponse> {
        let response: NewSessionResponse = self.call(methods::SESSION_NEW, params).await?;
        match response.session_id.as_deref() {
            Some(id) if !id.is_empty() => Ok(response),
            _ => Err(AppError::Acp("session/new returned no sessionId".into())),
        }
    }

    /// `session/load`. The response's session id defaults to the requested one.
    ///
    /// # Errors
    ///
    /// See [`Connection::call`].
    pub async fn load_session(&self, params: &LoadSessionParams) -> Result<NewSessionResponse> {
        let mut response: NewSessionResponse = self.call(methods::SESSION_LOAD, params).await?;
        if response.session_id.as_deref().map_or(true, str::is_empty) {
            response.session_id = Some(params.session_id.clone());
        }
        Ok(response)
    }

    /// `session/prompt`; resolves when the turn ends.
    ///
    /// # Errors
    ///
    /// See [`Connection::call`].
    pub async fn prompt(&self, params: &PromptParams) -> Result<PromptResponse> {
        self.call(methods::SESSION_PROMPT, params).await
    }

    /// `session/cancel` notification. Advisory: the in-flight prompt still
    /// resolves on its own, typically with `stopReason: "cancelled"`.
    ///
    /// # Errors
    ///
    /// [`AppError::NotRunning`] if no process is attached.
    pub fn cancel(&self, params: &CancelParams) -> Result<()> {
        self.notify(methods::SESSION_CANCEL, serde_json::to_value(params)?)
    }

    /// `session/set_mode`.
    ///
    /// # Errors
    ///
    /// See [`Connection::call`].
    pub async fn set_mode(&self, params: &SetModeParams) -> Result<Value> {
        self.request(methods::SESSION_SET_MODE, serde_json::to_value(params)?)
            .await
    }

    /// `session/set_model`.
    ///
    /// # Errors
    ///
    /// See [`Connection::call`].
    pub async fn set_model(&self, params: &SetModelParams) -> Result<Value> {
        self.request(methods::SESSION_SET_MODEL, serde_json::to_value(params)?)
            .await
    }
}

fn decode<R: DeserializeOwned>(method: &str, result: Value) -> Result<R> {
    serde_json::from_value(result)
        .map_err(|e| AppError::Acp(format!("unexpected {method} result: {e}")))
}
