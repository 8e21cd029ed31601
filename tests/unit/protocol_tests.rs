//! Unit tests for JSON-RPC envelope helpers.

use serde_json::json;

use acp_host::acp::protocol::{
    error_from_wire, id_key, OutgoingResponse, RpcError, INTERNAL_ERROR, INVALID_PARAMS,
    METHOD_NOT_FOUND, UNKNOWN_RPC_ERROR,
};
use acp_host::AppError;

// ── Inbound error objects ────────────────────────────────────────────────────

#[test]
fn error_from_wire_keeps_code_and_message() {
    match error_from_wire(&json!({"code": -32000, "message": "busy"})) {
        AppError::Rpc { code, message } => {
            assert_eq!(code, -32000);
            assert_eq!(message, "busy");
        }
        other => panic!("expected rpc error, got {other:?}"),
    }
}

#[test]
fn error_from_wire_fills_missing_fields() {
    match error_from_wire(&json!({})) {
        AppError::Rpc { code, message } => {
            assert_eq!(code, INTERNAL_ERROR);
            assert_eq!(message, UNKNOWN_RPC_ERROR);
        }
        other => panic!("expected rpc error, got {other:?}"),
    }
    match error_from_wire(&json!({"code": 1, "message": 42})) {
        AppError::Rpc { message, .. } => assert_eq!(message, "Unknown JSON-RPC error"),
        other => panic!("expected rpc error, got {other:?}"),
    }
}

// ── Ids ──────────────────────────────────────────────────────────────────────

#[test]
fn id_key_uses_plain_text_form() {
    assert_eq!(id_key(&json!(7)), "7");
    assert_eq!(id_key(&json!("abc")), "abc");
    assert_eq!(id_key(&json!("7")), "7");
}

// ── Outbound responses ───────────────────────────────────────────────────────

#[test]
fn success_response_has_result_only() {
    let response = OutgoingResponse::from_outcome(json!("x-1"), Ok(json!({"ok": true})));
    let wire = serde_json::to_value(&response).unwrap();
    assert_eq!(
        wire,
        json!({"jsonrpc": "2.0", "id": "x-1", "result": {"ok": true}})
    );
}

#[test]
fn error_response_has_error_only() {
    let response = OutgoingResponse::from_outcome(json!(3), Err(RpcError::method_not_found("foo")));
    let wire = serde_json::to_value(&response).unwrap();
    assert_eq!(
        wire,
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": {"code": METHOD_NOT_FOUND, "message": "Method not found: foo"}
        })
    );
}

// ── Conversions ──────────────────────────────────────────────────────────────

#[test]
fn rpc_errors_pass_through_app_errors() {
    let rpc: RpcError = AppError::Rpc {
        code: INVALID_PARAMS,
        message: "bad mode".into(),
    }
    .into();
    assert_eq!(rpc, RpcError::invalid_params("bad mode"));

    let back: AppError = rpc.into();
    assert!(matches!(back, AppError::Rpc { code: INVALID_PARAMS, .. }));
}

#[test]
fn other_app_errors_become_internal_errors() {
    let rpc: RpcError = AppError::NotFound("session s9".into()).into();
    assert_eq!(rpc.code, INTERNAL_ERROR);
    assert_eq!(rpc.message, "not found: session s9");
    assert_eq!(rpc.to_string(), "not found: session s9 (-32603)");
}
