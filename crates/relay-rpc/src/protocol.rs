// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! JSON-RPC 2.0 envelope types and the error taxonomy.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use relay_core::CoreError;

/// Protocol version negotiated by `rpc.handshake`.
pub const PROTOCOL_VERSION: &str = "1";

pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_INVALID_PARAMS: i64 = -32602;
pub const CODE_INTERNAL_ERROR: i64 = -32603;
pub const CODE_DOMAIN_ERROR: i64 = -32000;

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Option<Value>, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>, reason: &str) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(json!({ "reason": reason })),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            CODE_METHOD_NOT_FOUND,
            format!("method not found: {method}"),
            "method_not_found",
        )
    }

    pub fn invalid_params(field: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            code: CODE_INVALID_PARAMS,
            message: format!("invalid params: {field}: {reason}"),
            data: Some(json!({
                "reason": "invalid_params",
                "field": field,
                "detail": reason,
            })),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CODE_INTERNAL_ERROR, message, "internal_error")
    }
}

impl From<CoreError> for RpcError {
    fn from(err: CoreError) -> Self {
        let reason = err.reason();
        let code = match &err {
            CoreError::InvalidParams { .. } | CoreError::UnknownModel(_) => CODE_INVALID_PARAMS,
            CoreError::Internal(_) => CODE_INTERNAL_ERROR,
            CoreError::UnsupportedProtocolVersion(_) => CODE_INVALID_PARAMS,
            _ => CODE_DOMAIN_ERROR,
        };
        RpcError::new(code, err.to_string(), reason)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
