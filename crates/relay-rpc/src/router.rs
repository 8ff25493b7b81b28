// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! JSON-RPC method router.
//!
//! A flat method table over the runtime. Parameter validation is explicit
//! per method; a missing or mistyped field is reported with its name.
//! Events are not part of this surface; the server forwards them from the
//! runtime's bus out-of-band.

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use relay_config::{SecretKind, ThinkingLevel};
use relay_core::{execute_command, Runtime, SendParams};

use crate::protocol::{RpcError, RpcRequest, RpcResponse, PROTOCOL_VERSION};

/// Every method this router can dispatch, sorted. The handshake's method
/// list is exactly this slice.
const METHODS: &[&str] = &[
    "auth.connect.primary",
    "auth.connect.secondary",
    "auth.set.router_key",
    "auth.set.search_key",
    "auth.status",
    "command.execute",
    "debug.set",
    "history.clear_session",
    "history.get",
    "history.list",
    "limits.get",
    "model.list",
    "model.router.providers",
    "model.select",
    "onboarding.complete",
    "onboarding.status",
    "rpc.handshake",
    "session.create",
    "session.get",
    "session.interrupt",
    "session.queue.clear",
    "session.queue.list",
    "session.send",
    "session.steer",
    "skills.list",
    "state.get",
    "system.ping",
    "system.shutdown",
    "tools.list",
];

pub struct RpcRouter {
    rt: Arc<Runtime>,
}

impl RpcRouter {
    pub fn new(rt: Arc<Runtime>) -> Self {
        Self { rt }
    }

    pub fn methods() -> &'static [&'static str] {
        METHODS
    }

    /// Dispatch one raw request line.
    pub async fn dispatch_line(&self, line: &str) -> RpcResponse {
        let request: RpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                return RpcResponse::err(None, RpcError::invalid_params("request", e.to_string()))
            }
        };
        self.dispatch(request).await
    }

    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        if request.jsonrpc != "2.0" {
            return RpcResponse::err(
                id,
                RpcError::invalid_params("jsonrpc", "must be \"2.0\""),
            );
        }
        let params = request.params.unwrap_or_else(|| json!({}));
        match self.handle(&request.method, params).await {
            Ok(result) => RpcResponse::ok(id, result),
            Err(err) => RpcResponse::err(id, err),
        }
    }

    async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let rt = &self.rt;
        match method {
            "rpc.handshake" => {
                if opt_bool(&params, "strict")?.unwrap_or(false) {
                    let version = opt_str(&params, "protocol_version")?.unwrap_or_default();
                    if version != PROTOCOL_VERSION {
                        return Err(relay_core::CoreError::UnsupportedProtocolVersion(version)
                            .into());
                    }
                }
                Ok(json!({
                    "protocol_version": PROTOCOL_VERSION,
                    "capabilities": ["events", "command_execute", "multi_session", "image_inputs"],
                    "methods": METHODS,
                }))
            }
            "system.ping" => Ok(json!({ "pong": true })),
            "system.shutdown" => {
                rt.shutdown();
                Ok(json!({ "shutting_down": true }))
            }
            "state.get" => Ok(json!(rt.snapshot())),

            // ── Sessions ─────────────────────────────────────────────────────
            "session.create" => {
                let title = opt_str(&params, "title")?;
                let (session_id, state) = rt.create_session(title);
                Ok(json!({ "session_id": session_id, "state": state }))
            }
            "session.get" => {
                let id = session_id(&params)?;
                Ok(json!(rt.get_session(id)?))
            }
            "session.send" => {
                let id = session_id(&params)?;
                let text = opt_str(&params, "text")?.unwrap_or_default();
                let images = opt_str_list(&params, "images")?.unwrap_or_default();
                let enqueue = opt_bool(&params, "enqueue")?.unwrap_or(false);
                let outcome = rt.send(SendParams {
                    session_id: id,
                    text,
                    images,
                    enqueue,
                })?;
                Ok(json!(outcome))
            }
            "session.steer" => {
                let id = session_id(&params)?;
                let text = req_str(&params, "text")?;
                let accepted = rt.steer(id, &text)?;
                Ok(json!({ "accepted": accepted }))
            }
            "session.interrupt" => {
                let id = session_id(&params)?;
                let interrupted = rt.interrupt(id)?;
                Ok(json!({ "interrupted": interrupted }))
            }
            "session.queue.list" => {
                let id = session_id(&params)?;
                Ok(json!({ "queue": rt.queue_list(id)? }))
            }
            "session.queue.clear" => {
                let id = session_id(&params)?;
                Ok(json!({ "cleared": rt.queue_clear(id)? }))
            }

            // ── Commands ─────────────────────────────────────────────────────
            "command.execute" => {
                let command = req_str(&params, "command")?;
                let session = match params.get("session_id") {
                    Some(_) => Some(session_id(&params)?),
                    None => None,
                };
                let output = execute_command(rt, &command, session).await?;
                Ok(json!(output))
            }

            // ── Auth ─────────────────────────────────────────────────────────
            "auth.status" => Ok(json!({ "providers": rt.auth_status() })),
            "auth.connect.primary" => {
                rt.connect_oauth(relay_config::Provider::Primary).await?;
                Ok(json!({ "connected": true }))
            }
            "auth.connect.secondary" => {
                rt.connect_oauth(relay_config::Provider::Secondary).await?;
                Ok(json!({ "connected": true }))
            }
            "auth.set.router_key" => {
                let key = req_str(&params, "key")?;
                rt.set_api_key(SecretKind::RouterKey, &key)?;
                Ok(json!({ "saved": true }))
            }
            "auth.set.search_key" => {
                let key = req_str(&params, "key")?;
                rt.set_api_key(SecretKind::SearchKey, &key)?;
                Ok(json!({ "saved": true }))
            }

            // ── Onboarding ───────────────────────────────────────────────────
            "onboarding.status" => Ok(json!({ "complete": rt.onboarding_complete() })),
            "onboarding.complete" => {
                rt.complete_onboarding();
                Ok(json!({ "complete": true }))
            }

            // ── Models ───────────────────────────────────────────────────────
            "model.list" => Ok(json!({ "models": rt.model_list() })),
            "model.select" => {
                let model = req_str(&params, "model")?;
                let thinking = match opt_str(&params, "thinking")? {
                    Some(raw) => Some(ThinkingLevel::parse(&raw).ok_or_else(|| {
                        RpcError::invalid_params("thinking", format!("unknown level '{raw}'"))
                    })?),
                    None => None,
                };
                let option = rt.model_select(&model, thinking)?;
                if let Some(tag) = opt_str(&params, "router_provider")? {
                    rt.select_router_provider(&tag)?;
                }
                Ok(json!({ "selected": option }))
            }
            "model.router.providers" => Ok(json!({ "providers": rt.router_providers() })),
            "limits.get" => Ok(json!(rt.limits())),

            // ── History / skills / tools / debug ─────────────────────────────
            "history.list" => Ok(json!({ "rollouts": rt.history_list()? })),
            "history.get" => {
                let id = req_str(&params, "id")?;
                let rollout = rt.history_get(&id)?;
                Ok(json!({
                    "header": rollout.header,
                    "messages": rollout.messages,
                    "path": rollout.path,
                }))
            }
            "history.clear_session" => {
                let id = session_id(&params)?;
                rt.clear_session_history(id)?;
                Ok(json!({ "cleared": true }))
            }
            "skills.list" => Ok(json!({ "skills": rt.skills_list() })),
            "tools.list" => {
                let tools: Vec<Value> = rt
                    .tools_list()
                    .into_iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        })
                    })
                    .collect();
                Ok(json!({ "tools": tools }))
            }
            "debug.set" => {
                let enabled = req_bool(&params, "enabled")?;
                rt.set_debug(enabled);
                Ok(json!({ "enabled": enabled }))
            }

            other => Err(RpcError::method_not_found(other)),
        }
    }
}

// ─── Param validation helpers ─────────────────────────────────────────────────

fn req_str(params: &Value, field: &str) -> Result<String, RpcError> {
    match params.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(RpcError::invalid_params(field, "must not be empty")),
        Some(_) => Err(RpcError::invalid_params(field, "must be a string")),
        None => Err(RpcError::invalid_params(field, "missing required field")),
    }
}

fn opt_str(params: &Value, field: &str) -> Result<Option<String>, RpcError> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(RpcError::invalid_params(field, "must be a string")),
    }
}

fn req_bool(params: &Value, field: &str) -> Result<bool, RpcError> {
    match params.get(field) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(RpcError::invalid_params(field, "must be a boolean")),
        None => Err(RpcError::invalid_params(field, "missing required field")),
    }
}

fn opt_bool(params: &Value, field: &str) -> Result<Option<bool>, RpcError> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(RpcError::invalid_params(field, "must be a boolean")),
    }
}

fn opt_str_list(params: &Value, field: &str) -> Result<Option<Vec<String>>, RpcError> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                _ => Err(RpcError::invalid_params(field, "must be a list of strings")),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(RpcError::invalid_params(field, "must be a list of strings")),
    }
}

fn session_id(params: &Value) -> Result<Uuid, RpcError> {
    let raw = req_str(params, "session_id")?;
    raw.parse()
        .map_err(|_| RpcError::invalid_params("session_id", "must be a UUID"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::RuntimeBuilder;

    fn router() -> (tempfile::TempDir, RpcRouter) {
        let dir = tempfile::tempdir().unwrap();
        let rt = RuntimeBuilder::new(dir.path()).build();
        (dir, RpcRouter::new(rt))
    }

    async fn call(router: &RpcRouter, method: &str, params: Value) -> RpcResponse {
        router
            .dispatch(RpcRequest {
                jsonrpc: "2.0".into(),
                id: Some(json!(1)),
                method: method.into(),
                params: Some(params),
            })
            .await
    }

    #[test]
    fn method_table_is_sorted_and_unique() {
        let mut sorted = METHODS.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted, METHODS);
    }

    #[tokio::test]
    async fn handshake_method_list_matches_the_dispatch_table() {
        let (_dir, router) = router();
        let resp = call(&router, "rpc.handshake", json!({})).await;
        let methods: Vec<String> = resp.result.unwrap()["methods"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert_eq!(methods, METHODS);

        // Every advertised method actually dispatches (no method_not_found).
        for method in METHODS {
            let resp = call(&router, method, json!({})).await;
            if let Some(err) = resp.error {
                assert_ne!(
                    err.code,
                    crate::protocol::CODE_METHOD_NOT_FOUND,
                    "{method} advertised but not dispatchable"
                );
            }
        }
    }

    #[tokio::test]
    async fn strict_handshake_rejects_version_mismatch() {
        let (_dir, router) = router();
        let resp = call(
            &router,
            "rpc.handshake",
            json!({ "strict": true, "protocol_version": "99" }),
        )
        .await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, crate::protocol::CODE_INVALID_PARAMS);
        assert_eq!(err.data.unwrap()["reason"], "unsupported_protocol_version");
    }

    #[tokio::test]
    async fn ping_pongs() {
        let (_dir, router) = router();
        let resp = call(&router, "system.ping", json!({})).await;
        assert_eq!(resp.result.unwrap()["pong"], true);
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let (_dir, router) = router();
        let resp = call(&router, "nope.nothing", json!({})).await;
        assert_eq!(
            resp.error.unwrap().code,
            crate::protocol::CODE_METHOD_NOT_FOUND
        );
    }

    #[tokio::test]
    async fn wrong_jsonrpc_version_is_rejected() {
        let (_dir, router) = router();
        let resp = router
            .dispatch(RpcRequest {
                jsonrpc: "1.0".into(),
                id: Some(json!(1)),
                method: "system.ping".into(),
                params: None,
            })
            .await;
        assert_eq!(
            resp.error.unwrap().code,
            crate::protocol::CODE_INVALID_PARAMS
        );
    }

    #[tokio::test]
    async fn missing_session_id_names_the_field() {
        let (_dir, router) = router();
        let resp = call(&router, "session.get", json!({})).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, crate::protocol::CODE_INVALID_PARAMS);
        assert_eq!(err.data.unwrap()["field"], "session_id");
    }

    #[tokio::test]
    async fn malformed_session_id_is_reported() {
        let (_dir, router) = router();
        let resp = call(&router, "session.get", json!({ "session_id": "not-a-uuid" })).await;
        let err = resp.error.unwrap();
        assert_eq!(err.data.unwrap()["detail"], "must be a UUID");
    }

    #[tokio::test]
    async fn session_create_then_get_round_trips() {
        let (_dir, router) = router();
        let resp = call(&router, "session.create", json!({ "title": "demo" })).await;
        let sid = resp.result.unwrap()["session_id"]
            .as_str()
            .unwrap()
            .to_string();
        let resp = call(&router, "session.get", json!({ "session_id": sid })).await;
        let session = resp.result.unwrap();
        assert_eq!(session["state"], "ready");
        assert_eq!(session["title"], "demo");
    }

    #[tokio::test]
    async fn send_to_unknown_session_is_domain_error() {
        let (_dir, router) = router();
        let resp = call(
            &router,
            "session.send",
            json!({ "session_id": Uuid::new_v4(), "text": "hi" }),
        )
        .await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, crate::protocol::CODE_DOMAIN_ERROR);
        assert_eq!(err.data.unwrap()["reason"], "unknown_session");
    }

    #[tokio::test]
    async fn empty_send_is_invalid_params() {
        let (_dir, router) = router();
        let resp = call(&router, "session.create", json!({})).await;
        let sid = resp.result.unwrap()["session_id"]
            .as_str()
            .unwrap()
            .to_string();
        let resp = call(&router, "session.send", json!({ "session_id": sid })).await;
        assert_eq!(
            resp.error.unwrap().code,
            crate::protocol::CODE_INVALID_PARAMS
        );
    }

    #[tokio::test]
    async fn model_select_validates_thinking_level() {
        let (_dir, router) = router();
        let resp = call(
            &router,
            "model.select",
            json!({ "model": "quasar-5", "thinking": "sideways" }),
        )
        .await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, crate::protocol::CODE_INVALID_PARAMS);

        let resp = call(
            &router,
            "model.select",
            json!({ "model": "quasar-5", "thinking": "high" }),
        )
        .await;
        assert_eq!(resp.result.unwrap()["selected"]["id"], "quasar-5");
    }

    #[tokio::test]
    async fn command_execute_returns_structured_output() {
        let (_dir, router) = router();
        let resp = call(&router, "command.execute", json!({ "command": "/help" })).await;
        let out = resp.result.unwrap();
        assert_eq!(out["ok"], true);
        assert!(out["body"]["commands"].as_array().unwrap().len() >= 10);
    }

    #[tokio::test]
    async fn dispatch_line_reports_parse_failures() {
        let (_dir, router) = router();
        let resp = router.dispatch_line("{not json").await;
        assert_eq!(
            resp.error.unwrap().code,
            crate::protocol::CODE_INVALID_PARAMS
        );
    }
}
