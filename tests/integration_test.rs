// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Full-stack test: a scripted provider behind the runtime, driven entirely
//! through the JSON-RPC router.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::timeout;

use relay_config::Provider;
use relay_core::{RuntimeBuilder, RuntimeEvent};
use relay_model::{ScriptedAdapter, ScriptedRound};
use relay_rpc::{RpcRouter, RpcRequest};

async fn call(router: &RpcRouter, method: &str, params: Value) -> Value {
    let resp = router
        .dispatch(RpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(1)),
            method: method.into(),
            params: Some(params),
        })
        .await;
    let wire = serde_json::to_value(&resp).unwrap();
    assert!(
        wire.get("error").is_none(),
        "{method} failed: {:?}",
        wire["error"]
    );
    wire["result"].clone()
}

#[tokio::test]
async fn rpc_driven_conversation_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = ScriptedAdapter::new(
        Provider::Router,
        vec![ScriptedRound::answer("routed hello")],
    );
    let rt = RuntimeBuilder::new(dir.path())
        .adapter(Arc::new(adapter))
        .build();
    let mut events = rt.events().subscribe();
    let router = RpcRouter::new(Arc::clone(&rt));

    // Handshake advertises the event capability and the method table.
    let handshake = call(&router, "rpc.handshake", json!({ "strict": true, "protocol_version": "1" })).await;
    assert!(handshake["capabilities"]
        .as_array()
        .unwrap()
        .contains(&json!("events")));

    // Credential + model selection through the RPC surface.
    call(&router, "auth.set.router_key", json!({ "key": "rk-test" })).await;
    call(&router, "model.select", json!({ "model": "atlas-4" })).await;
    let state = call(&router, "state.get", json!({})).await;
    assert_eq!(state["selected_provider"], "router");
    assert_eq!(state["has_router_key"], true);

    // Create a session and send a prompt.
    let created = call(&router, "session.create", json!({ "title": "demo" })).await;
    let sid = created["session_id"].as_str().unwrap().to_string();
    let outcome = call(
        &router,
        "session.send",
        json!({ "session_id": sid, "text": "hi there" }),
    )
    .await;
    assert_eq!(outcome["queued"], false);

    // The completion arrives on the event stream.
    let mut answer_length = None;
    while answer_length.is_none() {
        let ev = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out")
            .expect("bus closed");
        if let RuntimeEvent::Completed { answer_length: n, .. } = ev {
            answer_length = Some(n);
        }
    }
    assert_eq!(answer_length, Some("routed hello".len()));

    // The conversation is visible over session.get.
    let session = call(&router, "session.get", json!({ "session_id": sid })).await;
    let history = session["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["role"], "user");
    assert_eq!(history[1]["text"], "routed hello");

    // And it was persisted as a rollout.
    let rollouts = call(&router, "history.list", json!({})).await;
    assert_eq!(rollouts["rollouts"].as_array().unwrap().len(), 1);
}
