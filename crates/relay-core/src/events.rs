// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::{json, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use relay_config::Provider;
use relay_model::StreamChunk;

use crate::session::RuntimeUiMessage;

/// Events emitted by the runtime and forwarded to clients out-of-band.
///
/// Per-session ordering follows the order the owning turn observes things;
/// cross-session ordering is not guaranteed.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Global state changed (selection, auth, session set).
    StateChanged { reason: String },
    /// A session's pending flag / status label changed.
    SessionStatus {
        session_id: Uuid,
        pending: bool,
        status_label: String,
    },
    /// A display row was appended to a session's transcript.
    MessageAppended {
        session_id: Uuid,
        message: RuntimeUiMessage,
    },
    /// A streamed delta from the in-flight turn.
    StreamChunk {
        session_id: Uuid,
        turn_id: Uuid,
        chunk: StreamChunk,
    },
    ToolCallStarted {
        session_id: Uuid,
        turn_id: Uuid,
        call_id: String,
        name: String,
        arguments: String,
    },
    ToolCallCompleted {
        session_id: Uuid,
        turn_id: Uuid,
        call_id: String,
        name: String,
        ok: bool,
        output: String,
    },
    /// A round's batch of tool executions finished.
    ToolResults {
        session_id: Uuid,
        turn_id: Uuid,
        count: usize,
    },
    /// The turn produced its terminal assistant message.
    Completed {
        session_id: Uuid,
        turn_id: Uuid,
        answer_length: usize,
    },
    /// The turn was aborted; `partial_output` marks preserved prefix text.
    Interrupted {
        session_id: Uuid,
        turn_id: Uuid,
        partial_output: bool,
    },
    SessionError {
        session_id: Option<Uuid>,
        message: String,
    },
    Debug {
        session_id: Uuid,
        label: String,
        payload: Value,
    },
    AuthFlowStarted { provider: Provider },
    AuthFlowUrl { provider: Provider, url: String },
    AuthFlowDeviceCode { provider: Provider, code: String },
    AuthFlowCompleted { provider: Provider },
    AuthFlowFailed { provider: Provider, message: String },
}

impl RuntimeEvent {
    /// Wire name of this event type.
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeEvent::StateChanged { .. } => "state.changed",
            RuntimeEvent::SessionStatus { .. } => "session.status",
            RuntimeEvent::MessageAppended { .. } => "session.message.appended",
            RuntimeEvent::StreamChunk { .. } => "session.stream.chunk",
            RuntimeEvent::ToolCallStarted { .. } => "session.tool.call.started",
            RuntimeEvent::ToolCallCompleted { .. } => "session.tool.call.completed",
            RuntimeEvent::ToolResults { .. } => "session.tool.results",
            RuntimeEvent::Completed { .. } => "session.completed",
            RuntimeEvent::Interrupted { .. } => "session.interrupted",
            RuntimeEvent::SessionError { .. } => "session.error",
            RuntimeEvent::Debug { .. } => "session.debug",
            RuntimeEvent::AuthFlowStarted { .. } => "auth.flow.started",
            RuntimeEvent::AuthFlowUrl { .. } => "auth.flow.url",
            RuntimeEvent::AuthFlowDeviceCode { .. } => "auth.flow.device_code",
            RuntimeEvent::AuthFlowCompleted { .. } => "auth.flow.completed",
            RuntimeEvent::AuthFlowFailed { .. } => "auth.flow.failed",
        }
    }

    /// Payload object for the wire envelope.
    pub fn payload(&self) -> Value {
        match self {
            RuntimeEvent::StateChanged { reason } => json!({ "reason": reason }),
            RuntimeEvent::SessionStatus {
                session_id,
                pending,
                status_label,
            } => json!({
                "session_id": session_id,
                "pending": pending,
                "status_label": status_label,
            }),
            RuntimeEvent::MessageAppended {
                session_id,
                message,
            } => json!({ "session_id": session_id, "message": message }),
            RuntimeEvent::StreamChunk {
                session_id,
                turn_id,
                chunk,
            } => json!({ "session_id": session_id, "turn_id": turn_id, "chunk": chunk }),
            RuntimeEvent::ToolCallStarted {
                session_id,
                turn_id,
                call_id,
                name,
                arguments,
            } => json!({
                "session_id": session_id,
                "turn_id": turn_id,
                "call_id": call_id,
                "name": name,
                "arguments": arguments,
            }),
            RuntimeEvent::ToolCallCompleted {
                session_id,
                turn_id,
                call_id,
                name,
                ok,
                output,
            } => json!({
                "session_id": session_id,
                "turn_id": turn_id,
                "call_id": call_id,
                "name": name,
                "ok": ok,
                "output": output,
            }),
            RuntimeEvent::ToolResults {
                session_id,
                turn_id,
                count,
            } => json!({ "session_id": session_id, "turn_id": turn_id, "count": count }),
            RuntimeEvent::Completed {
                session_id,
                turn_id,
                answer_length,
            } => json!({
                "session_id": session_id,
                "turn_id": turn_id,
                "answer_length": answer_length,
            }),
            RuntimeEvent::Interrupted {
                session_id,
                turn_id,
                partial_output,
            } => json!({
                "session_id": session_id,
                "turn_id": turn_id,
                "partial_output": partial_output,
            }),
            RuntimeEvent::SessionError {
                session_id,
                message,
            } => json!({ "session_id": session_id, "message": message }),
            RuntimeEvent::Debug {
                session_id,
                label,
                payload,
            } => json!({ "session_id": session_id, "label": label, "payload": payload }),
            RuntimeEvent::AuthFlowStarted { provider } => json!({ "provider": provider }),
            RuntimeEvent::AuthFlowUrl { provider, url } => {
                json!({ "provider": provider, "url": url })
            }
            RuntimeEvent::AuthFlowDeviceCode { provider, code } => {
                json!({ "provider": provider, "device_code": code })
            }
            RuntimeEvent::AuthFlowCompleted { provider } => json!({ "provider": provider }),
            RuntimeEvent::AuthFlowFailed { provider, message } => {
                json!({ "provider": provider, "message": message })
            }
        }
    }

    /// The `{type, payload}` envelope delivered on the event channel.
    pub fn to_wire(&self) -> Value {
        json!({ "type": self.name(), "payload": self.payload() })
    }
}

/// Broadcast fan-out for runtime events. Sending never blocks and never
/// fails; events for lagging or absent subscribers are dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RuntimeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(512);
        Self { tx }
    }

    pub fn emit(&self, event: RuntimeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.tx.subscribe()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
