// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Opaque identifier from the model, forwarded verbatim.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub input: Value,
}

/// One content item in a rich tool output.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPart {
    /// Plain UTF-8 text.
    Text(String),
    /// Base64 data URL: `data:<mime>;base64,<b64>`.
    Image(String),
}

/// A tool's output body: a plain string, an arbitrary JSON value, or a
/// mixed list of text and image parts. The runtime forwards it to the
/// provider without inspecting the semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutputPayload {
    Text(String),
    Json(Value),
    Parts(Vec<ToolPart>),
}

/// The result of executing a tool.
///
/// `ok = false` still carries an output body with the error string, so the
/// model can observe the failure and react.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub ok: bool,
    pub output: ToolOutputPayload,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: ToolOutputPayload) -> Self {
        Self {
            ok: true,
            output,
            error: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::ok(ToolOutputPayload::Text(text.into()))
    }

    pub fn err(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            ok: false,
            output: ToolOutputPayload::Text(message.clone()),
            error: Some(message),
        }
    }
}

/// Ambient context for one execution: a stable clock reading and the turn's
/// cancellation token.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub now: DateTime<Utc>,
    pub cancel: CancellationToken,
}

impl ExecContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            now: Utc::now(),
            cancel,
        }
    }
}

/// Trait every tool implementation must provide. The runtime consumes only
/// this contract; tool bodies live outside the core.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, call: &ToolInvocation, ctx: &ExecContext) -> ToolResult;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn err_result_carries_message_in_output_body() {
        let r = ToolResult::err("no such file");
        assert!(!r.ok);
        assert_eq!(r.error.as_deref(), Some("no such file"));
        assert_eq!(r.output, ToolOutputPayload::Text("no such file".into()));
    }

    #[test]
    fn text_result_is_ok_without_error() {
        let r = ToolResult::text("/tmp");
        assert!(r.ok);
        assert!(r.error.is_none());
    }
}
