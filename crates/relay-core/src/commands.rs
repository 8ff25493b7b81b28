// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Slash-command dispatch.
//!
//! Strings beginning with `/` are routed here via `command.execute`. An
//! unknown command yields a structured error output, not an RPC error.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::CoreError;
use crate::runtime::Runtime;

/// Structured output of one command execution.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    pub ok: bool,
    pub command: String,
    pub body: Value,
}

impl CommandOutput {
    fn ok(command: &str, body: Value) -> Self {
        Self {
            ok: true,
            command: command.to_string(),
            body,
        }
    }

    fn err(command: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            command: command.to_string(),
            body: json!({ "error": message.into() }),
        }
    }
}

const HELP: &[(&str, &str)] = &[
    ("/auth", "show provider auth status"),
    ("/onboarding", "show onboarding status"),
    ("/forgeteverything", "wipe selection state and all secrets"),
    ("/model", "list models, or select one: /model <id>"),
    ("/limits", "show the current context budget"),
    ("/history", "list rollouts: /history [list|last|<id>]"),
    ("/clear", "clear the current session's conversation"),
    ("/compression", "compress the current session's history"),
    ("/skills", "list discovered skills"),
    ("/tools", "list registered tools"),
    ("/help", "this list"),
    ("/quit", "shut the runtime down"),
    ("/exit", "shut the runtime down"),
];

/// Execute one slash command. `session_id` scopes the session-bound
/// commands (`/clear`, `/compression`).
pub async fn execute_command(
    rt: &Arc<Runtime>,
    raw: &str,
    session_id: Option<Uuid>,
) -> Result<CommandOutput, CoreError> {
    let raw = raw.trim();
    if !raw.starts_with('/') {
        return Err(CoreError::invalid_params(
            "command",
            "commands must start with '/'",
        ));
    }
    let mut parts = raw.split_whitespace();
    let name = parts.next().unwrap_or("/");
    let arg = parts.next();

    match name {
        "/auth" => Ok(CommandOutput::ok(name, json!({ "providers": rt.auth_status() }))),
        "/onboarding" => Ok(CommandOutput::ok(
            name,
            json!({ "complete": rt.onboarding_complete() }),
        )),
        "/forgeteverything" => {
            rt.forget_everything()?;
            Ok(CommandOutput::ok(name, json!({ "reset": true })))
        }
        "/model" => match arg {
            Some(id) => {
                let option = rt.model_select(id, None)?;
                Ok(CommandOutput::ok(name, json!({ "selected": option })))
            }
            None => Ok(CommandOutput::ok(name, json!({ "models": rt.model_list() }))),
        },
        "/limits" => Ok(CommandOutput::ok(name, json!(rt.limits()))),
        "/history" => match arg {
            None | Some("list") => Ok(CommandOutput::ok(
                name,
                json!({ "rollouts": rt.history_list()? }),
            )),
            Some("last") => match rt.history_latest()? {
                Some(rollout) => Ok(CommandOutput::ok(
                    name,
                    json!({ "header": rollout.header, "messages": rollout.messages }),
                )),
                None => Ok(CommandOutput::err(name, "no rollouts recorded yet")),
            },
            Some(id) => {
                let rollout = rt.history_get(id)?;
                Ok(CommandOutput::ok(
                    name,
                    json!({ "header": rollout.header, "messages": rollout.messages }),
                ))
            }
        },
        "/clear" => {
            let id = require_session(name, session_id)?;
            rt.clear_session_history(id)?;
            Ok(CommandOutput::ok(name, json!({ "cleared": true })))
        }
        "/compression" => {
            let id = require_session(name, session_id)?;
            let (before, after) = rt.compress_session(id)?;
            Ok(CommandOutput::ok(
                name,
                json!({ "before_tokens": before, "after_tokens": after }),
            ))
        }
        "/skills" => Ok(CommandOutput::ok(name, json!({ "skills": rt.skills_list() }))),
        "/tools" => {
            let tools: Vec<Value> = rt
                .tools_list()
                .into_iter()
                .map(|t| json!({ "name": t.name, "description": t.description }))
                .collect();
            Ok(CommandOutput::ok(name, json!({ "tools": tools })))
        }
        "/help" => {
            let entries: Vec<Value> = HELP
                .iter()
                .map(|(cmd, desc)| json!({ "command": cmd, "description": desc }))
                .collect();
            Ok(CommandOutput::ok(name, json!({ "commands": entries })))
        }
        "/quit" | "/exit" => {
            rt.shutdown();
            Ok(CommandOutput::ok(name, json!({ "shutdown": true })))
        }
        other => Ok(CommandOutput::err(other, format!("unknown command: {other}"))),
    }
}

fn require_session(command: &str, session_id: Option<Uuid>) -> Result<Uuid, CoreError> {
    session_id.ok_or_else(|| {
        CoreError::invalid_params("session_id", format!("{command} requires a session_id"))
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeBuilder;

    fn runtime() -> (tempfile::TempDir, Arc<Runtime>) {
        let dir = tempfile::tempdir().unwrap();
        let rt = RuntimeBuilder::new(dir.path()).build();
        (dir, rt)
    }

    #[tokio::test]
    async fn unknown_command_is_structured_error_not_rpc_error() {
        let (_dir, rt) = runtime();
        let out = execute_command(&rt, "/frobnicate", None).await.unwrap();
        assert!(!out.ok);
        assert!(out.body["error"]
            .as_str()
            .unwrap()
            .contains("unknown command"));
    }

    #[tokio::test]
    async fn non_slash_input_is_invalid_params() {
        let (_dir, rt) = runtime();
        let err = execute_command(&rt, "hello", None).await.unwrap_err();
        assert_eq!(err.reason(), "invalid_params");
    }

    #[tokio::test]
    async fn help_lists_the_recognized_commands() {
        let (_dir, rt) = runtime();
        let out = execute_command(&rt, "/help", None).await.unwrap();
        assert!(out.ok);
        let listed: Vec<&str> = out.body["commands"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["command"].as_str().unwrap())
            .collect();
        for cmd in ["/auth", "/model", "/compression", "/quit"] {
            assert!(listed.contains(&cmd), "missing {cmd}");
        }
    }

    #[tokio::test]
    async fn model_command_selects_and_lists() {
        let (_dir, rt) = runtime();
        let out = execute_command(&rt, "/model", None).await.unwrap();
        assert!(out.body["models"].as_array().unwrap().len() >= 5);

        let out = execute_command(&rt, "/model atlas-4", None).await.unwrap();
        assert!(out.ok);
        assert_eq!(rt.snapshot().selected_model.as_deref(), Some("atlas-4"));
    }

    #[tokio::test]
    async fn clear_without_session_is_invalid_params() {
        let (_dir, rt) = runtime();
        let err = execute_command(&rt, "/clear", None).await.unwrap_err();
        assert_eq!(err.reason(), "invalid_params");
    }

    #[tokio::test]
    async fn quit_requests_shutdown() {
        let (_dir, rt) = runtime();
        let out = execute_command(&rt, "/quit", None).await.unwrap();
        assert!(out.ok);
        assert!(rt.is_shutting_down());
    }

    #[tokio::test]
    async fn forgeteverything_resets_state() {
        let (_dir, rt) = runtime();
        rt.model_select("quasar-5", None).unwrap();
        let out = execute_command(&rt, "/forgeteverything", None).await.unwrap();
        assert!(out.ok);
        assert!(rt.snapshot().selected_model.is_none());
        assert!(!rt.snapshot().onboarding_complete);
    }
}
