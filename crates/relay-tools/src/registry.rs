// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::{ExecContext, Tool, ToolInvocation, ToolOutputPayload, ToolResult};

/// A tool declaration as advertised to providers and over RPC.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central name→tool map. Populated once at startup; immutable afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations for all registered tools, sorted by name.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut decls: Vec<ToolDeclaration> = self
            .tools
            .values()
            .map(|t| ToolDeclaration {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Execution wrapper around the registry: resolves the tool, runs it with
/// the turn's cancellation token, and normalizes every failure mode into a
/// [`ToolResult`] the turn engine can replay to the model.
#[derive(Clone)]
pub struct ToolRuntime {
    registry: Arc<ToolRegistry>,
}

impl ToolRuntime {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn execute(&self, call: &ToolInvocation, ctx: &ExecContext) -> ToolResult {
        let Some(tool) = self.registry.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "unknown tool requested");
            return ToolResult::err(format!("unknown tool: {}", call.name));
        };
        if ctx.cancel.is_cancelled() {
            return ToolResult::err("tool execution aborted");
        }
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => ToolResult::err("tool execution aborted"),
            result = tool.execute(call, ctx) => result,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
