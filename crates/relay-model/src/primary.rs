// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Primary provider adapter (OAuth bearer, response-item protocol).
//!
//! The transport is stateless: every round re-sends the full input item
//! list and `previous_response_id` is never set. Parallel tool calls are
//! disabled and responses are not stored server-side.

use async_trait::async_trait;
use serde_json::json;

use relay_config::{Provider, ThinkingLevel};

use crate::{
    adapter::{ChunkSink, DebugSink, ProviderAdapter},
    sanitize::ToolNameMap,
    wire, RequestItem, StreamError, TurnRequest, TurnResult,
};

const DEFAULT_BASE_URL: &str = "https://api.quasar.dev";

pub struct PrimaryAdapter {
    base_url: String,
    client: reqwest::Client,
}

impl PrimaryAdapter {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            client: reqwest::Client::new(),
        }
    }
}

impl Default for PrimaryAdapter {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl ProviderAdapter for PrimaryAdapter {
    fn provider(&self) -> Provider {
        Provider::Primary
    }

    async fn stream(
        &self,
        req: TurnRequest,
        on_chunk: &ChunkSink,
        on_debug: &DebugSink,
    ) -> Result<TurnResult, StreamError> {
        if req.credential.trim().is_empty() {
            return Err(StreamError::MissingCredential(Provider::Primary));
        }

        // The name map lives for this round only; sanitized names never
        // reach history or the UI.
        let mut names = ToolNameMap::new();
        let tools = wire::build_tool_declarations(&req.tools, &mut names);

        // Pre-round boundary: splice any steering messages into the input.
        let mut items: Vec<RequestItem> = req.input.clone();
        items.extend((req.drain_steering)().into_iter().map(RequestItem::Message));
        let input = wire::build_input_items(&items, &names);

        let mut body = json!({
            "model": req.model,
            "input": input,
            "stream": true,
            "store": false,
            "parallel_tool_calls": false,
            "tool_choice": "auto",
        });
        if let Some(instructions) = &req.system_instruction {
            body["instructions"] = json!(instructions);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        if req.thinking != ThinkingLevel::Off {
            let mut reasoning = json!({ "effort": req.thinking.as_str() });
            if req.include_thoughts {
                reasoning["summary"] = json!("auto");
            }
            body["reasoning"] = reasoning;
        }

        let url = format!("{}/v1/responses", self.base_url.trim_end_matches('/'));
        wire::run_stream(
            &self.client,
            &url,
            &req.credential,
            body,
            &req,
            &names,
            on_chunk,
            on_debug,
        )
        .await
    }
}
