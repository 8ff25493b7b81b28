// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Router aggregator adapter.
//!
//! Symmetric with the primary adapter on the wire, plus a routing block: a
//! forced sub-provider tag pins the aggregator's choice, while `"any"` (or
//! no tag) lets it route freely.

use async_trait::async_trait;
use serde_json::json;

use relay_config::{Provider, ThinkingLevel};

use crate::{
    adapter::{ChunkSink, DebugSink, ProviderAdapter},
    sanitize::ToolNameMap,
    wire, RequestItem, StreamError, TurnRequest, TurnResult,
};

const DEFAULT_BASE_URL: &str = "https://api.modelrouter.io";

pub struct RouterAdapter {
    base_url: String,
    client: reqwest::Client,
}

impl RouterAdapter {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            client: reqwest::Client::new(),
        }
    }
}

impl Default for RouterAdapter {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl ProviderAdapter for RouterAdapter {
    fn provider(&self) -> Provider {
        Provider::Router
    }

    async fn stream(
        &self,
        req: TurnRequest,
        on_chunk: &ChunkSink,
        on_debug: &DebugSink,
    ) -> Result<TurnResult, StreamError> {
        if req.credential.trim().is_empty() {
            return Err(StreamError::MissingCredential(Provider::Router));
        }

        let mut names = ToolNameMap::new();
        let tools = wire::build_tool_declarations(&req.tools, &mut names);

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
            body["reasoning"] = json!({ "effort": req.thinking.as_str() });
        }
        // "any" means auto-route; only a concrete tag pins the sub-provider.
        if let Some(tag) = req.forced_router_provider.as_deref() {
            if !tag.is_empty() && tag != "any" {
                body["provider"] = json!({ "order": [tag], "allow_fallbacks": false });
            }
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
