// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Secondary provider adapter (cloud OAuth, function-call streaming).
//!
//! Speaks a different event schema than the primary family: conversation
//! turns are `contents` with `user`/`model` roles and typed `parts`
//! (`text`, `functionCall`, `functionResponse`); tool declarations ride in
//! the request config; the thinking level maps to a `thinkingConfig` budget
//! block. Thought parts stream with a `thought: true` flag.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use relay_config::{Provider, ThinkingLevel};

use crate::{
    adapter::{ChunkSink, DebugSink, ProviderAdapter},
    catalog, retry, ChatRole, DebugEvent, FunctionCallItem, OutputItem, RequestItem, StreamChunk,
    StreamError, ToolOutputBody, ToolOutputPart, TurnRequest, TurnResult,
};

const DEFAULT_BASE_URL: &str = "https://cloudmodels.nimbus.dev";

pub struct SecondaryAdapter {
    base_url: String,
    client: reqwest::Client,
}

impl SecondaryAdapter {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            client: reqwest::Client::new(),
        }
    }
}

impl Default for SecondaryAdapter {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Thinking budget (tokens) for each level.
fn thinking_budget(level: ThinkingLevel) -> u32 {
    match level {
        ThinkingLevel::Off => 0,
        ThinkingLevel::Minimal => 512,
        ThinkingLevel::Low => 1_024,
        ThinkingLevel::Medium => 8_192,
        ThinkingLevel::High => 24_576,
        ThinkingLevel::XHigh => 32_768,
    }
}

#[async_trait]
impl ProviderAdapter for SecondaryAdapter {
    fn provider(&self) -> Provider {
        Provider::Secondary
    }

    async fn stream(
        &self,
        req: TurnRequest,
        on_chunk: &ChunkSink,
        on_debug: &DebugSink,
    ) -> Result<TurnResult, StreamError> {
        if req.credential.trim().is_empty() {
            return Err(StreamError::MissingCredential(Provider::Secondary));
        }

        // Some models cap thinking levels; reject unsupported combinations
        // before any network I/O.
        if let Some(option) = catalog::find_model(&req.model) {
            if !catalog::allowed_thinking_levels(&option).contains(&req.thinking) {
                return Err(StreamError::UnsupportedThinking {
                    model: option.id,
                    level: req.thinking,
                });
            }
        }

        // Pre-round boundary: splice any steering messages into the input.
        let mut items: Vec<RequestItem> = req.input.clone();
        items.extend((req.drain_steering)().into_iter().map(RequestItem::Message));

        let body = build_request_body(&items, &req);
        let url = format!(
            "{}/v1/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            req.model
        );

        on_debug(DebugEvent {
            label: "request".into(),
            payload: json!({ "url": url, "model": req.model, "items": items.len() }),
        });

        let client = &self.client;
        let token = req.credential.as_str();
        let endpoint = url.as_str();
        let resp = retry::with_retry(&req.cancel, || {
            let body = body.clone();
            async move {
                let resp = client
                    .post(endpoint)
                    .bearer_auth(token)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| StreamError::upstream(None, e.to_string()))?;
                let status = resp.status();
                if !status.is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    return Err(StreamError::upstream(Some(status.as_u16()), text));
                }
                Ok(resp)
            }
        })
        .await?;

        let mut byte_stream = resp.bytes_stream();
        let mut line_buf = String::new();
        let mut streamed = String::new();
        let mut output_items: Vec<OutputItem> = Vec::new();
        let mut call_counter = 0usize;
        let mut result = TurnResult::default();

        'read: loop {
            let chunk = tokio::select! {
                biased;
                _ = req.cancel.cancelled() => return Err(StreamError::Aborted),
                chunk = byte_stream.next() => chunk,
            };
            let bytes = match chunk {
                Some(Ok(b)) => b,
                Some(Err(e)) => {
                    debug!(error = %e, "stream read error before terminal chunk");
                    break 'read;
                }
                None => break 'read,
            };

            line_buf.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(pos) = line_buf.find('\n') {
                let line = line_buf[..pos].trim_end_matches('\r').to_string();
                line_buf.drain(..=pos);
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                let Ok(v) = serde_json::from_str::<Value>(data.trim()) else {
                    continue;
                };

                let candidate = &v["candidates"][0];
                if let Some(parts) = candidate["content"]["parts"].as_array() {
                    for part in parts {
                        if let Some(text) = part["text"].as_str() {
                            if text.is_empty() {
                                continue;
                            }
                            if part["thought"].as_bool() == Some(true) {
                                on_chunk(StreamChunk::thought(text));
                            } else {
                                streamed.push_str(text);
                                on_chunk(StreamChunk::answer(text));
                            }
                        } else if part["functionCall"].is_object() {
                            call_counter += 1;
                            let fc = &part["functionCall"];
                            let call_id = fc["id"]
                                .as_str()
                                .map(|s| s.to_string())
                                .unwrap_or_else(|| format!("fc-{call_counter}"));
                            output_items.push(OutputItem::FunctionCall(FunctionCallItem {
                                call_id,
                                name: fc["name"].as_str().unwrap_or("").to_string(),
                                arguments: fc["args"].to_string(),
                                status: None,
                            }));
                        }
                    }
                }

                match candidate["finishReason"].as_str() {
                    Some("STOP") => {
                        result.completed = true;
                        result.status_token = Some("completed".into());
                    }
                    Some(other) if !other.is_empty() => {
                        result.status_token = Some("failed".into());
                        on_debug(DebugEvent {
                            label: "finish_reason".into(),
                            payload: json!({ "reason": other }),
                        });
                    }
                    _ => {}
                }
            }
        }

        // Function-call turns stop with STOP as well; a round that produced
        // calls is complete for replay purposes even without answer text.
        result.answer = streamed;
        result.output_items = output_items;
        Ok(result)
    }
}

/// Flatten the input item list into the provider's `contents` structure and
/// attach system instruction, tool declarations, and the thinking config.
fn build_request_body(items: &[RequestItem], req: &TurnRequest) -> Value {
    // functionResponse parts are matched to calls by function name, not by
    // the opaque call id, so map ids back to names first.
    let mut call_names: HashMap<String, String> = HashMap::new();
    for item in items {
        if let RequestItem::FunctionCall(fc) = item {
            call_names.insert(fc.call_id.clone(), fc.name.clone());
        }
    }

    let mut contents: Vec<Value> = Vec::new();
    for item in items {
        match item {
            RequestItem::Message(m) => {
                let role = match m.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "model",
                };
                let mut parts = Vec::new();
                if !m.text.is_empty() || m.images.is_empty() {
                    parts.push(json!({ "text": m.text }));
                }
                for img in &m.images {
                    if let Ok((mime, data)) = relay_image::parse_data_url(&img.data_url) {
                        parts.push(json!({
                            "inlineData": { "mimeType": mime, "data": data }
                        }));
                    }
                }
                contents.push(json!({ "role": role, "parts": parts }));
            }
            RequestItem::FunctionCall(fc) => {
                let args: Value = serde_json::from_str(&fc.arguments).unwrap_or(json!({}));
                contents.push(json!({
                    "role": "model",
                    "parts": [{ "functionCall": { "id": fc.call_id, "name": fc.name, "args": args } }]
                }));
            }
            RequestItem::FunctionCallOutput { call_id, output } => {
                let name = call_names
                    .get(call_id)
                    .map(|s| s.as_str())
                    .unwrap_or(call_id.as_str());
                contents.push(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": name,
                            "response": { "output": tool_output_value(output) }
                        }
                    }]
                }));
            }
        }
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": {
            "thinkingConfig": {
                "thinkingBudget": thinking_budget(req.thinking),
                "includeThoughts": req.include_thoughts,
            }
        }
    });
    if let Some(sys) = &req.system_instruction {
        body["systemInstruction"] = json!({ "parts": [{ "text": sys }] });
    }
    if !req.tools.is_empty() {
        let declarations: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
    }
    body
}

fn tool_output_value(body: &ToolOutputBody) -> Value {
    match body {
        ToolOutputBody::Text(t) => json!(t),
        ToolOutputBody::Json(v) => v.clone(),
        ToolOutputBody::Parts(parts) => {
            // Flatten parts to text; image parts are referenced by URL since
            // this wire format has no image slot in function responses.
            let text: Vec<String> = parts
                .iter()
                .map(|p| match p {
                    ToolOutputPart::InputText { text } => text.clone(),
                    ToolOutputPart::InputImage { image_url } => format!("[image: {image_url}]"),
                })
                .collect();
            json!(text.join("\n"))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::ChatMessage;

    fn request(items: Vec<RequestItem>, thinking: ThinkingLevel) -> TurnRequest {
        TurnRequest {
            credential: "tok".into(),
            model: "nimbus-flash".into(),
            input: items,
            thinking,
            include_thoughts: true,
            system_instruction: Some("be brief".into()),
            tools: Vec::new(),
            forced_router_provider: None,
            cancel: CancellationToken::new(),
            drain_steering: Arc::new(Vec::new),
        }
    }

    #[test]
    fn thinking_budgets_are_monotonic() {
        let budgets: Vec<u32> = ThinkingLevel::ALL.iter().map(|l| thinking_budget(*l)).collect();
        let mut sorted = budgets.clone();
        sorted.sort();
        assert_eq!(budgets, sorted);
        assert_eq!(thinking_budget(ThinkingLevel::Off), 0);
    }

    #[test]
    fn body_maps_roles_and_system_instruction() {
        let req = request(
            vec![
                RequestItem::Message(ChatMessage::user("hi")),
                RequestItem::Message(ChatMessage::assistant("hello")),
            ],
            ThinkingLevel::Low,
        );
        let body = build_request_body(&req.input, &req);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(
            body["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            1_024
        );
        assert_eq!(
            body["generationConfig"]["thinkingConfig"]["includeThoughts"],
            true
        );
    }

    #[test]
    fn function_response_uses_call_name_not_id() {
        let req = request(
            vec![
                RequestItem::FunctionCall(FunctionCallItem {
                    call_id: "opaque-7".into(),
                    name: "shell".into(),
                    arguments: r#"{"cmd":"pwd"}"#.into(),
                    status: None,
                }),
                RequestItem::FunctionCallOutput {
                    call_id: "opaque-7".into(),
                    output: ToolOutputBody::Text("/tmp".into()),
                },
            ],
            ThinkingLevel::Off,
        );
        let body = build_request_body(&req.input, &req);
        let call = &body["contents"][0]["parts"][0]["functionCall"];
        assert_eq!(call["name"], "shell");
        assert_eq!(call["args"]["cmd"], "pwd");
        let resp = &body["contents"][1]["parts"][0]["functionResponse"];
        assert_eq!(resp["name"], "shell");
        assert_eq!(resp["response"]["output"], "/tmp");
    }

    #[test]
    fn tool_declarations_ride_in_request_config() {
        let mut req = request(vec![RequestItem::Message(ChatMessage::user("x"))], ThinkingLevel::Off);
        req.tools = vec![crate::ToolDeclaration {
            name: "shell".into(),
            description: "run a command".into(),
            parameters: json!({ "type": "object" }),
        }];
        let body = build_request_body(&req.input, &req);
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["name"],
            "shell"
        );
    }

    #[test]
    fn json_tool_output_passes_through_unserialized() {
        assert_eq!(
            tool_output_value(&ToolOutputBody::Json(json!({"a": [1, 2]}))),
            json!({"a": [1, 2]})
        );
    }

    #[tokio::test]
    async fn unsupported_thinking_level_rejected_before_network() {
        let adapter = SecondaryAdapter::default();
        // nimbus-pro does not allow Off.
        let mut req = request(vec![RequestItem::Message(ChatMessage::user("x"))], ThinkingLevel::Off);
        req.model = "nimbus-pro".into();
        let on_chunk: ChunkSink = Arc::new(|_| {});
        let on_debug: DebugSink = Arc::new(|_| {});
        let err = adapter.stream(req, &on_chunk, &on_debug).await.unwrap_err();
        assert!(matches!(err, StreamError::UnsupportedThinking { .. }));
    }

    #[tokio::test]
    async fn missing_credential_rejected() {
        let adapter = SecondaryAdapter::default();
        let mut req = request(vec![], ThinkingLevel::Off);
        req.credential = "  ".into();
        let on_chunk: ChunkSink = Arc::new(|_| {});
        let on_debug: DebugSink = Arc::new(|_| {});
        let err = adapter.stream(req, &on_chunk, &on_debug).await.unwrap_err();
        assert!(matches!(err, StreamError::MissingCredential(Provider::Secondary)));
    }
}
