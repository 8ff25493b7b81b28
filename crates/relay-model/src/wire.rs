// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Shared wire codec for the response-item protocol spoken by the primary
//! provider and the router aggregator.
//!
//! Requests carry an ordered `input` item list (messages, function calls,
//! function-call outputs); responses stream as SSE frames with a `type`
//! discriminator. Both adapters reuse this module and differ only in
//! endpoint, auth, and routing extras.

use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    adapter::{ChunkSink, DebugSink},
    retry,
    sanitize::ToolNameMap,
    ChatRole, DebugEvent, FunctionCallItem, OutputItem, RequestItem, StreamChunk, StreamError,
    ToolDeclaration, ToolOutputBody, ToolOutputPart, TurnRequest, TurnResult,
};

// ─── Request building ─────────────────────────────────────────────────────────

/// Serialize tool declarations, registering each name in the wire-name map.
pub(crate) fn build_tool_declarations(
    tools: &[ToolDeclaration],
    names: &mut ToolNameMap,
) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            let wire = names.insert(&t.name);
            json!({
                "type": "function",
                "name": wire,
                "description": t.description,
                "parameters": t.parameters,
            })
        })
        .collect()
}

/// Serialize the ordered input item list.
///
/// Messages without images collapse to a plain content string; messages with
/// images become a multipart array of one text part (when non-empty) plus one
/// image part per attachment.
pub(crate) fn build_input_items(items: &[RequestItem], names: &ToolNameMap) -> Vec<Value> {
    items
        .iter()
        .map(|item| match item {
            RequestItem::Message(m) => {
                let role = match m.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                };
                if m.images.is_empty() {
                    json!({ "type": "message", "role": role, "content": m.text })
                } else {
                    let mut content = Vec::new();
                    if !m.text.is_empty() {
                        content.push(json!({ "type": "input_text", "text": m.text }));
                    }
                    for img in &m.images {
                        content.push(json!({ "type": "input_image", "image_url": img.data_url }));
                    }
                    json!({ "type": "message", "role": role, "content": content })
                }
            }
            RequestItem::FunctionCall(fc) => {
                let wire = names.wire_name(&fc.name).unwrap_or(fc.name.as_str());
                json!({
                    "type": "function_call",
                    "call_id": fc.call_id,
                    "name": wire,
                    "arguments": fc.arguments,
                })
            }
            RequestItem::FunctionCallOutput { call_id, output } => json!({
                "type": "function_call_output",
                "call_id": call_id,
                "output": tool_output_to_wire(output),
            }),
        })
        .collect()
}

/// Convert a tool output body to the wire shape without inspecting it:
/// strings pass through, JSON values are serialized, part lists become the
/// provider's content array.
pub(crate) fn tool_output_to_wire(body: &ToolOutputBody) -> Value {
    match body {
        ToolOutputBody::Text(t) => json!(t),
        ToolOutputBody::Json(v) => json!(v.to_string()),
        ToolOutputBody::Parts(parts) => {
            let arr: Vec<Value> = parts
                .iter()
                .map(|p| match p {
                    ToolOutputPart::InputText { text } => {
                        json!({ "type": "input_text", "text": text })
                    }
                    ToolOutputPart::InputImage { image_url } => {
                        json!({ "type": "input_image", "image_url": image_url })
                    }
                })
                .collect();
            json!(arr)
        }
    }
}

// ─── Response parsing ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SseEvent {
    AnswerDelta(String),
    ThoughtDelta(String),
    Item(OutputItem),
    Completed(Value),
    Failed(String),
    Ignore,
}

pub(crate) fn parse_sse_event(v: &Value, names: &ToolNameMap) -> SseEvent {
    match v["type"].as_str().unwrap_or("") {
        "response.output_text.delta" => {
            SseEvent::AnswerDelta(v["delta"].as_str().unwrap_or("").to_string())
        }
        "response.reasoning_summary_text.delta" => {
            SseEvent::ThoughtDelta(v["delta"].as_str().unwrap_or("").to_string())
        }
        "response.output_item.done" => match parse_output_item(&v["item"], names) {
            Some(item) => SseEvent::Item(item),
            None => SseEvent::Ignore,
        },
        "response.completed" => SseEvent::Completed(v["response"].clone()),
        "response.failed" => {
            let message = v["response"]["error"]["message"]
                .as_str()
                .unwrap_or("response failed")
                .to_string();
            SseEvent::Failed(message)
        }
        _ => SseEvent::Ignore,
    }
}

/// Parse one output item: a `message` (answer text) or a `function_call`.
/// Function names are mapped back to their runtime names.
pub(crate) fn parse_output_item(item: &Value, names: &ToolNameMap) -> Option<OutputItem> {
    match item["type"].as_str().unwrap_or("") {
        "message" => Some(OutputItem::Message {
            text: message_item_text(item),
        }),
        "function_call" => {
            let call_id = item["call_id"]
                .as_str()
                .or_else(|| item["id"].as_str())
                .unwrap_or("")
                .to_string();
            let name = names
                .runtime_name(item["name"].as_str().unwrap_or(""))
                .to_string();
            Some(OutputItem::FunctionCall(FunctionCallItem {
                call_id,
                name,
                arguments: item["arguments"].as_str().unwrap_or("").to_string(),
                status: item["status"].as_str().map(|s| s.to_string()),
            }))
        }
        _ => None,
    }
}

fn message_item_text(item: &Value) -> String {
    item["content"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p["type"].as_str() == Some("output_text"))
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_else(|| item["content"].as_str().unwrap_or("").to_string())
}

/// Final answer text from a terminal response object: the concatenation of
/// all `output_text` parts across `message` output items.
pub(crate) fn extract_answer_text(response: &Value) -> String {
    response["output"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|i| i["type"].as_str() == Some("message"))
                .map(message_item_text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

// ─── Stream driver ────────────────────────────────────────────────────────────

/// Issue the request (with transient retries) and drive the SSE stream to a
/// [`TurnResult`]. Cancellation is honored at every await point.
pub(crate) async fn run_stream(
    client: &reqwest::Client,
    url: &str,
    bearer: &str,
    body: Value,
    req: &TurnRequest,
    names: &ToolNameMap,
    on_chunk: &ChunkSink,
    on_debug: &DebugSink,
) -> Result<TurnResult, StreamError> {
    on_debug(DebugEvent {
        label: "request".into(),
        payload: json!({ "url": url, "model": req.model, "items": req.input.len() }),
    });

    let resp = retry::with_retry(&req.cancel, || {
        let body = body.clone();
        async move {
            let resp = client
                .post(url)
                .bearer_auth(bearer)
                .header("accept", "text/event-stream")
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
                // A broken stream is a premature closure: return what we have
                // and let the caller issue another round.
                debug!(error = %e, "stream read error before terminal event");
                break 'read;
            }
            None => break 'read,
        };

        // SSE frames can split across TCP chunks; only complete lines are
        // parsed and the remainder carries over.
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
            match parse_sse_event(&v, names) {
                SseEvent::AnswerDelta(delta) if !delta.is_empty() => {
                    streamed.push_str(&delta);
                    on_chunk(StreamChunk::answer(delta));
                }
                SseEvent::ThoughtDelta(delta) if !delta.is_empty() => {
                    on_chunk(StreamChunk::thought(delta));
                }
                SseEvent::Item(item) => output_items.push(item),
                SseEvent::Completed(response) => {
                    result.completed = true;
                    result.status_token = Some(
                        response["status"].as_str().unwrap_or("completed").to_string(),
                    );
                    let final_text = extract_answer_text(&response);
                    result.answer = if final_text.is_empty() {
                        streamed.clone()
                    } else {
                        final_text
                    };
                    break 'read;
                }
                SseEvent::Failed(message) => {
                    on_debug(DebugEvent {
                        label: "response.failed".into(),
                        payload: json!({ "message": message }),
                    });
                    result.status_token = Some("failed".into());
                    break 'read;
                }
                _ => {}
            }
        }
    }

    if !result.completed && result.status_token.is_none() {
        // Premature closure: surface the partial answer so the caller can
        // re-issue the round with accumulated input.
        result.answer = streamed;
    }
    result.output_items = output_items;
    Ok(result)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;
    use relay_image::ChatImageAttachment;

    fn no_names() -> ToolNameMap {
        ToolNameMap::new()
    }

    #[test]
    fn plain_message_serializes_to_string_content() {
        let items = vec![RequestItem::Message(ChatMessage::user("hello"))];
        let wire = build_input_items(&items, &no_names());
        assert_eq!(wire[0]["type"], "message");
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[0]["content"], "hello");
    }

    #[test]
    fn message_with_images_serializes_to_multipart() {
        let img = ChatImageAttachment {
            path: "a.png".into(),
            mime_type: "image/png".into(),
            data_url: "data:image/png;base64,AA==".into(),
            byte_size: 2,
        };
        let items = vec![RequestItem::Message(ChatMessage::user_with_images(
            "look",
            vec![img],
        ))];
        let wire = build_input_items(&items, &no_names());
        let content = wire[0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "input_text");
        assert_eq!(content[1]["type"], "input_image");
        assert_eq!(content[1]["image_url"], "data:image/png;base64,AA==");
    }

    #[test]
    fn message_with_images_and_empty_text_omits_text_part() {
        let img = ChatImageAttachment {
            path: "a.png".into(),
            mime_type: "image/png".into(),
            data_url: "data:image/png;base64,AA==".into(),
            byte_size: 2,
        };
        let items = vec![RequestItem::Message(ChatMessage::user_with_images(
            "",
            vec![img],
        ))];
        let wire = build_input_items(&items, &no_names());
        assert_eq!(wire[0]["content"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn function_call_round_trip_uses_wire_names() {
        let mut names = ToolNameMap::new();
        names.insert("web.search");
        let items = vec![RequestItem::FunctionCall(FunctionCallItem {
            call_id: "c1".into(),
            name: "web.search".into(),
            arguments: r#"{"q":"x"}"#.into(),
            status: None,
        })];
        let wire = build_input_items(&items, &names);
        assert_eq!(wire[0]["name"], "web_search");
        assert_eq!(wire[0]["arguments"], r#"{"q":"x"}"#);
    }

    #[test]
    fn tool_output_bodies_serialize_without_inspection() {
        assert_eq!(tool_output_to_wire(&ToolOutputBody::Text("out".into())), json!("out"));
        assert_eq!(
            tool_output_to_wire(&ToolOutputBody::Json(json!({"k": 1}))),
            json!("{\"k\":1}")
        );
        let parts = ToolOutputBody::Parts(vec![ToolOutputPart::InputText { text: "t".into() }]);
        assert_eq!(
            tool_output_to_wire(&parts),
            json!([{ "type": "input_text", "text": "t" }])
        );
    }

    #[test]
    fn tool_declarations_register_wire_names() {
        let mut names = ToolNameMap::new();
        let decls = vec![ToolDeclaration {
            name: "web.search".into(),
            description: "search the web".into(),
            parameters: json!({ "type": "object" }),
        }];
        let wire = build_tool_declarations(&decls, &mut names);
        assert_eq!(wire[0]["name"], "web_search");
        assert_eq!(names.runtime_name("web_search"), "web.search");
    }

    // ── SSE event parsing ─────────────────────────────────────────────────────

    #[test]
    fn answer_delta_parsed() {
        let v = json!({ "type": "response.output_text.delta", "delta": "hi" });
        assert_eq!(parse_sse_event(&v, &no_names()), SseEvent::AnswerDelta("hi".into()));
    }

    #[test]
    fn thought_delta_parsed() {
        let v = json!({ "type": "response.reasoning_summary_text.delta", "delta": "mull" });
        assert_eq!(parse_sse_event(&v, &no_names()), SseEvent::ThoughtDelta("mull".into()));
    }

    #[test]
    fn function_call_item_parsed_with_runtime_name() {
        let mut names = ToolNameMap::new();
        names.insert("web.search");
        let v = json!({
            "type": "response.output_item.done",
            "item": {
                "type": "function_call",
                "call_id": "fc_1",
                "name": "web_search",
                "arguments": "{\"q\":\"rust\"}",
                "status": "completed"
            }
        });
        match parse_sse_event(&v, &names) {
            SseEvent::Item(OutputItem::FunctionCall(fc)) => {
                assert_eq!(fc.call_id, "fc_1");
                assert_eq!(fc.name, "web.search");
                assert_eq!(fc.arguments, "{\"q\":\"rust\"}");
                assert_eq!(fc.status.as_deref(), Some("completed"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn message_item_parsed_to_text() {
        let v = json!({
            "type": "response.output_item.done",
            "item": {
                "type": "message",
                "content": [
                    { "type": "output_text", "text": "part one " },
                    { "type": "output_text", "text": "part two" }
                ]
            }
        });
        match parse_sse_event(&v, &no_names()) {
            SseEvent::Item(OutputItem::Message { text }) => {
                assert_eq!(text, "part one part two");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn completed_event_carries_response() {
        let v = json!({
            "type": "response.completed",
            "response": { "status": "completed", "output": [] }
        });
        assert!(matches!(parse_sse_event(&v, &no_names()), SseEvent::Completed(_)));
    }

    #[test]
    fn failed_event_carries_message() {
        let v = json!({
            "type": "response.failed",
            "response": { "error": { "message": "quota exceeded" } }
        });
        assert_eq!(
            parse_sse_event(&v, &no_names()),
            SseEvent::Failed("quota exceeded".into())
        );
    }

    #[test]
    fn unknown_events_ignored() {
        let v = json!({ "type": "response.in_progress" });
        assert_eq!(parse_sse_event(&v, &no_names()), SseEvent::Ignore);
    }

    #[test]
    fn extract_answer_concatenates_message_items() {
        let response = json!({
            "output": [
                { "type": "reasoning", "summary": [] },
                { "type": "message", "content": [{ "type": "output_text", "text": "hello " }] },
                { "type": "message", "content": [{ "type": "output_text", "text": "world" }] }
            ]
        });
        assert_eq!(extract_answer_text(&response), "hello world");
    }

    #[test]
    fn extract_answer_empty_when_no_output() {
        assert_eq!(extract_answer_text(&json!({})), "");
    }
}
