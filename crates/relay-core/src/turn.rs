// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The turn engine.
//!
//! One turn is a bounded interleaving of "stream from the provider" and
//! "execute tool calls", repeated until the model produces a terminal
//! assistant message. The engine owns duplicate-call filtering, tool-output
//! replay ordering, streaming reconciliation, steering merge, abort
//! recovery, and best-effort rollout persistence.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use relay_image::ChatImageAttachment;
use relay_model::{
    auto_compact_limit, context_window_tokens, find_model, ChatMessage, ChunkSink, DebugSink,
    FunctionCallItem, OutputItem, RequestItem, StreamChunk, ToolDeclaration, ToolOutputBody,
    ToolOutputPart, TurnRequest,
};
use relay_tools::{ExecContext, ToolInvocation, ToolOutputPayload, ToolPart, ToolResult};

use crate::compress::{compress_history, estimate_history_tokens, CompressReason};
use crate::events::RuntimeEvent;
use crate::manager::finalize_turn;
use crate::runtime::{Runtime, SharedSession};
use crate::session::UiKind;

/// Attachment inputs for one turn: raw strings from a direct send, or
/// already-normalized attachments from the prompt queue.
pub(crate) enum TurnImages {
    Raw(Vec<String>),
    Loaded(Vec<ChatImageAttachment>),
}

/// Run one turn to completion (or abort), then restore the session to
/// `Ready` and auto-advance the prompt queue.
///
/// Returns a boxed future so the auto-advance path can respawn the engine
/// without a recursive future type.
pub(crate) fn run_turn(
    rt: Arc<Runtime>,
    session: SharedSession,
    turn_id: Uuid,
    text: String,
    images: TurnImages,
    cancel: CancellationToken,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let session_id = session.lock().unwrap().id;
        drive_turn(&rt, &session, session_id, turn_id, text, images, &cancel).await;
        finalize_turn(&rt, &session);
    })
}

#[allow(clippy::too_many_arguments)]
async fn drive_turn(
    rt: &Arc<Runtime>,
    session: &SharedSession,
    session_id: Uuid,
    turn_id: Uuid,
    text: String,
    images: TurnImages,
    cancel: &CancellationToken,
) {
    // ── Attachments ──────────────────────────────────────────────────────────
    let attachments = match images {
        TurnImages::Loaded(v) => v,
        TurnImages::Raw(raw) => match relay_image::load_attachments(&raw) {
            Ok(v) => v,
            Err(e) => {
                report_failure(rt, session, session_id, format!("image load failed: {e}"));
                return;
            }
        },
    };

    // ── Selection and availability ───────────────────────────────────────────
    let (option, thinking, router_tag, enabled) = {
        let sel = rt.selection.lock().unwrap();
        let Some(model_id) = sel.selected_model.clone() else {
            drop(sel);
            report_failure(rt, session, session_id, "no model selected".to_string());
            return;
        };
        let Some(option) = find_model(&model_id) else {
            drop(sel);
            report_failure(rt, session, session_id, format!("unknown model: {model_id}"));
            return;
        };
        let allowed = relay_model::allowed_thinking_levels(&option);
        let thinking = sel
            .selected_thinking
            .filter(|l| allowed.contains(l))
            .unwrap_or(option.default_thinking_level);
        let enabled = sel.is_enabled(option.provider);
        (option, thinking, sel.router_provider.clone(), enabled)
    };
    let provider = option.provider;
    if !enabled {
        report_failure(
            rt,
            session,
            session_id,
            format!("provider '{provider}' is not enabled"),
        );
        return;
    }
    let Some(adapter) = rt.adapter_for(provider) else {
        report_failure(
            rt,
            session,
            session_id,
            format!("no adapter for provider '{provider}'"),
        );
        return;
    };
    let Some(credential) = rt.credential_for(provider) else {
        report_failure(
            rt,
            session,
            session_id,
            format!("missing credential for provider '{provider}'"),
        );
        return;
    };

    // ── Compression triggers ─────────────────────────────────────────────────
    let window = context_window_tokens(&option);
    let limit = auto_compact_limit(window);
    {
        let mut s = session.lock().unwrap();
        let switch_from = s
            .conversation_provider
            .filter(|p| *p != provider && !s.history.is_empty());
        if let Some(from) = switch_from {
            let outcome = compress_history(
                &mut s.history,
                &CompressReason::ProviderSwitch { from, to: provider },
                &option.id,
                window,
                limit,
            );
            s.active_rollout = None;
            let row = s.push_ui(
                UiKind::System,
                format!(
                    "provider switched: {from} -> {provider}. context compressed ({} -> {} tokens)",
                    outcome.before_tokens, outcome.after_tokens
                ),
                vec![],
            );
            rt.events.emit(RuntimeEvent::MessageAppended {
                session_id,
                message: row,
            });
        } else if estimate_history_tokens(&s.history) >= limit as usize {
            let outcome = compress_history(
                &mut s.history,
                &CompressReason::Auto,
                &option.id,
                window,
                limit,
            );
            let row = s.push_ui(
                UiKind::System,
                format!(
                    "context compressed ({} -> {} tokens)",
                    outcome.before_tokens, outcome.after_tokens
                ),
                vec![],
            );
            rt.events.emit(RuntimeEvent::MessageAppended {
                session_id,
                message: row,
            });
        }
        s.conversation_provider = Some(provider);
    }

    // ── Rollout (best-effort) ────────────────────────────────────────────────
    {
        let mut s = session.lock().unwrap();
        if s.active_rollout.is_none() {
            match rt.rollouts.create(session_id) {
                Ok(writer) => s.active_rollout = Some(writer),
                Err(e) => {
                    warn!(session = %session_id, error = %e, "rollout creation failed");
                    let row = s.push_ui(
                        UiKind::System,
                        format!("rollout unavailable: {e}"),
                        vec![],
                    );
                    rt.events.emit(RuntimeEvent::MessageAppended {
                        session_id,
                        message: row,
                    });
                }
            }
        }
    }

    // ── User message ─────────────────────────────────────────────────────────
    let user_text = append_missing_image_placeholders(&text, attachments.len());
    let mut input: Vec<RequestItem> = {
        let mut s = session.lock().unwrap();
        let message = ChatMessage::user_with_images(user_text, attachments);
        push_history_reporting(rt, &mut s, session_id, message.clone());
        let row = s.push_ui(UiKind::User, message.text.clone(), message.images.clone());
        rt.events.emit(RuntimeEvent::MessageAppended {
            session_id,
            message: row,
        });
        s.history.iter().cloned().map(RequestItem::Message).collect()
    };

    // ── Shared round state ───────────────────────────────────────────────────
    let tools: Vec<ToolDeclaration> = rt
        .tools
        .registry()
        .declarations()
        .into_iter()
        .map(|d| ToolDeclaration {
            name: d.name,
            description: d.description,
            parameters: d.parameters,
        })
        .collect();

    // Steering drained by the adapter lands in history/UI immediately and is
    // mirrored here so later rounds include it in the request input.
    let drained_log: Arc<Mutex<Vec<ChatMessage>>> = Arc::new(Mutex::new(Vec::new()));
    let drain = {
        let session = session.clone();
        let events = rt.events.clone();
        let log = Arc::clone(&drained_log);
        Arc::new(move || {
            let mut s = session.lock().unwrap();
            let mut out = Vec::new();
            while let Some(m) = s.steering_queue.pop_front() {
                if let Some(err) = s.push_history(m.clone()) {
                    let row = s.push_ui(
                        UiKind::System,
                        format!("rollout write failed: {err}"),
                        vec![],
                    );
                    events.emit(RuntimeEvent::MessageAppended {
                        session_id: s.id,
                        message: row,
                    });
                }
                let row = s.push_ui(UiKind::User, m.text.clone(), vec![]);
                events.emit(RuntimeEvent::MessageAppended {
                    session_id: s.id,
                    message: row,
                });
                out.push(m);
            }
            log.lock().unwrap().extend(out.iter().cloned());
            out
        })
    };

    let streamed_round: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
    let on_chunk: ChunkSink = {
        let events = rt.events.clone();
        let cancel = cancel.clone();
        let streamed = Arc::clone(&streamed_round);
        Arc::new(move |chunk: StreamChunk| {
            // After abort fires, no further chunks are forwarded.
            if cancel.is_cancelled() {
                return;
            }
            if !chunk.answer_text.is_empty() {
                streamed.lock().unwrap().push_str(&chunk.answer_text);
            }
            events.emit(RuntimeEvent::StreamChunk {
                session_id,
                turn_id,
                chunk,
            });
        })
    };
    let on_debug: DebugSink = {
        let events = rt.events.clone();
        let rt = Arc::clone(rt);
        Arc::new(move |ev: relay_model::DebugEvent| {
            if rt.debug_enabled.load(Ordering::Relaxed) {
                events.emit(RuntimeEvent::Debug {
                    session_id,
                    label: ev.label,
                    payload: ev.payload,
                });
            }
        })
    };

    // ── Round loop ───────────────────────────────────────────────────────────
    // Accumulated streamed answer text across all rounds, for abort recovery.
    let mut partial_accum = String::new();

    loop {
        streamed_round.lock().unwrap().clear();
        let request = TurnRequest {
            credential: credential.clone(),
            model: option.id.clone(),
            input: input.clone(),
            thinking,
            include_thoughts: true,
            system_instruction: None,
            tools: tools.clone(),
            forced_router_provider: (provider == relay_config::Provider::Router)
                .then(|| router_tag.clone()),
            cancel: cancel.clone(),
            drain_steering: drain.clone(),
        };

        let result = adapter.stream(request, &on_chunk, &on_debug).await;

        // Merge steering drained this round into the accumulated input so the
        // next round's request reproduces it.
        {
            let mut log = drained_log.lock().unwrap();
            for m in log.drain(..) {
                input.push(RequestItem::Message(m));
            }
        }
        let streamed = streamed_round.lock().unwrap().clone();
        partial_accum.push_str(&streamed);

        let result = match result {
            Err(e) if e.is_abort() => {
                handle_abort(rt, session, session_id, turn_id, &partial_accum);
                return;
            }
            Err(e) => {
                report_failure(rt, session, session_id, e.to_string());
                return;
            }
            Ok(r) => r,
        };

        let calls = select_actionable_function_calls(&result.output_items);
        if !calls.is_empty() {
            // Replay this round's items, then execute calls in emitted order,
            // appending each output behind the replayed calls.
            input.extend(build_followup_items(&result.output_items, &calls));
            for call in &calls {
                if cancel.is_cancelled() {
                    handle_abort(rt, session, session_id, turn_id, &partial_accum);
                    return;
                }
                rt.events.emit(RuntimeEvent::ToolCallStarted {
                    session_id,
                    turn_id,
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });
                let invocation = ToolInvocation {
                    id: call.call_id.clone(),
                    name: call.name.clone(),
                    input: serde_json::from_str(&call.arguments).unwrap_or(json!({})),
                };
                let outcome = rt
                    .tools
                    .execute(&invocation, &ExecContext::new(cancel.clone()))
                    .await;
                if cancel.is_cancelled() {
                    handle_abort(rt, session, session_id, turn_id, &partial_accum);
                    return;
                }
                let summary = tool_output_text(&outcome);
                rt.events.emit(RuntimeEvent::ToolCallCompleted {
                    session_id,
                    turn_id,
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    ok: outcome.ok,
                    output: summary.clone(),
                });
                {
                    let mut s = session.lock().unwrap();
                    let marker = if outcome.ok { "" } else { " (error)" };
                    let row = s.push_ui(
                        UiKind::System,
                        format!("tool {}{}: {}", call.name, marker, clip(&summary, 200)),
                        vec![],
                    );
                    rt.events.emit(RuntimeEvent::MessageAppended {
                        session_id,
                        message: row,
                    });
                }
                input.push(RequestItem::FunctionCallOutput {
                    call_id: call.call_id.clone(),
                    output: tool_result_body(outcome),
                });
            }
            rt.events.emit(RuntimeEvent::ToolResults {
                session_id,
                turn_id,
                count: calls.len(),
            });
            continue;
        }

        if let Some(status) = result
            .status_token
            .as_deref()
            .filter(|s| *s == "failed" || *s == "cancelled")
        {
            report_failure(
                rt,
                session,
                session_id,
                format!("provider reported status '{status}'"),
            );
            return;
        }

        if !result.completed {
            // The stream closed before a terminal signal: re-issue the round
            // with the accumulated input.
            debug!(session = %session_id, "premature stream closure; re-issuing round");
            continue;
        }

        // ── Terminal round: reconcile streamed prefix with the final text ────
        let delta = compute_unstreamed_answer_delta(&result.answer, &streamed);
        let round_text = if result.answer.starts_with(&streamed) {
            if !delta.is_empty() {
                // Emit the missing suffix so the UI sees the complete answer.
                rt.events.emit(RuntimeEvent::StreamChunk {
                    session_id,
                    turn_id,
                    chunk: StreamChunk::answer(delta),
                });
            }
            result.answer.clone()
        } else {
            // Not an extension: the streamed prefix wins to avoid duplication.
            streamed.clone()
        };
        let final_text = {
            let prefix_len = partial_accum.len() - streamed.len();
            let mut t = partial_accum[..prefix_len].to_string();
            t.push_str(&round_text);
            t
        };

        {
            let mut s = session.lock().unwrap();
            push_history_reporting(rt, &mut s, session_id, ChatMessage::assistant(&final_text));
            let row = s.push_ui(UiKind::Assistant, final_text.clone(), vec![]);
            rt.events.emit(RuntimeEvent::MessageAppended {
                session_id,
                message: row,
            });
        }
        rt.events.emit(RuntimeEvent::Completed {
            session_id,
            turn_id,
            answer_length: final_text.len(),
        });
        return;
    }
}

// ─── Failure / abort paths ────────────────────────────────────────────────────

fn report_failure(rt: &Arc<Runtime>, session: &SharedSession, session_id: Uuid, message: String) {
    warn!(session = %session_id, "turn failed: {message}");
    {
        let mut s = session.lock().unwrap();
        let row = s.push_ui(UiKind::System, format!("error: {message}"), vec![]);
        rt.events.emit(RuntimeEvent::MessageAppended {
            session_id,
            message: row,
        });
    }
    rt.events.emit(RuntimeEvent::SessionError {
        session_id: Some(session_id),
        message,
    });
}

fn handle_abort(
    rt: &Arc<Runtime>,
    session: &SharedSession,
    session_id: Uuid,
    turn_id: Uuid,
    partial: &str,
) {
    let mut s = session.lock().unwrap();
    if !partial.is_empty() {
        push_history_reporting(rt, &mut s, session_id, ChatMessage::assistant(partial));
        let row = s.push_ui(UiKind::Assistant, partial.to_string(), vec![]);
        rt.events.emit(RuntimeEvent::MessageAppended {
            session_id,
            message: row,
        });
    }
    let row = s.push_ui(UiKind::System, "response interrupted", vec![]);
    rt.events.emit(RuntimeEvent::MessageAppended {
        session_id,
        message: row,
    });
    drop(s);
    rt.events.emit(RuntimeEvent::Interrupted {
        session_id,
        turn_id,
        partial_output: !partial.is_empty(),
    });
}

/// History append that surfaces a rollout write failure as a system row.
fn push_history_reporting(
    rt: &Arc<Runtime>,
    s: &mut crate::session::Session,
    session_id: Uuid,
    message: ChatMessage,
) {
    if let Some(err) = s.push_history(message) {
        let row = s.push_ui(UiKind::System, format!("rollout write failed: {err}"), vec![]);
        rt.events.emit(RuntimeEvent::MessageAppended {
            session_id,
            message: row,
        });
    }
}

// ─── Tool output mapping ──────────────────────────────────────────────────────

fn tool_result_body(result: ToolResult) -> ToolOutputBody {
    match result.output {
        ToolOutputPayload::Text(t) => ToolOutputBody::Text(t),
        ToolOutputPayload::Json(v) => ToolOutputBody::Json(v),
        ToolOutputPayload::Parts(parts) => ToolOutputBody::Parts(
            parts
                .into_iter()
                .map(|p| match p {
                    ToolPart::Text(text) => ToolOutputPart::InputText { text },
                    ToolPart::Image(image_url) => ToolOutputPart::InputImage { image_url },
                })
                .collect(),
        ),
    }
}

fn tool_output_text(result: &ToolResult) -> String {
    match &result.output {
        ToolOutputPayload::Text(t) => t.clone(),
        ToolOutputPayload::Json(v) => v.to_string(),
        ToolOutputPayload::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ToolPart::Text(t) => t.clone(),
                ToolPart::Image(_) => "[image]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}

// ─── Pure helpers ─────────────────────────────────────────────────────────────

/// Append `[Image N]` tokens (1-indexed) for any attachment the text does
/// not already reference. Idempotent.
pub fn append_missing_image_placeholders(text: &str, image_count: usize) -> String {
    let mut out = text.to_string();
    for i in 1..=image_count {
        let token = format!("[Image {i}]");
        if !out.contains(&token) {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&token);
        }
    }
    out
}

/// Filter a round's output items down to executable function calls:
/// deduplicate by `call_id` (falling back to `name:args` for empty ids) and
/// drop calls already marked `failed`, `cancelled`, or `in_progress`.
pub fn select_actionable_function_calls(items: &[OutputItem]) -> Vec<FunctionCallItem> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let OutputItem::FunctionCall(fc) = item else {
            continue;
        };
        if matches!(
            fc.status.as_deref(),
            Some("failed") | Some("cancelled") | Some("in_progress")
        ) {
            continue;
        }
        let key = if fc.call_id.is_empty() {
            format!("{}:{}", fc.name, fc.arguments)
        } else {
            fc.call_id.clone()
        };
        if seen.insert(key) {
            out.push(fc.clone());
        }
    }
    out
}

/// Follow-up items for a tool round: the round's assistant messages and the
/// selected function calls in emitted order, then any selected calls that
/// never appeared among the output items.
pub fn build_followup_items(
    output_items: &[OutputItem],
    selected: &[FunctionCallItem],
) -> Vec<RequestItem> {
    let selected_ids: HashSet<String> = selected.iter().map(|c| c.call_id.clone()).collect();
    let mut replayed: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for item in output_items {
        match item {
            OutputItem::Message { text } if !text.is_empty() => {
                out.push(RequestItem::assistant(text.clone()));
            }
            OutputItem::Message { .. } => {}
            OutputItem::FunctionCall(fc) => {
                if selected_ids.contains(&fc.call_id) && replayed.insert(fc.call_id.clone()) {
                    out.push(RequestItem::FunctionCall(fc.clone()));
                }
            }
        }
    }
    for call in selected {
        if !replayed.contains(&call.call_id) {
            out.push(RequestItem::FunctionCall(call.clone()));
        }
    }
    out
}

/// The portion of the terminal answer that was never streamed: when
/// `streamed` is a prefix of `answer`, the remaining suffix; otherwise
/// empty (the streamed prefix wins).
pub fn compute_unstreamed_answer_delta<'a>(answer: &'a str, streamed: &str) -> &'a str {
    if answer.starts_with(streamed) {
        &answer[streamed.len()..]
    } else {
        ""
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
