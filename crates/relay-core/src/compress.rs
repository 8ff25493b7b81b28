// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context-window compression.
//!
//! Token usage is estimated with a deterministic heuristic; when a session
//! approaches its model's window (or switches providers with history in
//! place) the head of the history is replaced by a single condensed
//! assistant message while a tail of recent messages is kept verbatim.
//! No model call is involved, so the result is fully reproducible.

use relay_config::Provider;
use relay_model::{ChatMessage, ChatRole};

/// Fixed per-message token overhead.
const MESSAGE_OVERHEAD_TOKENS: usize = 20;
/// Flat per-image token charge.
const IMAGE_TOKENS: usize = 850;
/// Per-entry clip length in the condensed rendering.
const ENTRY_CLIP_CHARS: usize = 240;
/// Entry count above which the middle of the prefix is elided.
const ELIDE_THRESHOLD: usize = 16;
/// Hard cap on the summary message text.
const SUMMARY_MAX_CHARS: usize = 3_600;

/// Why a compression pass ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressReason {
    Auto,
    Manual,
    ProviderSwitch { from: Provider, to: Provider },
}

impl CompressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressReason::Auto => "auto",
            CompressReason::Manual => "manual",
            CompressReason::ProviderSwitch { .. } => "provider_switch",
        }
    }
}

/// Before/after statistics reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionOutcome {
    pub before_tokens: usize,
    pub after_tokens: usize,
    pub summarized: usize,
    pub kept_recent: usize,
}

pub fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `overhead + ceil(len(collapsed)/4) + images * 850`
pub fn estimate_message_tokens(message: &ChatMessage) -> usize {
    let chars = collapse_ws(&message.text).len();
    MESSAGE_OVERHEAD_TOKENS + chars.div_ceil(4) + message.images.len() * IMAGE_TOKENS
}

pub fn estimate_history_tokens(history: &[ChatMessage]) -> usize {
    history.iter().map(estimate_message_tokens).sum()
}

/// How many recent messages survive verbatim: 8 normally, 4 on a provider
/// switch, and 1 for short histories where anything larger would leave
/// nothing to summarize (0 when a forced pass meets a single message).
fn keep_recent(reason: &CompressReason, history_len: usize) -> usize {
    let base = match reason {
        CompressReason::ProviderSwitch { .. } => 4,
        _ => 8,
    };
    if history_len > base {
        base
    } else if history_len > 1 {
        1
    } else {
        0
    }
}

fn render_entry(message: &ChatMessage) -> String {
    let role = match message.role {
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    };
    let mut text = collapse_ws(&message.text);
    if text.len() > ENTRY_CLIP_CHARS {
        let mut cut = ENTRY_CLIP_CHARS;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push('…');
    }
    if message.images.is_empty() {
        format!("{role}: {text}")
    } else {
        format!("{role}: {text} [images: {}]", message.images.len())
    }
}

/// Compress `history` in place: replace the prefix with one condensed
/// assistant summary, keep the recent tail verbatim.
pub fn compress_history(
    history: &mut Vec<ChatMessage>,
    reason: &CompressReason,
    model_id: &str,
    window: u32,
    auto_limit: u32,
) -> CompressionOutcome {
    let before_tokens = estimate_history_tokens(history);
    let keep = keep_recent(reason, history.len());
    let split = history.len() - keep;
    let prefix: Vec<ChatMessage> = history[..split].to_vec();
    let recent: Vec<ChatMessage> = history[split..].to_vec();

    let mut entries: Vec<String> = prefix.iter().map(render_entry).collect();
    if entries.len() > ELIDE_THRESHOLD {
        let head = entries.len() / 3;
        let tail = entries.len() / 3;
        let mut elided = entries[..head].to_vec();
        elided.push("...".to_string());
        elided.extend_from_slice(&entries[entries.len() - tail..]);
        entries = elided;
    }

    let mut text = format!(
        "[conversation compression] reason={} model={} window={} auto_limit={}\n\
         Condensed earlier conversation ({} message(s)):",
        reason.as_str(),
        model_id,
        window,
        auto_limit,
        prefix.len(),
    );
    for entry in &entries {
        text.push_str("\n- ");
        text.push_str(entry);
    }
    if text.len() > SUMMARY_MAX_CHARS {
        let mut cut = SUMMARY_MAX_CHARS;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }

    let summarized = prefix.len();
    let kept_recent = recent.len();
    history.clear();
    history.push(ChatMessage::assistant(text));
    history.extend(recent);

    CompressionOutcome {
        before_tokens,
        after_tokens: estimate_history_tokens(history),
        summarized,
        kept_recent,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
