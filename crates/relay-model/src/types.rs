// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use relay_config::ThinkingLevel;
use relay_image::ChatImageAttachment;

// ─── Conversation messages ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One persisted conversation message. Tool exchanges never appear here;
/// they exist only inside a single turn's transport input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ChatImageAttachment>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn user_with_images(text: impl Into<String>, images: Vec<ChatImageAttachment>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
            images,
        }
    }
}

// ─── Request input items ──────────────────────────────────────────────────────

/// A function call item as emitted by a provider and replayed back to it.
///
/// `call_id`, `name`, and `arguments` are preserved verbatim across rounds;
/// `arguments` stays the exact JSON string the provider produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallItem {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// The body of a function-call output.
///
/// Tools may return a plain string, an arbitrary JSON value, or a mixed list
/// of text and image parts. Adapters serialize each to their own wire format
/// without inspecting the semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutputBody {
    Text(String),
    Parts(Vec<ToolOutputPart>),
    Json(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolOutputPart {
    InputText { text: String },
    InputImage { image_url: String },
}

/// One ordered item of a provider round's input.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestItem {
    Message(ChatMessage),
    FunctionCall(FunctionCallItem),
    FunctionCallOutput {
        call_id: String,
        output: ToolOutputBody,
    },
}

impl RequestItem {
    pub fn user(text: impl Into<String>) -> Self {
        RequestItem::Message(ChatMessage::user(text))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        RequestItem::Message(ChatMessage::assistant(text))
    }
}

// ─── Stream output ────────────────────────────────────────────────────────────

/// An item collected from a provider response.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputItem {
    Message { text: String },
    FunctionCall(FunctionCallItem),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Thought,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSegment {
    pub kind: SegmentKind,
    pub text: String,
}

/// One streamed update forwarded to the UI while a round is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub segments: Vec<StreamSegment>,
    pub thoughts: Vec<String>,
    pub answer_text: String,
}

impl StreamChunk {
    pub fn answer(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            segments: vec![StreamSegment {
                kind: SegmentKind::Answer,
                text: text.clone(),
            }],
            thoughts: Vec::new(),
            answer_text: text,
        }
    }

    pub fn thought(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            segments: vec![StreamSegment {
                kind: SegmentKind::Thought,
                text: text.clone(),
            }],
            thoughts: vec![text],
            answer_text: String::new(),
        }
    }
}

/// Debug trace record surfaced when debug forwarding is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugEvent {
    pub label: String,
    pub payload: serde_json::Value,
}

// ─── Adapter request/result ───────────────────────────────────────────────────

/// A tool declaration advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: serde_json::Value,
}

/// One round's request to a provider adapter.
#[derive(Clone)]
pub struct TurnRequest {
    /// Bearer/access token for the provider. Adapters reject empty tokens
    /// before any network I/O.
    pub credential: String,
    pub model: String,
    pub input: Vec<RequestItem>,
    pub thinking: ThinkingLevel,
    pub include_thoughts: bool,
    pub system_instruction: Option<String>,
    pub tools: Vec<ToolDeclaration>,
    /// Router only: force a specific sub-provider. `None` or `"any"` lets
    /// the aggregator route.
    pub forced_router_provider: Option<String>,
    pub cancel: CancellationToken,
    /// Invoked by the adapter exactly once per round at its pre-round
    /// boundary; returned messages become part of this round's input.
    pub drain_steering: crate::adapter::SteeringDrain,
}

impl std::fmt::Debug for TurnRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnRequest")
            .field("model", &self.model)
            .field("input_items", &self.input.len())
            .field("thinking", &self.thinking)
            .field("tools", &self.tools.len())
            .field("forced_router_provider", &self.forced_router_provider)
            .finish()
    }
}

/// The outcome of one streamed round.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TurnResult {
    /// Final answer text as reported by the response object (may lag behind
    /// or duplicate the streamed deltas; the turn engine reconciles).
    pub answer: String,
    pub output_items: Vec<OutputItem>,
    /// True only when the provider signaled terminal success. A premature
    /// stream closure leaves this false and forces another round.
    pub completed: bool,
    /// Provider status token, e.g. `completed`, `failed`, `cancelled`.
    pub status_token: Option<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
