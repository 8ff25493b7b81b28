// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use relay_config::Provider;
use relay_image::ChatImageAttachment;
use relay_model::{ChatMessage, ChatRole};
use relay_rollout::{RolloutMessage, RolloutWriter};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Ready,
    Pending,
    Interrupting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UiKind {
    User,
    Assistant,
    System,
}

/// One display row in the transcript. System rows are UI-only; they never
/// enter the persisted history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeUiMessage {
    pub id: u64,
    pub kind: UiKind,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ChatImageAttachment>,
}

/// A prompt waiting in the FIFO queue while a turn is in flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnQueueItem {
    pub id: Uuid,
    pub text: String,
    pub images: Vec<ChatImageAttachment>,
    pub enqueued_at: DateTime<Utc>,
}

/// The central per-conversation aggregate. Owned exclusively by the session
/// manager; everything else sees deep-copied snapshots.
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: SessionState,
    pub status_label: String,
    pub title: Option<String>,
    /// Canonical persisted conversation.
    pub history: Vec<ChatMessage>,
    pub ui_messages: Vec<RuntimeUiMessage>,
    next_ui_id: u64,
    pub queued_prompts: VecDeque<TurnQueueItem>,
    pub steering_queue: VecDeque<ChatMessage>,
    /// The provider the current history belongs to.
    pub conversation_provider: Option<Provider>,
    pub active_rollout: Option<RolloutWriter>,
    pub active_abort: Option<CancellationToken>,
}

impl Session {
    pub fn new(title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            state: SessionState::Ready,
            status_label: "ready".into(),
            title,
            history: Vec::new(),
            ui_messages: Vec::new(),
            next_ui_id: 1,
            queued_prompts: VecDeque::new(),
            steering_queue: VecDeque::new(),
            conversation_provider: None,
            active_rollout: None,
            active_abort: None,
        }
    }

    /// Append a display row and return a copy for event emission.
    pub fn push_ui(
        &mut self,
        kind: UiKind,
        text: impl Into<String>,
        images: Vec<ChatImageAttachment>,
    ) -> RuntimeUiMessage {
        let row = RuntimeUiMessage {
            id: self.next_ui_id,
            kind,
            text: text.into(),
            images,
        };
        self.next_ui_id += 1;
        self.updated_at = Utc::now();
        self.ui_messages.push(row.clone());
        row
    }

    /// Append to history and mirror the message into the active rollout.
    ///
    /// A rollout write failure drops the writer (the session continues
    /// rollout-less) and is returned so the caller can surface a notice.
    pub fn push_history(&mut self, message: ChatMessage) -> Option<String> {
        self.updated_at = Utc::now();
        let record = RolloutMessage {
            role: match message.role {
                ChatRole::User => "user".into(),
                ChatRole::Assistant => "assistant".into(),
            },
            text: message.text.clone(),
            images: message.images.len(),
            at: self.updated_at,
        };
        self.history.push(message);
        if let Some(writer) = self.active_rollout.as_mut() {
            if let Err(e) = writer.append(&record) {
                self.active_rollout = None;
                return Some(e.to_string());
            }
        }
        None
    }

    /// Defensive deep copy for readers.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            state: self.state,
            status_label: self.status_label.clone(),
            title: self.title.clone(),
            history: self.history.clone(),
            ui_messages: self.ui_messages.clone(),
            queued_prompts: self.queued_prompts.iter().cloned().collect(),
            steering_queued: self.steering_queue.len(),
            conversation_provider: self.conversation_provider,
        }
    }

    /// Reset conversation state: history, transcript, queues, rollout.
    /// Keeps the session id and returns it to `Ready`.
    pub fn clear(&mut self) {
        self.history.clear();
        self.ui_messages.clear();
        self.queued_prompts.clear();
        self.steering_queue.clear();
        self.conversation_provider = None;
        self.active_rollout = None;
        self.state = SessionState::Ready;
        self.status_label = "ready".into();
        self.updated_at = Utc::now();
    }
}

/// Read-only copy of a session handed to RPC callers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: SessionState,
    pub status_label: String,
    pub title: Option<String>,
    pub history: Vec<ChatMessage>,
    pub ui_messages: Vec<RuntimeUiMessage>,
    pub queued_prompts: Vec<TurnQueueItem>,
    pub steering_queued: usize,
    pub conversation_provider: Option<Provider>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
