// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Session manager: the session map and its state machine.
//!
//! ```text
//!             send (not enqueue)                    turn done / aborted
//!   Ready ─────────────────────────▶ Pending ─────────────────────────▶ Ready
//!     ▲                                │
//!     │                interrupt       ▼
//!     └────── turn settles ◀── Interrupting
//! ```
//!
//! At most one turn is in flight per session; queued prompts drain strictly
//! FIFO through the auto-advance path in [`finalize_turn`].

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use relay_model::ChatMessage;

use crate::error::CoreError;
use crate::events::RuntimeEvent;
use crate::runtime::{Runtime, SharedSession};
use crate::session::{Session, SessionSnapshot, SessionState, TurnQueueItem, UiKind};
use crate::turn::{run_turn, TurnImages};

/// Parameters for `session.send`.
#[derive(Debug, Clone, Default)]
pub struct SendParams {
    pub session_id: Uuid,
    pub text: String,
    /// Raw image inputs: paths or data URLs.
    pub images: Vec<String>,
    pub enqueue: bool,
}

/// Result of `session.send`.
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub turn_id: Uuid,
    pub accepted: bool,
    pub queued: bool,
}

impl Runtime {
    pub fn create_session(&self, title: Option<String>) -> (Uuid, SessionState) {
        let session = Session::new(title);
        let id = session.id;
        self.sessions
            .lock()
            .unwrap()
            .insert(id, Arc::new(std::sync::Mutex::new(session)));
        self.events.emit(RuntimeEvent::StateChanged {
            reason: "session_created".into(),
        });
        debug!(session = %id, "session created");
        (id, SessionState::Ready)
    }

    pub(crate) fn session(&self, id: Uuid) -> Result<SharedSession, CoreError> {
        self.sessions
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownSession(id.to_string()))
    }

    pub fn session_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.sessions.lock().unwrap().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn get_session(&self, id: Uuid) -> Result<SessionSnapshot, CoreError> {
        Ok(self.session(id)?.lock().unwrap().snapshot())
    }

    /// Submit a prompt. While a turn is in flight the prompt is either
    /// queued (`enqueue = true`) or rejected as busy.
    pub fn send(self: &Arc<Self>, params: SendParams) -> Result<SendOutcome, CoreError> {
        if params.text.trim().is_empty() && params.images.is_empty() {
            return Err(CoreError::invalid_params(
                "text",
                "text and images must not both be empty",
            ));
        }
        let session = self.session(params.session_id)?;
        let turn_id = Uuid::new_v4();

        let spawn: Option<CancellationToken> = {
            let mut s = session.lock().unwrap();
            match s.state {
                SessionState::Pending | SessionState::Interrupting if !params.enqueue => {
                    return Err(CoreError::Busy);
                }
                SessionState::Pending | SessionState::Interrupting => {
                    // Queued prompts are normalized eagerly so a bad image is
                    // reported to the caller, not discovered mid-queue.
                    let images = relay_image::load_attachments(&params.images)
                        .map_err(|e| CoreError::invalid_params("images", e.to_string()))?;
                    s.queued_prompts.push_back(TurnQueueItem {
                        id: turn_id,
                        text: params.text.clone(),
                        images,
                        enqueued_at: Utc::now(),
                    });
                    let label = format!("queued ({})", s.queued_prompts.len());
                    s.status_label = label.clone();
                    self.events.emit(RuntimeEvent::SessionStatus {
                        session_id: s.id,
                        pending: true,
                        status_label: label,
                    });
                    None
                }
                SessionState::Ready => {
                    let token = CancellationToken::new();
                    s.state = SessionState::Pending;
                    s.status_label = "working".into();
                    s.active_abort = Some(token.clone());
                    self.events.emit(RuntimeEvent::SessionStatus {
                        session_id: s.id,
                        pending: true,
                        status_label: "working".into(),
                    });
                    Some(token)
                }
            }
        };

        match spawn {
            Some(token) => {
                tokio::spawn(run_turn(
                    Arc::clone(self),
                    session,
                    turn_id,
                    params.text,
                    TurnImages::Raw(params.images),
                    token,
                ));
                Ok(SendOutcome {
                    turn_id,
                    accepted: true,
                    queued: false,
                })
            }
            None => Ok(SendOutcome {
                turn_id,
                accepted: true,
                queued: true,
            }),
        }
    }

    /// Inject a user message into the running turn. Only accepted while a
    /// turn is in flight; never blocks.
    pub fn steer(&self, id: Uuid, text: &str) -> Result<bool, CoreError> {
        let session = self.session(id)?;
        let mut s = session.lock().unwrap();
        let text = text.trim();
        if s.state != SessionState::Pending || text.is_empty() {
            return Ok(false);
        }
        s.steering_queue.push_back(ChatMessage::user(text));
        Ok(true)
    }

    /// Abort the in-flight turn, if any. Idempotent.
    pub fn interrupt(&self, id: Uuid) -> Result<bool, CoreError> {
        let session = self.session(id)?;
        let mut s = session.lock().unwrap();
        let Some(token) = s.active_abort.clone() else {
            return Ok(false);
        };
        if !token.is_cancelled() {
            s.state = SessionState::Interrupting;
            s.status_label = "interrupting".into();
            self.events.emit(RuntimeEvent::SessionStatus {
                session_id: s.id,
                pending: true,
                status_label: "interrupting".into(),
            });
            token.cancel();
        }
        Ok(true)
    }

    pub fn queue_list(&self, id: Uuid) -> Result<Vec<TurnQueueItem>, CoreError> {
        Ok(self
            .session(id)?
            .lock()
            .unwrap()
            .queued_prompts
            .iter()
            .cloned()
            .collect())
    }

    pub fn queue_clear(&self, id: Uuid) -> Result<usize, CoreError> {
        let session = self.session(id)?;
        let mut s = session.lock().unwrap();
        let cleared = s.queued_prompts.len();
        s.queued_prompts.clear();
        Ok(cleared)
    }

    /// Reset a session's conversation: history, transcript, queues, rollout.
    pub fn clear_session_history(&self, id: Uuid) -> Result<(), CoreError> {
        let session = self.session(id)?;
        {
            let mut s = session.lock().unwrap();
            if let Some(token) = s.active_abort.take() {
                token.cancel();
            }
            s.clear();
        }
        self.events.emit(RuntimeEvent::StateChanged {
            reason: "history_cleared".into(),
        });
        Ok(())
    }

    /// Abort every session's active turn and clear both queues. History is
    /// preserved.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let sessions: Vec<SharedSession> =
            self.sessions.lock().unwrap().values().cloned().collect();
        for session in sessions {
            let mut s = session.lock().unwrap();
            s.queued_prompts.clear();
            s.steering_queue.clear();
            if let Some(token) = s.active_abort.clone() {
                token.cancel();
            }
        }
        self.events.emit(RuntimeEvent::StateChanged {
            reason: "shutdown".into(),
        });
    }
}

/// Turn epilogue: report leftover steering, restore `Ready`, and start the
/// next queued prompt (the sole mechanism that drains the queue).
pub(crate) fn finalize_turn(rt: &Arc<Runtime>, session: &SharedSession) {
    let next = {
        let mut s = session.lock().unwrap();
        let leftover = s.steering_queue.len();
        if leftover > 0 {
            s.steering_queue.clear();
            let row = s.push_ui(
                UiKind::System,
                format!("discarded {leftover} unapplied steering message(s)"),
                vec![],
            );
            rt.events.emit(RuntimeEvent::MessageAppended {
                session_id: s.id,
                message: row,
            });
        }
        s.active_abort = None;
        s.state = SessionState::Ready;
        s.status_label = "ready".into();
        rt.events.emit(RuntimeEvent::SessionStatus {
            session_id: s.id,
            pending: false,
            status_label: "ready".into(),
        });

        if rt.shutting_down.load(Ordering::SeqCst) {
            None
        } else if let Some(item) = s.queued_prompts.pop_front() {
            let token = CancellationToken::new();
            s.state = SessionState::Pending;
            s.status_label = "working".into();
            s.active_abort = Some(token.clone());
            rt.events.emit(RuntimeEvent::SessionStatus {
                session_id: s.id,
                pending: true,
                status_label: "working".into(),
            });
            Some((item, token))
        } else {
            None
        }
    };

    if let Some((item, token)) = next {
        debug!(turn = %item.id, "auto-advancing queued prompt");
        tokio::spawn(run_turn(
            Arc::clone(rt),
            Arc::clone(session),
            item.id,
            item.text,
            TurnImages::Loaded(item.images),
            token,
        ));
    }
}
