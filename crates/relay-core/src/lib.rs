// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod auth;
mod commands;
mod compress;
mod error;
mod events;
mod manager;
mod runtime;
mod session;
mod skills;
mod turn;

pub use auth::{EnvLoginFlow, LoginFlow, StaticLoginFlow};
pub use commands::{execute_command, CommandOutput};
pub use compress::{
    collapse_ws, compress_history, estimate_history_tokens, estimate_message_tokens,
    CompressReason, CompressionOutcome,
};
pub use error::CoreError;
pub use events::{EventBus, RuntimeEvent};
pub use manager::{SendOutcome, SendParams};
pub use runtime::{AuthStatusEntry, LimitsView, Runtime, RuntimeBuilder, RuntimeSnapshot};
pub use session::{
    RuntimeUiMessage, Session, SessionSnapshot, SessionState, TurnQueueItem, UiKind,
};
pub use skills::{discover_skills, SkillInfo};
pub use turn::{
    append_missing_image_placeholders, build_followup_items, compute_unstreamed_answer_delta,
    select_actionable_function_calls,
};
