// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod catalog;
pub mod retry;
pub mod sanitize;

mod adapter;
mod error;
mod mock;
mod primary;
mod router;
mod secondary;
mod types;
mod wire;

pub use adapter::{ChunkSink, DebugSink, ProviderAdapter, SteeringDrain};
pub use catalog::{
    allowed_thinking_levels, auto_compact_limit, catalog, context_window_tokens, find_model,
    normalize_model_id, provider_for_model, ModelOption, DEFAULT_CONTEXT_WINDOW,
};
pub use error::StreamError;
pub use mock::{RecordedRequest, RoundOutcome, ScriptedAdapter, ScriptedRound};
pub use primary::PrimaryAdapter;
pub use relay_config::{Provider, ThinkingLevel};
pub use router::RouterAdapter;
pub use secondary::SecondaryAdapter;
pub use types::*;
