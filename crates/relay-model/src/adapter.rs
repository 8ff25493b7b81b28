// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;

use relay_config::Provider;

use crate::{ChatMessage, DebugEvent, StreamChunk, StreamError, TurnRequest, TurnResult};

/// Callback handed to an adapter for forwarding streamed updates.
pub type ChunkSink = Arc<dyn Fn(StreamChunk) + Send + Sync>;

/// Callback for debug trace records (raw request/response summaries).
pub type DebugSink = Arc<dyn Fn(DebugEvent) + Send + Sync>;

/// Steering drain callback: pops any queued mid-turn user messages.
///
/// Adapters call this exactly once per round, at their pre-round boundary,
/// and splice the returned messages into the round's input. Messages queued
/// after the drain are carried to the next round by the caller.
pub type SteeringDrain = Arc<dyn Fn() -> Vec<ChatMessage> + Send + Sync>;

/// A provider stream adapter: drives one request/stream round.
///
/// Contract:
/// - forward every thought and answer delta through `on_chunk` before the
///   stream ends;
/// - report `completed = true` only on a terminal success signal; a
///   premature closure forces the caller to issue another round;
/// - surface a fired `cancel` token as [`StreamError::Aborted`];
/// - preserve `call_id`/`name`/`arguments` of collected function calls
///   verbatim, including the exact JSON argument string;
/// - retry transient rate-limit failures internally; never retry aborts.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    async fn stream(
        &self,
        req: TurnRequest,
        on_chunk: &ChunkSink,
        on_debug: &DebugSink,
    ) -> Result<TurnResult, StreamError>;
}
