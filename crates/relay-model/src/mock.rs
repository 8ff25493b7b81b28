// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use relay_config::Provider;

use crate::{
    adapter::{ChunkSink, DebugSink, ProviderAdapter},
    ChatMessage, FunctionCallItem, OutputItem, RequestItem, StreamChunk, StreamError, TurnRequest,
    TurnResult,
};

/// What a scripted round does after emitting its chunks.
#[derive(Debug)]
pub enum RoundOutcome {
    /// Return this result.
    Result(TurnResult),
    /// Fail with this error.
    Error(StreamError),
    /// Block until the request's cancellation token fires, then surface the
    /// abort sentinel. Used to test interruption mid-stream.
    AwaitAbort,
}

/// One pre-scripted round: chunks to stream, then an outcome.
#[derive(Debug)]
pub struct ScriptedRound {
    pub chunks: Vec<StreamChunk>,
    pub outcome: RoundOutcome,
}

impl ScriptedRound {
    /// A round that streams `text` as one answer delta and completes with
    /// the same final text.
    pub fn answer(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            chunks: vec![StreamChunk::answer(text.clone())],
            outcome: RoundOutcome::Result(TurnResult {
                answer: text,
                output_items: Vec::new(),
                completed: true,
                status_token: Some("completed".into()),
            }),
        }
    }

    /// A round that emits a single function call and completes.
    pub fn function_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            chunks: Vec::new(),
            outcome: RoundOutcome::Result(TurnResult {
                answer: String::new(),
                output_items: vec![OutputItem::FunctionCall(FunctionCallItem {
                    call_id: call_id.into(),
                    name: name.into(),
                    arguments: arguments.into(),
                    status: None,
                })],
                completed: true,
                status_token: Some("completed".into()),
            }),
        }
    }

    /// A round that streams `streamed` but reports `final_text` as the
    /// terminal answer (reconciliation test shape).
    pub fn answer_with_final(streamed: impl Into<String>, final_text: impl Into<String>) -> Self {
        let streamed = streamed.into();
        Self {
            chunks: vec![StreamChunk::answer(streamed)],
            outcome: RoundOutcome::Result(TurnResult {
                answer: final_text.into(),
                output_items: Vec::new(),
                completed: true,
                status_token: Some("completed".into()),
            }),
        }
    }

    /// A round that streams the given chunks and then hangs until aborted.
    pub fn hang_after(chunks: Vec<StreamChunk>) -> Self {
        Self {
            chunks,
            outcome: RoundOutcome::AwaitAbort,
        }
    }
}

/// A recorded `stream` invocation, for assertions.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub input: Vec<RequestItem>,
    pub system_instruction: Option<String>,
    pub tool_names: Vec<String>,
}

/// Deterministic pre-scripted adapter for tests. Each `stream` call pops
/// the next round; requests and drained steering are recorded.
pub struct ScriptedAdapter {
    provider: Provider,
    rounds: Mutex<VecDeque<ScriptedRound>>,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
    pub drained_steering: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl ScriptedAdapter {
    pub fn new(provider: Provider, rounds: Vec<ScriptedRound>) -> Self {
        Self {
            provider,
            rounds: Mutex::new(rounds.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
            drained_steering: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: a primary-provider adapter that answers once.
    pub fn always(text: impl Into<String>) -> Self {
        Self::new(Provider::Primary, vec![ScriptedRound::answer(text)])
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn stream(
        &self,
        req: TurnRequest,
        on_chunk: &ChunkSink,
        _on_debug: &DebugSink,
    ) -> Result<TurnResult, StreamError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            model: req.model.clone(),
            input: req.input.clone(),
            system_instruction: req.system_instruction.clone(),
            tool_names: req.tools.iter().map(|t| t.name.clone()).collect(),
        });

        // Pre-round boundary, same as the real adapters.
        let steered = (req.drain_steering)();
        self.drained_steering.lock().unwrap().push(steered);

        let round = self.rounds.lock().unwrap().pop_front();
        let round = match round {
            Some(r) => r,
            // Script exhausted: complete with an empty answer so a misdriven
            // test fails on content, not on a hang.
            None => ScriptedRound::answer(""),
        };

        for chunk in round.chunks {
            if req.cancel.is_cancelled() {
                return Err(StreamError::Aborted);
            }
            on_chunk(chunk);
            // Yield so an interleaved interrupt has a chance to land.
            tokio::task::yield_now().await;
        }

        match round.outcome {
            RoundOutcome::Result(result) => Ok(result),
            RoundOutcome::Error(e) => Err(e),
            RoundOutcome::AwaitAbort => {
                req.cancel.cancelled().await;
                Err(StreamError::Aborted)
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
