// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Retry/backoff for transient provider failures.
//!
//! Only the rate-limit class is retried: HTTP 429 and the textual markers
//! the backends use for quota exhaustion. Everything else, including an
//! abort, is surfaced immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::StreamError;

/// Maximum attempts per round (1 initial + 7 retries).
pub const MAX_ATTEMPTS: u32 = 8;

const BASE_DELAY_MS: u64 = 1_250;
const MAX_DELAY_MS: u64 = 20_000;
const JITTER_MS: i64 = 500;

/// Whether an upstream error message marks a transient rate-limit failure.
pub fn is_transient_message(message: &str) -> bool {
    let m = message.to_lowercase();
    m.contains("429")
        || m.contains("too many requests")
        || m.contains("rate limit")
        || m.contains("resource_exhausted")
}

/// Exponential backoff with ±500 ms jitter: 1.25 s, 2.5 s, 5 s, … capped at
/// 20 s. `attempt` is 1-based (the attempt that just failed).
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY_MS.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(10));
    let capped = exp.min(MAX_DELAY_MS) as i64;
    let jitter = rand::thread_rng().gen_range(-JITTER_MS..=JITTER_MS);
    Duration::from_millis(capped.saturating_add(jitter).max(0) as u64)
}

/// Sleep that resolves early, with [`StreamError::Aborted`], when the
/// cancellation token fires.
pub async fn sleep_cancellable(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), StreamError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StreamError::Aborted),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Run `op` with transient-failure retries.
///
/// Retries only errors whose [`StreamError::is_transient`] is true, up to
/// [`MAX_ATTEMPTS`] total attempts, sleeping a jittered exponential backoff
/// between them. Aborts (including an abort during the backoff sleep) pass
/// straight through.
pub async fn with_retry<T, F, Fut>(
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, StreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StreamError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(StreamError::Aborted);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e,
                      "transient provider error; backing off");
                sleep_cancellable(delay, cancel).await?;
            }
            Err(e) => return Err(e),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn transient_markers_recognized() {
        assert!(is_transient_message("HTTP 429"));
        assert!(is_transient_message("Too Many Requests"));
        assert!(is_transient_message("provider rate limit hit"));
        assert!(is_transient_message("RESOURCE_EXHAUSTED"));
        assert!(!is_transient_message("bad gateway"));
    }

    #[test]
    fn backoff_grows_and_caps() {
        // Jitter is ±500 ms, so compare against generous bounds.
        let d1 = backoff_delay(1).as_millis() as i64;
        assert!((750..=1_750).contains(&d1), "attempt 1: {d1}");
        let d3 = backoff_delay(3).as_millis() as i64;
        assert!((4_500..=5_500).contains(&d3), "attempt 3: {d3}");
        let d9 = backoff_delay(9).as_millis() as i64;
        assert!((19_500..=20_500).contains(&d9), "attempt 9: {d9}");
    }

    #[tokio::test]
    async fn sleep_cancellable_returns_abort_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let err = sleep_cancellable(Duration::from_secs(60), &token)
            .await
            .unwrap_err();
        assert!(err.is_abort());
    }

    #[tokio::test(start_paused = true)]
    async fn with_retry_retries_transient_then_succeeds() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result = with_retry(&token, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StreamError::upstream(Some(429), "slow down"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_does_not_retry_hard_errors() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let err = with_retry::<(), _, _>(&token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StreamError::upstream(Some(500), "boom")) }
        })
        .await
        .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_retry_does_not_retry_aborts() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let err = with_retry::<(), _, _>(&token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StreamError::Aborted) }
        })
        .await
        .unwrap_err();
        assert!(err.is_abort());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_retry_short_circuits_on_precancelled_token() {
        let token = CancellationToken::new();
        token.cancel();
        let err = with_retry::<(), _, _>(&token, || async { Ok(()) })
            .await
            .unwrap_err();
        assert!(err.is_abort());
    }

    #[tokio::test(start_paused = true)]
    async fn with_retry_gives_up_after_max_attempts() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let err = with_retry::<(), _, _>(&token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StreamError::upstream(Some(429), "still limited")) }
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
