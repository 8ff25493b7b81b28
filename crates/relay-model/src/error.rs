// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use relay_config::{Provider, ThinkingLevel};
use thiserror::Error;

/// Errors surfaced by a provider stream adapter.
///
/// The `Aborted` variant is the cancellation sentinel: every I/O helper maps
/// a fired cancellation token to it so the turn engine can tell an abort
/// apart from an upstream failure. Aborts are never retried.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("aborted")]
    Aborted,

    #[error("missing credential for provider '{0}'")]
    MissingCredential(Provider),

    #[error("model '{model}' does not support thinking level '{level}'")]
    UnsupportedThinking {
        model: String,
        level: ThinkingLevel,
    },

    #[error("upstream error{}: {message}", status.map(|s| format!(" {s}")).unwrap_or_default())]
    Upstream {
        status: Option<u16>,
        message: String,
    },
}

impl StreamError {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        StreamError::Upstream {
            status,
            message: message.into(),
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, StreamError::Aborted)
    }

    /// Whether this error belongs to the retryable transient class
    /// (rate limiting and quota exhaustion).
    pub fn is_transient(&self) -> bool {
        match self {
            StreamError::Upstream { status, message } => {
                *status == Some(429) || crate::retry::is_transient_message(message)
            }
            _ => false,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_is_not_transient() {
        assert!(StreamError::Aborted.is_abort());
        assert!(!StreamError::Aborted.is_transient());
    }

    #[test]
    fn status_429_is_transient() {
        assert!(StreamError::upstream(Some(429), "slow down").is_transient());
    }

    #[test]
    fn rate_limit_message_is_transient() {
        assert!(StreamError::upstream(Some(500), "resource_exhausted: quota").is_transient());
        assert!(StreamError::upstream(None, "Too Many Requests").is_transient());
        assert!(StreamError::upstream(None, "hit a rate limit, retry later").is_transient());
    }

    #[test]
    fn plain_server_error_is_not_transient() {
        assert!(!StreamError::upstream(Some(500), "internal server error").is_transient());
        assert!(!StreamError::MissingCredential(Provider::Primary).is_transient());
    }

    #[test]
    fn display_includes_status() {
        let e = StreamError::upstream(Some(503), "unavailable");
        assert_eq!(e.to_string(), "upstream error 503: unavailable");
        let e = StreamError::upstream(None, "boom");
        assert_eq!(e.to_string(), "upstream error: boom");
    }
}
