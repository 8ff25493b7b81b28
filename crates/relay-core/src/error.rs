// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use relay_config::Provider;
use thiserror::Error;

/// Domain errors raised by the runtime.
///
/// Every variant maps to a stable machine-readable reason tag that the RPC
/// layer forwards in `error.data.reason`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid params: {field}: {reason}")]
    InvalidParams { field: String, reason: String },

    #[error("session is busy; pass enqueue=true to queue the prompt")]
    Busy,

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("provider '{0}' is not enabled")]
    ProviderNotEnabled(Provider),

    #[error("missing credential for provider '{0}'")]
    MissingCredential(Provider),

    #[error("no model selected")]
    NoModelSelected,

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn invalid_params(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::InvalidParams {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable reason tag for the RPC error payload.
    pub fn reason(&self) -> &'static str {
        match self {
            CoreError::InvalidParams { .. } => "invalid_params",
            CoreError::Busy => "busy",
            CoreError::UnknownSession(_) => "unknown_session",
            CoreError::ProviderNotEnabled(_) => "provider_not_enabled",
            CoreError::MissingCredential(_) => "missing_credential",
            CoreError::NoModelSelected => "no_model_selected",
            CoreError::UnknownModel(_) => "invalid_params",
            CoreError::Upstream(_) => "upstream",
            CoreError::UnsupportedProtocolVersion(_) => "unsupported_protocol_version",
            CoreError::Internal(_) => "internal_error",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_tags_are_stable() {
        assert_eq!(CoreError::Busy.reason(), "busy");
        assert_eq!(
            CoreError::UnknownSession("x".into()).reason(),
            "unknown_session"
        );
        assert_eq!(
            CoreError::ProviderNotEnabled(Provider::Router).reason(),
            "provider_not_enabled"
        );
        assert_eq!(
            CoreError::MissingCredential(Provider::Primary).reason(),
            "missing_credential"
        );
        assert_eq!(CoreError::Upstream("e".into()).reason(), "upstream");
        assert_eq!(
            CoreError::UnsupportedProtocolVersion("9".into()).reason(),
            "unsupported_protocol_version"
        );
    }

    #[test]
    fn invalid_params_names_the_field() {
        let e = CoreError::invalid_params("text", "must not be empty");
        assert_eq!(e.reason(), "invalid_params");
        assert!(e.to_string().contains("text"));
        assert!(e.to_string().contains("must not be empty"));
    }
}
