// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// The three backend families the runtime can talk to.
///
/// The declaration order is the canonical external order: catalog listings,
/// auth status rows, and snapshot fields all enumerate providers in this
/// order. Each provider holds its own independent credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OAuth-based backend speaking the stateless response-item protocol.
    Primary,
    /// Cloud-OAuth backend speaking the function-call streaming protocol.
    Secondary,
    /// Third-party aggregator that can route to further sub-providers.
    Router,
}

impl Provider {
    /// All providers in canonical order.
    pub const ALL: [Provider; 3] = [Provider::Primary, Provider::Secondary, Provider::Router];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Primary => "primary",
            Provider::Secondary => "secondary",
            Provider::Router => "router",
        }
    }

    pub fn parse(s: &str) -> Option<Provider> {
        match s.trim().to_lowercase().as_str() {
            "primary" => Some(Provider::Primary),
            "secondary" => Some(Provider::Secondary),
            "router" => Some(Provider::Router),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasoning-effort hint sent to the model.
///
/// Ordered from least to most effort. Each provider supports a subset; the
/// catalog records per-model restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Off,
    Minimal,
    Low,
    Medium,
    High,
    XHigh,
}

impl ThinkingLevel {
    /// All levels in ascending order.
    pub const ALL: [ThinkingLevel; 6] = [
        ThinkingLevel::Off,
        ThinkingLevel::Minimal,
        ThinkingLevel::Low,
        ThinkingLevel::Medium,
        ThinkingLevel::High,
        ThinkingLevel::XHigh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThinkingLevel::Off => "off",
            ThinkingLevel::Minimal => "minimal",
            ThinkingLevel::Low => "low",
            ThinkingLevel::Medium => "medium",
            ThinkingLevel::High => "high",
            ThinkingLevel::XHigh => "xhigh",
        }
    }

    pub fn parse(s: &str) -> Option<ThinkingLevel> {
        match s.trim().to_lowercase().as_str() {
            "off" => Some(ThinkingLevel::Off),
            "minimal" => Some(ThinkingLevel::Minimal),
            "low" => Some(ThinkingLevel::Low),
            "medium" => Some(ThinkingLevel::Medium),
            "high" => Some(ThinkingLevel::High),
            "xhigh" => Some(ThinkingLevel::XHigh),
            _ => None,
        }
    }
}

impl std::fmt::Display for ThinkingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_order_is_primary_secondary_router() {
        assert!(Provider::Primary < Provider::Secondary);
        assert!(Provider::Secondary < Provider::Router);
        assert_eq!(
            Provider::ALL,
            [Provider::Primary, Provider::Secondary, Provider::Router]
        );
    }

    #[test]
    fn provider_parse_round_trip() {
        for p in Provider::ALL {
            assert_eq!(Provider::parse(p.as_str()), Some(p));
        }
        assert_eq!(Provider::parse("  Router "), Some(Provider::Router));
        assert_eq!(Provider::parse("unknown"), None);
    }

    #[test]
    fn provider_serializes_lowercase() {
        let s = serde_json::to_string(&Provider::Secondary).unwrap();
        assert_eq!(s, "\"secondary\"");
    }

    #[test]
    fn thinking_levels_are_ordered() {
        assert!(ThinkingLevel::Off < ThinkingLevel::Minimal);
        assert!(ThinkingLevel::Medium < ThinkingLevel::High);
        assert!(ThinkingLevel::High < ThinkingLevel::XHigh);
    }

    #[test]
    fn thinking_level_parse_round_trip() {
        for l in ThinkingLevel::ALL {
            assert_eq!(ThinkingLevel::parse(l.as_str()), Some(l));
        }
        assert_eq!(ThinkingLevel::parse("XHIGH"), Some(ThinkingLevel::XHigh));
        assert_eq!(ThinkingLevel::parse(""), None);
    }

    #[test]
    fn thinking_level_serde_round_trip() {
        let json = serde_json::to_string(&ThinkingLevel::XHigh).unwrap();
        assert_eq!(json, "\"xhigh\"");
        let back: ThinkingLevel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ThinkingLevel::XHigh);
    }
}
