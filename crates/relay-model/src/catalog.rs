// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Model catalog and selection policy.
//!
//! The catalog is the static list of models the runtime can drive, keyed by
//! stable id. Selection policy lives next to it: id normalization, the
//! model→provider match, per-model thinking subsets, and the context-window
//! budget that drives compression.

use serde::{Deserialize, Serialize};

use relay_config::{Provider, ThinkingLevel};

/// Context window assumed when neither the catalog nor the model id gives
/// one away.
pub const DEFAULT_CONTEXT_WINDOW: u32 = 272_000;

const MIN_CONTEXT_WINDOW: u32 = 8_000;
const MAX_CONTEXT_WINDOW: u32 = 2_000_000;

/// One selectable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOption {
    pub id: String,
    pub provider: Provider,
    pub label: String,
    pub description: String,
    /// Restriction to a subset of [`ThinkingLevel`]; `None` means the
    /// provider default set applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_thinking_levels: Option<Vec<ThinkingLevel>>,
    pub default_thinking_level: ThinkingLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window_tokens: Option<u32>,
    /// Router models only: sub-providers the aggregator can pin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_providers: Option<Vec<String>>,
}

/// The static model catalog, listed in provider order.
pub fn catalog() -> Vec<ModelOption> {
    vec![
        ModelOption {
            id: "quasar-5".into(),
            provider: Provider::Primary,
            label: "Quasar 5".into(),
            description: "Flagship reasoning model".into(),
            supported_thinking_levels: None,
            default_thinking_level: ThinkingLevel::Medium,
            context_window_tokens: Some(272_000),
            routing_providers: None,
        },
        ModelOption {
            id: "quasar-5-mini".into(),
            provider: Provider::Primary,
            label: "Quasar 5 Mini".into(),
            description: "Faster, smaller sibling of Quasar 5".into(),
            supported_thinking_levels: Some(vec![
                ThinkingLevel::Minimal,
                ThinkingLevel::Low,
                ThinkingLevel::Medium,
                ThinkingLevel::High,
            ]),
            default_thinking_level: ThinkingLevel::Low,
            context_window_tokens: None,
            routing_providers: None,
        },
        ModelOption {
            id: "quasar-5-nano".into(),
            provider: Provider::Primary,
            label: "Quasar 5 Nano".into(),
            description: "Smallest latency-optimized tier".into(),
            supported_thinking_levels: Some(vec![ThinkingLevel::Minimal, ThinkingLevel::Low]),
            default_thinking_level: ThinkingLevel::Minimal,
            context_window_tokens: None,
            routing_providers: None,
        },
        ModelOption {
            id: "nimbus-pro".into(),
            provider: Provider::Secondary,
            label: "Nimbus Pro".into(),
            description: "Long-context cloud model, thinking always on".into(),
            supported_thinking_levels: Some(vec![
                ThinkingLevel::Low,
                ThinkingLevel::Medium,
                ThinkingLevel::High,
            ]),
            default_thinking_level: ThinkingLevel::Medium,
            context_window_tokens: Some(1_048_576),
            routing_providers: None,
        },
        ModelOption {
            id: "nimbus-flash".into(),
            provider: Provider::Secondary,
            label: "Nimbus Flash".into(),
            description: "Fast cloud model with optional thinking".into(),
            supported_thinking_levels: Some(vec![
                ThinkingLevel::Off,
                ThinkingLevel::Low,
                ThinkingLevel::Medium,
                ThinkingLevel::High,
            ]),
            default_thinking_level: ThinkingLevel::Low,
            context_window_tokens: Some(1_048_576),
            routing_providers: None,
        },
        ModelOption {
            id: "atlas-4".into(),
            provider: Provider::Router,
            label: "Atlas 4".into(),
            description: "Aggregator-routed frontier model".into(),
            supported_thinking_levels: None,
            default_thinking_level: ThinkingLevel::Medium,
            context_window_tokens: Some(200_000),
            routing_providers: Some(vec!["any".into(), "alloy".into(), "borealis".into()]),
        },
        ModelOption {
            id: "atlas-4-mini".into(),
            provider: Provider::Router,
            label: "Atlas 4 Mini".into(),
            description: "Cheaper aggregator-routed tier".into(),
            supported_thinking_levels: None,
            default_thinking_level: ThinkingLevel::Low,
            context_window_tokens: None,
            routing_providers: Some(vec!["any".into(), "alloy".into()]),
        },
    ]
}

/// Normalize a raw model id: trim, lowercase, and strip a provider prefix
/// (`primary/`, `secondary/`, `router/`).
pub fn normalize_model_id(raw: &str) -> String {
    let id = raw.trim().to_lowercase();
    for provider in Provider::ALL {
        if let Some(rest) = id.strip_prefix(&format!("{}/", provider.as_str())) {
            return rest.to_string();
        }
    }
    id
}

pub fn find_model(raw_id: &str) -> Option<ModelOption> {
    let id = normalize_model_id(raw_id);
    catalog().into_iter().find(|m| m.id == id)
}

pub fn provider_for_model(raw_id: &str) -> Option<Provider> {
    find_model(raw_id).map(|m| m.provider)
}

/// The thinking levels a model accepts: its own subset when declared,
/// otherwise the provider's default set.
pub fn allowed_thinking_levels(option: &ModelOption) -> Vec<ThinkingLevel> {
    if let Some(levels) = &option.supported_thinking_levels {
        return levels.clone();
    }
    match option.provider {
        Provider::Primary => vec![
            ThinkingLevel::Minimal,
            ThinkingLevel::Low,
            ThinkingLevel::Medium,
            ThinkingLevel::High,
            ThinkingLevel::XHigh,
        ],
        Provider::Secondary => vec![
            ThinkingLevel::Off,
            ThinkingLevel::Low,
            ThinkingLevel::Medium,
            ThinkingLevel::High,
        ],
        Provider::Router => ThinkingLevel::ALL.to_vec(),
    }
}

/// Context window for a model: the catalog value when present, otherwise
/// inferred from the id/label, otherwise [`DEFAULT_CONTEXT_WINDOW`].
/// Clamped to a sane range either way.
pub fn context_window_tokens(option: &ModelOption) -> u32 {
    let window = option
        .context_window_tokens
        .or_else(|| infer_context_window(&option.id))
        .or_else(|| infer_context_window(&option.label))
        .unwrap_or(DEFAULT_CONTEXT_WINDOW);
    window.clamp(MIN_CONTEXT_WINDOW, MAX_CONTEXT_WINDOW)
}

fn infer_context_window(text: &str) -> Option<u32> {
    let t = text.to_lowercase();
    if t.contains("nano") {
        Some(64_000)
    } else if t.contains("mini") {
        Some(128_000)
    } else {
        None
    }
}

/// The token estimate at which auto-compression triggers: 95 % of the
/// window, floored at 6 000 tokens and capped at the window itself.
pub fn auto_compact_limit(window: u32) -> u32 {
    ((window as u64) * 95 / 100)
        .max(6_000)
        .min(window as u64) as u32
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_listed_in_provider_order() {
        let cat = catalog();
        let providers: Vec<Provider> = cat.iter().map(|m| m.provider).collect();
        let mut sorted = providers.clone();
        sorted.sort();
        assert_eq!(providers, sorted);
    }

    #[test]
    fn normalize_strips_provider_prefix_and_case() {
        assert_eq!(normalize_model_id("router/Atlas-4"), "atlas-4");
        assert_eq!(normalize_model_id("  QUASAR-5 "), "quasar-5");
        assert_eq!(normalize_model_id("secondary/nimbus-pro"), "nimbus-pro");
    }

    #[test]
    fn find_model_accepts_prefixed_ids() {
        assert_eq!(find_model("primary/quasar-5").unwrap().id, "quasar-5");
        assert!(find_model("no-such-model").is_none());
    }

    #[test]
    fn provider_match() {
        assert_eq!(provider_for_model("quasar-5-mini"), Some(Provider::Primary));
        assert_eq!(provider_for_model("nimbus-flash"), Some(Provider::Secondary));
        assert_eq!(provider_for_model("atlas-4"), Some(Provider::Router));
        assert_eq!(provider_for_model("nope"), None);
    }

    #[test]
    fn allowed_levels_use_model_subset_when_declared() {
        let pro = find_model("nimbus-pro").unwrap();
        let levels = allowed_thinking_levels(&pro);
        assert!(!levels.contains(&ThinkingLevel::Off));
        assert!(levels.contains(&ThinkingLevel::High));
    }

    #[test]
    fn allowed_levels_fall_back_to_provider_defaults() {
        let atlas = find_model("atlas-4").unwrap();
        assert_eq!(allowed_thinking_levels(&atlas), ThinkingLevel::ALL.to_vec());
    }

    #[test]
    fn explicit_context_window_wins() {
        let pro = find_model("nimbus-pro").unwrap();
        assert_eq!(context_window_tokens(&pro), 1_048_576);
    }

    #[test]
    fn mini_and_nano_windows_are_inferred() {
        let mini = find_model("quasar-5-mini").unwrap();
        assert_eq!(context_window_tokens(&mini), 128_000);
        let nano = find_model("quasar-5-nano").unwrap();
        assert_eq!(context_window_tokens(&nano), 64_000);
    }

    #[test]
    fn unknown_window_defaults_and_clamps() {
        let mut opt = find_model("quasar-5").unwrap();
        opt.context_window_tokens = None;
        opt.id = "quasar-5".into();
        assert_eq!(context_window_tokens(&opt), DEFAULT_CONTEXT_WINDOW);

        opt.context_window_tokens = Some(100);
        assert_eq!(context_window_tokens(&opt), 8_000);

        opt.context_window_tokens = Some(5_000_000);
        assert_eq!(context_window_tokens(&opt), 2_000_000);
    }

    #[test]
    fn auto_limit_is_95_percent_with_floor_and_cap() {
        assert_eq!(auto_compact_limit(100_000), 95_000);
        assert_eq!(auto_compact_limit(8_000), 7_600);
        // Floor: 95% of 6_200 is 5_890, but the limit never drops below 6_000.
        assert_eq!(auto_compact_limit(6_200), 6_000);
        // Cap: the floor itself never exceeds the window.
        assert_eq!(auto_compact_limit(5_000), 5_000);
    }

    #[test]
    fn routing_providers_only_on_router_models() {
        for m in catalog() {
            match m.provider {
                Provider::Router => assert!(m.routing_providers.is_some()),
                _ => assert!(m.routing_providers.is_none()),
            }
        }
    }
}
