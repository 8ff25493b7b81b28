// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Persistent selection state.
//!
//! A single small JSON record holds everything the runtime needs to restore
//! its selection between launches: enabled providers, the selected model and
//! thinking level, the router sub-provider, the onboarding flag, and the
//! composer's recall buffer. Secrets live elsewhere (see [`crate::SecretStore`]).

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Provider, ThinkingLevel};

/// Upper bound on persisted composer history entries.
pub const INPUT_HISTORY_CAP: usize = 200;

/// Returns the directory where relay stores its state.
///
/// Defaults to `$XDG_DATA_HOME/relay` (i.e. `~/.local/share/relay`).
pub fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local")
                .join("share")
        })
        .join("relay")
}

/// The persisted selection record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionState {
    pub enabled_providers: Vec<Provider>,
    pub selected_model: Option<String>,
    pub selected_thinking: Option<ThinkingLevel>,
    /// Router sub-provider tag; `"any"` lets the aggregator choose.
    pub router_provider: String,
    pub onboarding_complete: bool,
    /// Composer recall buffer, newest last. Bounded at [`INPUT_HISTORY_CAP`];
    /// persisted for the client but not part of the RPC surface.
    pub input_history: Vec<String>,
}

impl Default for SelectionState {
    fn default() -> Self {
        Self {
            enabled_providers: Vec::new(),
            selected_model: None,
            selected_thinking: None,
            router_provider: "any".to_string(),
            onboarding_complete: false,
            input_history: Vec::new(),
        }
    }
}

impl SelectionState {
    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.enabled_providers.contains(&provider)
    }

    /// Enable a provider, keeping the list in canonical order.
    pub fn enable(&mut self, provider: Provider) {
        if !self.enabled_providers.contains(&provider) {
            self.enabled_providers.push(provider);
            self.enabled_providers.sort();
        }
    }

    /// Append a composer entry, dropping the oldest past the cap.
    pub fn push_input_history(&mut self, entry: impl Into<String>) {
        let entry = entry.into();
        if entry.trim().is_empty() {
            return;
        }
        self.input_history.push(entry);
        let overflow = self.input_history.len().saturating_sub(INPUT_HISTORY_CAP);
        if overflow > 0 {
            self.input_history.drain(..overflow);
        }
    }
}

/// Load/save gateway for the selection record.
///
/// Writes are atomic: the record is serialized to `state.json.tmp` and then
/// renamed over `state.json`, so readers never observe a torn file.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join("state.json")
    }

    /// Load the record, returning defaults when the file is missing or
    /// unreadable. A corrupt file is not an error at load time; it is
    /// overwritten on the next save.
    pub fn load(&self) -> SelectionState {
        let path = self.state_path();
        match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(state) => state,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "ignoring corrupt state file");
                    SelectionState::default()
                }
            },
            Err(_) => SelectionState::default(),
        }
    }

    pub fn save(&self, state: &SelectionState) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating state directory {}", self.dir.display()))?;
        let path = self.state_path();
        let tmp = self.dir.join("state.json.tmp");
        let text = serde_json::to_string_pretty(state)?;
        std::fs::write(&tmp, text)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("renaming {} into place", tmp.display()))?;
        Ok(())
    }

    /// Remove the record from disk (used by the full reset command).
    pub fn clear(&self) -> anyhow::Result<()> {
        let path = self.state_path();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let (_dir, store) = store();
        let state = store.load();
        assert_eq!(state, SelectionState::default());
        assert_eq!(state.router_provider, "any");
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_dir, store) = store();
        let mut state = SelectionState::default();
        state.enable(Provider::Router);
        state.selected_model = Some("swift-mini".into());
        state.selected_thinking = Some(ThinkingLevel::High);
        state.onboarding_complete = true;
        store.save(&state).unwrap();
        assert_eq!(store.load(), state);
    }

    #[test]
    fn load_corrupt_file_returns_defaults() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("state.json"), "{not json").unwrap();
        assert_eq!(store.load(), SelectionState::default());
    }

    #[test]
    fn clear_removes_file_and_is_idempotent() {
        let (_dir, store) = store();
        store.save(&SelectionState::default()).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load(), SelectionState::default());
    }

    #[test]
    fn enable_keeps_canonical_order() {
        let mut state = SelectionState::default();
        state.enable(Provider::Router);
        state.enable(Provider::Primary);
        state.enable(Provider::Router);
        assert_eq!(
            state.enabled_providers,
            vec![Provider::Primary, Provider::Router]
        );
    }

    #[test]
    fn input_history_is_bounded() {
        let mut state = SelectionState::default();
        for i in 0..(INPUT_HISTORY_CAP + 25) {
            state.push_input_history(format!("entry {i}"));
        }
        assert_eq!(state.input_history.len(), INPUT_HISTORY_CAP);
        assert_eq!(state.input_history.last().unwrap(), "entry 224");
        assert_eq!(state.input_history.first().unwrap(), "entry 25");
    }

    #[test]
    fn input_history_skips_blank_entries() {
        let mut state = SelectionState::default();
        state.push_input_history("   ");
        assert!(state.input_history.is_empty());
    }
}
