// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod secrets;
mod state;
mod types;

pub use secrets::{ApiKeyCredential, OauthCredential, SecretKind, SecretStore};
pub use state::{default_state_dir, SelectionState, StateStore, INPUT_HISTORY_CAP};
pub use types::{Provider, ThinkingLevel};
