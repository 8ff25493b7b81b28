// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The runtime facade: process-global selection state, credentials, provider
//! adapters, and the session map. Everything the RPC router calls lives on
//! [`Runtime`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use relay_config::{
    ApiKeyCredential, Provider, SecretKind, SecretStore, SelectionState, StateStore, ThinkingLevel,
};
use relay_model::{
    allowed_thinking_levels, auto_compact_limit, catalog, context_window_tokens, find_model,
    ModelOption, PrimaryAdapter, ProviderAdapter, RouterAdapter, SecondaryAdapter,
};
use relay_rollout::{Rollout, RolloutStore, RolloutSummary};
use relay_tools::{ToolDeclaration, ToolRegistry, ToolRuntime};

use crate::auth::{EnvLoginFlow, LoginFlow};
use crate::error::CoreError;
use crate::events::{EventBus, RuntimeEvent};
use crate::session::Session;
use crate::skills::{discover_skills, SkillInfo};

pub(crate) type SharedSession = Arc<Mutex<Session>>;

/// Construction options for [`Runtime`]. Adapters, tools, and the login
/// flow can be swapped (tests use scripted adapters).
pub struct RuntimeBuilder {
    state_dir: PathBuf,
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
    registry: Arc<ToolRegistry>,
    login: Arc<dyn LoginFlow>,
}

impl RuntimeBuilder {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let mut adapters: HashMap<Provider, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(Provider::Primary, Arc::new(PrimaryAdapter::default()));
        adapters.insert(Provider::Secondary, Arc::new(SecondaryAdapter::default()));
        adapters.insert(Provider::Router, Arc::new(RouterAdapter::default()));
        Self {
            state_dir: state_dir.into(),
            adapters,
            registry: Arc::new(ToolRegistry::new()),
            login: Arc::new(EnvLoginFlow),
        }
    }

    pub fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    pub fn tools(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn login_flow(mut self, login: Arc<dyn LoginFlow>) -> Self {
        self.login = login;
        self
    }

    pub fn build(self) -> Arc<Runtime> {
        let state_store = StateStore::new(&self.state_dir);
        let selection = state_store.load();
        let secrets = SecretStore::new(&self.state_dir);
        let rollouts = RolloutStore::new(&self.state_dir);
        let skills = discover_skills(&self.state_dir);
        info!(state_dir = %self.state_dir.display(), skills = skills.len(), "runtime starting");
        Arc::new(Runtime {
            state_store,
            secrets,
            selection: Mutex::new(selection),
            sessions: Mutex::new(HashMap::new()),
            adapters: self.adapters,
            tools: ToolRuntime::new(self.registry),
            rollouts,
            events: EventBus::new(),
            login: self.login,
            skills,
            shutting_down: AtomicBool::new(false),
            debug_enabled: AtomicBool::new(false),
        })
    }
}

pub struct Runtime {
    pub(crate) state_store: StateStore,
    pub(crate) secrets: SecretStore,
    pub(crate) selection: Mutex<SelectionState>,
    pub(crate) sessions: Mutex<HashMap<Uuid, SharedSession>>,
    pub(crate) adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
    pub(crate) tools: ToolRuntime,
    pub(crate) rollouts: RolloutStore,
    pub(crate) events: EventBus,
    pub(crate) login: Arc<dyn LoginFlow>,
    pub(crate) skills: Vec<SkillInfo>,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) debug_enabled: AtomicBool,
}

/// Projection broadcast on state changes and returned by `state.get`.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSnapshot {
    pub enabled_providers: Vec<Provider>,
    pub has_primary_token: bool,
    pub has_secondary_token: bool,
    pub has_router_key: bool,
    pub has_search_key: bool,
    pub onboarding_complete: bool,
    pub selected_model: Option<String>,
    pub selected_thinking: Option<ThinkingLevel>,
    pub selected_provider: Option<Provider>,
    pub router_provider: String,
    pub session_ids: Vec<Uuid>,
    pub skills_count: usize,
}

/// Per-provider credential/enabled flags for `auth.status`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatusEntry {
    pub provider: Provider,
    pub enabled: bool,
    pub has_credential: bool,
}

/// Local budget view for `limits.get`.
#[derive(Debug, Clone, Serialize)]
pub struct LimitsView {
    pub selected_model: Option<String>,
    pub provider: Option<Provider>,
    pub context_window_tokens: Option<u32>,
    pub auto_compact_limit: Option<u32>,
    pub thinking_level: Option<ThinkingLevel>,
}

impl Runtime {
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub(crate) fn adapter_for(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    /// The bearer credential for a provider, if present.
    pub(crate) fn credential_for(&self, provider: Provider) -> Option<String> {
        match provider {
            Provider::Primary | Provider::Secondary => {
                let kind = SecretKind::oauth_for(provider)?;
                self.secrets.load_oauth(kind).map(|c| c.access_token)
            }
            Provider::Router => self
                .secrets
                .load_key(SecretKind::RouterKey)
                .map(|c| c.key),
        }
    }

    fn persist_selection(&self, selection: &SelectionState) {
        if let Err(e) = self.state_store.save(selection) {
            tracing::warn!(error = %e, "failed to persist selection state");
        }
    }

    // ── Snapshot ─────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> RuntimeSnapshot {
        let sel = self.selection.lock().unwrap();
        let selected_provider = sel
            .selected_model
            .as_deref()
            .and_then(relay_model::provider_for_model);
        RuntimeSnapshot {
            enabled_providers: sel.enabled_providers.clone(),
            has_primary_token: self.secrets.has(SecretKind::PrimaryOauth),
            has_secondary_token: self.secrets.has(SecretKind::SecondaryOauth),
            has_router_key: self.secrets.has(SecretKind::RouterKey),
            has_search_key: self.secrets.has(SecretKind::SearchKey),
            onboarding_complete: sel.onboarding_complete,
            selected_model: sel.selected_model.clone(),
            selected_thinking: sel.selected_thinking,
            selected_provider,
            router_provider: sel.router_provider.clone(),
            session_ids: self.session_ids(),
            skills_count: self.skills.len(),
        }
    }

    // ── Model selection ──────────────────────────────────────────────────────

    /// The catalog in provider order.
    pub fn model_list(&self) -> Vec<ModelOption> {
        catalog()
    }

    pub fn model_select(
        &self,
        model_id: &str,
        thinking: Option<ThinkingLevel>,
    ) -> Result<ModelOption, CoreError> {
        let option =
            find_model(model_id).ok_or_else(|| CoreError::UnknownModel(model_id.to_string()))?;
        if let Some(level) = thinking {
            if !allowed_thinking_levels(&option).contains(&level) {
                return Err(CoreError::invalid_params(
                    "thinking",
                    format!("model '{}' does not support level '{level}'", option.id),
                ));
            }
        }
        {
            let mut sel = self.selection.lock().unwrap();
            sel.selected_model = Some(option.id.clone());
            match thinking {
                Some(level) => sel.selected_thinking = Some(level),
                None => {
                    // Keep a previously chosen level only if the new model
                    // accepts it.
                    if let Some(prev) = sel.selected_thinking {
                        if !allowed_thinking_levels(&option).contains(&prev) {
                            sel.selected_thinking = Some(option.default_thinking_level);
                        }
                    }
                }
            }
            self.persist_selection(&sel);
        }
        self.events.emit(RuntimeEvent::StateChanged {
            reason: "model_selected".into(),
        });
        Ok(option)
    }

    /// Sub-providers selectable for the current (or any) router model.
    pub fn router_providers(&self) -> Vec<String> {
        let sel = self.selection.lock().unwrap();
        let selected = sel
            .selected_model
            .as_deref()
            .and_then(find_model)
            .filter(|m| m.provider == Provider::Router);
        let from_model = selected.and_then(|m| m.routing_providers);
        from_model.unwrap_or_else(|| {
            let mut tags: Vec<String> = catalog()
                .into_iter()
                .filter(|m| m.provider == Provider::Router)
                .filter_map(|m| m.routing_providers)
                .flatten()
                .collect();
            tags.sort();
            tags.dedup();
            tags
        })
    }

    pub fn select_router_provider(&self, tag: &str) -> Result<(), CoreError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(CoreError::invalid_params("provider", "must not be empty"));
        }
        let mut sel = self.selection.lock().unwrap();
        sel.router_provider = tag.to_string();
        self.persist_selection(&sel);
        drop(sel);
        self.events.emit(RuntimeEvent::StateChanged {
            reason: "router_provider_selected".into(),
        });
        Ok(())
    }

    pub fn limits(&self) -> LimitsView {
        let sel = self.selection.lock().unwrap();
        let option = sel.selected_model.as_deref().and_then(find_model);
        let window = option.as_ref().map(context_window_tokens);
        LimitsView {
            selected_model: sel.selected_model.clone(),
            provider: option.as_ref().map(|o| o.provider),
            context_window_tokens: window,
            auto_compact_limit: window.map(auto_compact_limit),
            thinking_level: sel
                .selected_thinking
                .or_else(|| option.as_ref().map(|o| o.default_thinking_level)),
        }
    }

    // ── Auth ─────────────────────────────────────────────────────────────────

    pub fn auth_status(&self) -> Vec<AuthStatusEntry> {
        let sel = self.selection.lock().unwrap();
        Provider::ALL
            .into_iter()
            .map(|provider| AuthStatusEntry {
                provider,
                enabled: sel.is_enabled(provider),
                has_credential: self.credential_for(provider).is_some(),
            })
            .collect()
    }

    /// Run the OAuth login flow for a provider and persist its credential.
    pub async fn connect_oauth(&self, provider: Provider) -> Result<(), CoreError> {
        let Some(kind) = SecretKind::oauth_for(provider) else {
            return Err(CoreError::invalid_params(
                "provider",
                "router uses an API key, not an OAuth flow",
            ));
        };
        let credential = self
            .login
            .connect(provider, &self.events)
            .await
            .map_err(|e| CoreError::Upstream(e.to_string()))?;
        self.secrets
            .save_oauth(kind, &credential)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        {
            let mut sel = self.selection.lock().unwrap();
            sel.enable(provider);
            self.persist_selection(&sel);
        }
        self.events.emit(RuntimeEvent::StateChanged {
            reason: "auth_connected".into(),
        });
        Ok(())
    }

    pub fn set_api_key(&self, kind: SecretKind, key: &str) -> Result<(), CoreError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(CoreError::invalid_params("key", "must not be empty"));
        }
        self.secrets
            .save_key(kind, &ApiKeyCredential { key: key.into() })
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        if kind == SecretKind::RouterKey {
            let mut sel = self.selection.lock().unwrap();
            sel.enable(Provider::Router);
            self.persist_selection(&sel);
        }
        self.events.emit(RuntimeEvent::StateChanged {
            reason: "key_saved".into(),
        });
        Ok(())
    }

    // ── Onboarding / reset ───────────────────────────────────────────────────

    pub fn onboarding_complete(&self) -> bool {
        self.selection.lock().unwrap().onboarding_complete
    }

    pub fn complete_onboarding(&self) {
        {
            let mut sel = self.selection.lock().unwrap();
            sel.onboarding_complete = true;
            self.persist_selection(&sel);
        }
        self.events.emit(RuntimeEvent::StateChanged {
            reason: "onboarding_complete".into(),
        });
    }

    /// Full reset: selection state and every secret.
    pub fn forget_everything(&self) -> Result<(), CoreError> {
        {
            let mut sel = self.selection.lock().unwrap();
            *sel = SelectionState::default();
            self.state_store
                .clear()
                .map_err(|e| CoreError::Internal(e.to_string()))?;
        }
        self.secrets
            .clear_all()
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        self.events.emit(RuntimeEvent::StateChanged {
            reason: "forget_everything".into(),
        });
        Ok(())
    }

    // ── History / skills / tools / debug ─────────────────────────────────────

    pub fn history_list(&self) -> Result<Vec<RolloutSummary>, CoreError> {
        self.rollouts
            .list()
            .map_err(|e| CoreError::Internal(e.to_string()))
    }

    pub fn history_get(&self, id: &str) -> Result<Rollout, CoreError> {
        self.rollouts.load(id).map_err(|e| match e {
            relay_rollout::RolloutError::NotFound(id) => {
                CoreError::invalid_params("id", format!("no rollout '{id}'"))
            }
            other => CoreError::Internal(other.to_string()),
        })
    }

    pub fn history_latest(&self) -> Result<Option<Rollout>, CoreError> {
        self.rollouts
            .load_latest()
            .map_err(|e| CoreError::Internal(e.to_string()))
    }

    pub fn skills_list(&self) -> &[SkillInfo] {
        &self.skills
    }

    pub fn tools_list(&self) -> Vec<ToolDeclaration> {
        self.tools.registry().declarations()
    }

    pub fn set_debug(&self, enabled: bool) {
        self.debug_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug_enabled.load(Ordering::Relaxed)
    }

    // ── Manual compression ───────────────────────────────────────────────────

    /// `/compression`: always allowed, independent of the auto trigger.
    pub fn compress_session(&self, id: Uuid) -> Result<(usize, usize), CoreError> {
        let (model_id, window, limit) = {
            let sel = self.selection.lock().unwrap();
            let Some(option) = sel.selected_model.as_deref().and_then(find_model) else {
                return Err(CoreError::NoModelSelected);
            };
            let window = context_window_tokens(&option);
            (option.id, window, auto_compact_limit(window))
        };
        let session = self.session(id)?;
        let mut s = session.lock().unwrap();
        if s.history.is_empty() {
            return Err(CoreError::invalid_params("session_id", "history is empty"));
        }
        let outcome = crate::compress::compress_history(
            &mut s.history,
            &crate::compress::CompressReason::Manual,
            &model_id,
            window,
            limit,
        );
        let row = s.push_ui(
            crate::session::UiKind::System,
            format!(
                "context compressed ({} -> {} tokens)",
                outcome.before_tokens, outcome.after_tokens
            ),
            vec![],
        );
        let session_id = s.id;
        drop(s);
        self.events.emit(RuntimeEvent::MessageAppended {
            session_id,
            message: row,
        });
        Ok((outcome.before_tokens, outcome.after_tokens))
    }
}
