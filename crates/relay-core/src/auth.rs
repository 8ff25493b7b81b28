// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Login flow seam.
//!
//! Interactive OAuth (device code, browser) is an external collaborator:
//! the runtime only needs something that eventually yields a credential and
//! narrates its progress through `auth.flow.*` events. The default
//! implementation reads tokens from the environment so headless deployments
//! work without a browser.

use async_trait::async_trait;

use relay_config::{OauthCredential, Provider};

use crate::events::{EventBus, RuntimeEvent};

/// Black-box OAuth login. Implementations emit `auth.flow.*` events on the
/// bus as they progress and return the final token record.
#[async_trait]
pub trait LoginFlow: Send + Sync {
    async fn connect(
        &self,
        provider: Provider,
        events: &EventBus,
    ) -> anyhow::Result<OauthCredential>;
}

/// Environment-backed login: `RELAY_PRIMARY_TOKEN` / `RELAY_SECONDARY_TOKEN`.
pub struct EnvLoginFlow;

impl EnvLoginFlow {
    fn var_for(provider: Provider) -> &'static str {
        match provider {
            Provider::Primary => "RELAY_PRIMARY_TOKEN",
            Provider::Secondary => "RELAY_SECONDARY_TOKEN",
            Provider::Router => "RELAY_ROUTER_TOKEN",
        }
    }
}

#[async_trait]
impl LoginFlow for EnvLoginFlow {
    async fn connect(
        &self,
        provider: Provider,
        events: &EventBus,
    ) -> anyhow::Result<OauthCredential> {
        events.emit(RuntimeEvent::AuthFlowStarted { provider });
        let var = Self::var_for(provider);
        match std::env::var(var) {
            Ok(token) if !token.trim().is_empty() => {
                events.emit(RuntimeEvent::AuthFlowCompleted { provider });
                Ok(OauthCredential {
                    access_token: token,
                    refresh_token: None,
                    expires_at: None,
                })
            }
            _ => {
                let message = format!("no interactive login available; set {var}");
                events.emit(RuntimeEvent::AuthFlowFailed {
                    provider,
                    message: message.clone(),
                });
                anyhow::bail!(message)
            }
        }
    }
}

/// Test login flow that always yields a fixed token.
pub struct StaticLoginFlow(pub String);

#[async_trait]
impl LoginFlow for StaticLoginFlow {
    async fn connect(
        &self,
        provider: Provider,
        events: &EventBus,
    ) -> anyhow::Result<OauthCredential> {
        events.emit(RuntimeEvent::AuthFlowStarted { provider });
        events.emit(RuntimeEvent::AuthFlowCompleted { provider });
        Ok(OauthCredential {
            access_token: self.0.clone(),
            refresh_token: None,
            expires_at: None,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
