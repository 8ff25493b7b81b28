// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-credential secret files.
//!
//! Every credential lives in its own file under `<state>/secrets/`, so each
//! can be present or absent independently: connecting the primary provider
//! must not require the router key to exist, and revoking one credential
//! never touches the others.

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::Provider;

/// Which secret file an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    PrimaryOauth,
    SecondaryOauth,
    RouterKey,
    SearchKey,
}

impl SecretKind {
    fn file_name(&self) -> &'static str {
        match self {
            SecretKind::PrimaryOauth => "primary.json",
            SecretKind::SecondaryOauth => "secondary.json",
            SecretKind::RouterKey => "router.json",
            SecretKind::SearchKey => "search.json",
        }
    }

    /// The OAuth secret kind for a provider, if it has one.
    pub fn oauth_for(provider: Provider) -> Option<SecretKind> {
        match provider {
            Provider::Primary => Some(SecretKind::PrimaryOauth),
            Provider::Secondary => Some(SecretKind::SecondaryOauth),
            Provider::Router => None,
        }
    }
}

/// Token record produced by an OAuth login flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OauthCredential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A plain API key record (router aggregator, web search).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyCredential {
    pub key: String,
}

/// Load/save gateway for secret files. Same tmp+rename discipline as the
/// selection record so a crashed write never leaves a torn secret.
#[derive(Debug, Clone)]
pub struct SecretStore {
    dir: PathBuf,
}

impl SecretStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: state_dir.into().join("secrets"),
        }
    }

    fn path(&self, kind: SecretKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn has(&self, kind: SecretKind) -> bool {
        self.path(kind).is_file()
    }

    pub fn load_oauth(&self, kind: SecretKind) -> Option<OauthCredential> {
        self.load(kind)
    }

    pub fn load_key(&self, kind: SecretKind) -> Option<ApiKeyCredential> {
        self.load(kind)
    }

    pub fn save_oauth(&self, kind: SecretKind, cred: &OauthCredential) -> anyhow::Result<()> {
        self.save(kind, cred)
    }

    pub fn save_key(&self, kind: SecretKind, cred: &ApiKeyCredential) -> anyhow::Result<()> {
        self.save(kind, cred)
    }

    /// Remove every secret file (used by the full reset command).
    pub fn clear_all(&self) -> anyhow::Result<()> {
        for kind in [
            SecretKind::PrimaryOauth,
            SecretKind::SecondaryOauth,
            SecretKind::RouterKey,
            SecretKind::SearchKey,
        ] {
            let path = self.path(kind);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("removing {}", path.display())),
            }
        }
        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, kind: SecretKind) -> Option<T> {
        let text = std::fs::read_to_string(self.path(kind)).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn save<T: Serialize>(&self, kind: SecretKind, value: &T) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating secrets directory {}", self.dir.display()))?;
        let path = self.path(kind);
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("renaming {} into place", tmp.display()))?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SecretStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn missing_secret_loads_as_none() {
        let (_dir, store) = store();
        assert!(!store.has(SecretKind::PrimaryOauth));
        assert!(store.load_oauth(SecretKind::PrimaryOauth).is_none());
    }

    #[test]
    fn oauth_round_trip() {
        let (_dir, store) = store();
        let cred = OauthCredential {
            access_token: "tok-abc".into(),
            refresh_token: Some("ref-xyz".into()),
            expires_at: None,
        };
        store.save_oauth(SecretKind::SecondaryOauth, &cred).unwrap();
        assert!(store.has(SecretKind::SecondaryOauth));
        assert_eq!(store.load_oauth(SecretKind::SecondaryOauth), Some(cred));
    }

    #[test]
    fn secrets_are_independent_files() {
        let (_dir, store) = store();
        store
            .save_key(
                SecretKind::RouterKey,
                &ApiKeyCredential { key: "rk-1".into() },
            )
            .unwrap();
        assert!(store.has(SecretKind::RouterKey));
        assert!(!store.has(SecretKind::SearchKey));
        assert!(!store.has(SecretKind::PrimaryOauth));
    }

    #[test]
    fn clear_all_removes_every_secret() {
        let (_dir, store) = store();
        store
            .save_key(SecretKind::SearchKey, &ApiKeyCredential { key: "sk".into() })
            .unwrap();
        store
            .save_oauth(
                SecretKind::PrimaryOauth,
                &OauthCredential {
                    access_token: "t".into(),
                    refresh_token: None,
                    expires_at: None,
                },
            )
            .unwrap();
        store.clear_all().unwrap();
        assert!(!store.has(SecretKind::SearchKey));
        assert!(!store.has(SecretKind::PrimaryOauth));
        // A second clear on an empty store is fine.
        store.clear_all().unwrap();
    }

    #[test]
    fn oauth_kind_mapping() {
        assert_eq!(
            SecretKind::oauth_for(Provider::Primary),
            Some(SecretKind::PrimaryOauth)
        );
        assert_eq!(
            SecretKind::oauth_for(Provider::Secondary),
            Some(SecretKind::SecondaryOauth)
        );
        assert_eq!(SecretKind::oauth_for(Provider::Router), None);
    }
}
