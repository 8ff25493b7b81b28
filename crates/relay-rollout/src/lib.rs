// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Append-only conversation rollouts.
//!
//! Every chat session gets one rollout file under the store directory:
//!
//!   `<YYYY-MM-DDTHH-MM-SSZ>_<session-uuid>.jsonl`
//!
//! The first line is a header record; every subsequent line is one message.
//! Rollouts are enumerable by listing the directory and loadable by path,
//! by session id (newest file for that session), or as the latest overall.
//! Writing is best-effort from the caller's point of view: a failed create
//! or append is reported, never fatal to the owning turn.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("rollout i/o error at '{0}': {1}")]
    Io(String, #[source] std::io::Error),

    #[error("rollout encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no rollout found for '{0}'")]
    NotFound(String),

    #[error("rollout file '{0}' is missing its header line")]
    MissingHeader(String),
}

/// First line of every rollout file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutHeader {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One persisted message line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutMessage {
    /// `user` or `assistant`.
    pub role: String,
    pub text: String,
    #[serde(default)]
    pub images: usize,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RolloutLine {
    Header(RolloutHeader),
    Message(RolloutMessage),
}

/// A fully loaded rollout.
#[derive(Debug, Clone)]
pub struct Rollout {
    pub header: RolloutHeader,
    pub messages: Vec<RolloutMessage>,
    pub path: PathBuf,
}

/// Listing entry: enough to show a picker without loading message bodies.
#[derive(Debug, Clone, Serialize)]
pub struct RolloutSummary {
    /// File stem, usable as an id with `load`.
    pub id: String,
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
    pub message_count: usize,
}

/// Open append handle for one session's rollout.
pub struct RolloutWriter {
    path: PathBuf,
    file: File,
}

impl RolloutWriter {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, message: &RolloutMessage) -> Result<(), RolloutError> {
        let line = serde_json::to_string(&RolloutLine::Message(message.clone()))?;
        writeln!(self.file, "{line}")
            .map_err(|e| RolloutError::Io(self.path.display().to_string(), e))?;
        self.file
            .flush()
            .map_err(|e| RolloutError::Io(self.path.display().to_string(), e))
    }
}

/// The on-disk store: one directory of rollout files.
#[derive(Debug, Clone)]
pub struct RolloutStore {
    dir: PathBuf,
}

impl RolloutStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: state_dir.into().join("rollouts"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a fresh rollout file for a session and write its header.
    pub fn create(&self, session_id: Uuid) -> Result<RolloutWriter, RolloutError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| RolloutError::Io(self.dir.display().to_string(), e))?;
        let created_at = Utc::now();
        let stamp = created_at.format("%Y-%m-%dT%H-%M-%SZ");
        let path = self.dir.join(format!("{stamp}_{session_id}.jsonl"));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| RolloutError::Io(path.display().to_string(), e))?;
        let header = RolloutLine::Header(RolloutHeader {
            session_id,
            created_at,
        });
        writeln!(file, "{}", serde_json::to_string(&header)?)
            .map_err(|e| RolloutError::Io(path.display().to_string(), e))?;
        debug!(path = %path.display(), "created rollout");
        Ok(RolloutWriter { path, file })
    }

    /// All rollouts, newest first.
    pub fn list(&self) -> Result<Vec<RolloutSummary>, RolloutError> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(RolloutError::Io(self.dir.display().to_string(), e)),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Ok(rollout) = self.load_path(&path) {
                out.push(RolloutSummary {
                    id: path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or_default()
                        .to_string(),
                    session_id: rollout.header.session_id,
                    created_at: rollout.header.created_at,
                    path,
                    message_count: rollout.messages.len(),
                });
            }
        }
        out.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(out)
    }

    /// Load by file path.
    pub fn load_path(&self, path: &Path) -> Result<Rollout, RolloutError> {
        let file =
            File::open(path).map_err(|e| RolloutError::Io(path.display().to_string(), e))?;
        let mut header: Option<RolloutHeader> = None;
        let mut messages = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| RolloutError::Io(path.display().to_string(), e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RolloutLine>(&line)? {
                RolloutLine::Header(h) => header = Some(h),
                RolloutLine::Message(m) => messages.push(m),
            }
        }
        let header =
            header.ok_or_else(|| RolloutError::MissingHeader(path.display().to_string()))?;
        Ok(Rollout {
            header,
            messages,
            path: path.to_path_buf(),
        })
    }

    /// Load by listing id (file stem) or by session id.
    pub fn load(&self, id: &str) -> Result<Rollout, RolloutError> {
        let by_stem = self.dir.join(format!("{id}.jsonl"));
        if by_stem.is_file() {
            return self.load_path(&by_stem);
        }
        if let Ok(session_id) = id.parse::<Uuid>() {
            return self.load_by_session(session_id);
        }
        Err(RolloutError::NotFound(id.to_string()))
    }

    /// Newest rollout for the given session.
    pub fn load_by_session(&self, session_id: Uuid) -> Result<Rollout, RolloutError> {
        self.list()?
            .into_iter()
            .find(|s| s.session_id == session_id)
            .map(|s| self.load_path(&s.path))
            .transpose()?
            .ok_or_else(|| RolloutError::NotFound(session_id.to_string()))
    }

    /// Newest rollout overall, if any exist.
    pub fn load_latest(&self) -> Result<Option<Rollout>, RolloutError> {
        match self.list()?.first() {
            Some(summary) => Ok(Some(self.load_path(&summary.path)?)),
            None => Ok(None),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, RolloutStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RolloutStore::new(dir.path());
        (dir, store)
    }

    fn msg(role: &str, text: &str) -> RolloutMessage {
        RolloutMessage {
            role: role.into(),
            text: text.into(),
            images: 0,
            at: Utc::now(),
        }
    }

    #[test]
    fn create_append_load_round_trip() {
        let (_dir, store) = store();
        let sid = Uuid::new_v4();
        let mut writer = store.create(sid).unwrap();
        writer.append(&msg("user", "hi")).unwrap();
        writer.append(&msg("assistant", "hello")).unwrap();

        let rollout = store.load_by_session(sid).unwrap();
        assert_eq!(rollout.header.session_id, sid);
        assert_eq!(rollout.messages.len(), 2);
        assert_eq!(rollout.messages[0].role, "user");
        assert_eq!(rollout.messages[1].text, "hello");
    }

    #[test]
    fn list_is_empty_without_directory() {
        let (_dir, store) = store();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn list_reports_message_counts() {
        let (_dir, store) = store();
        let sid = Uuid::new_v4();
        let mut writer = store.create(sid).unwrap();
        writer.append(&msg("user", "one")).unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_id, sid);
        assert_eq!(listed[0].message_count, 1);
    }

    #[test]
    fn load_by_stem_id() {
        let (_dir, store) = store();
        let sid = Uuid::new_v4();
        store.create(sid).unwrap();
        let id = store.list().unwrap()[0].id.clone();
        let rollout = store.load(&id).unwrap();
        assert_eq!(rollout.header.session_id, sid);
    }

    #[test]
    fn load_by_session_uuid_string() {
        let (_dir, store) = store();
        let sid = Uuid::new_v4();
        store.create(sid).unwrap();
        let rollout = store.load(&sid.to_string()).unwrap();
        assert_eq!(rollout.header.session_id, sid);
    }

    #[test]
    fn load_unknown_id_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.load("missing"),
            Err(RolloutError::NotFound(_))
        ));
    }

    #[test]
    fn load_latest_returns_none_on_empty_store() {
        let (_dir, store) = store();
        assert!(store.load_latest().unwrap().is_none());
    }

    #[test]
    fn file_without_header_is_rejected() {
        let (dir, store) = store();
        std::fs::create_dir_all(store.dir()).unwrap();
        let path = store.dir().join("2026-01-01T00-00-00Z_bad.jsonl");
        std::fs::write(
            &path,
            "{\"kind\":\"message\",\"role\":\"user\",\"text\":\"x\",\"at\":\"2026-01-01T00:00:00Z\"}\n",
        )
        .unwrap();
        assert!(matches!(
            store.load_path(&path),
            Err(RolloutError::MissingHeader(_))
        ));
        drop(dir);
    }
}
