// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Skill discovery.
//!
//! A skill is a markdown file under `<state>/skills/`. The first H1 heading
//! names it (falling back to the file stem); the first body paragraph is the
//! description. Discovery runs once at startup.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
    pub path: PathBuf,
}

/// Scan `<state>/skills/*.md`, sorted by name.
pub fn discover_skills(state_dir: &Path) -> Vec<SkillInfo> {
    let dir = state_dir.join("skills");
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("skill")
            .to_string();
        out.push(parse_skill(&text, stem, path));
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(count = out.len(), dir = %dir.display(), "discovered skills");
    out
}

fn parse_skill(text: &str, stem: String, path: PathBuf) -> SkillInfo {
    let mut name = None;
    let mut description = None;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(heading) = line.strip_prefix("# ") {
            if name.is_none() {
                name = Some(heading.trim().to_string());
            }
        } else if !line.starts_with('#') && description.is_none() {
            description = Some(line.to_string());
        }
        if name.is_some() && description.is_some() {
            break;
        }
    }
    SkillInfo {
        name: name.unwrap_or(stem),
        description: description.unwrap_or_default(),
        path,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_yields_no_skills() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_skills(dir.path()).is_empty());
    }

    #[test]
    fn skills_parse_heading_and_first_paragraph() {
        let dir = tempfile::tempdir().unwrap();
        let skills = dir.path().join("skills");
        std::fs::create_dir_all(&skills).unwrap();
        std::fs::write(
            skills.join("review.md"),
            "# Code Review\n\nReview the current diff carefully.\n\nMore text.\n",
        )
        .unwrap();
        std::fs::write(skills.join("bare.md"), "just a description line\n").unwrap();
        std::fs::write(skills.join("notes.txt"), "not a skill").unwrap();

        let found = discover_skills(dir.path());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "Code Review");
        assert_eq!(found[0].description, "Review the current diff carefully.");
        assert_eq!(found[1].name, "bare");
        assert_eq!(found[1].description, "just a description line");
    }
}
