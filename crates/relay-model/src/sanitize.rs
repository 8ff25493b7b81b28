// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool-name sanitation for the primary provider's wire format.
//!
//! The primary provider restricts function names to ASCII letters, digits,
//! `_` and `-`, at most 64 characters, starting with a letter or `_`.
//! Runtime tool names are sanitized on the way out and mapped back on the
//! way in; the mapping is kept local to a turn and never leaks into history
//! or the UI.

use std::collections::HashMap;

const MAX_NAME_LEN: usize = 64;

/// Sanitize a single tool name into the provider's accepted character set.
pub fn sanitize_tool_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len().min(MAX_NAME_LEN));
    for c in name.chars() {
        if out.len() >= MAX_NAME_LEN {
            break;
        }
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    let starts_ok = out
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !starts_ok {
        out.insert(0, '_');
        out.truncate(MAX_NAME_LEN);
    }
    out
}

/// Bidirectional runtime-name ↔ wire-name map for one turn.
///
/// Collisions after sanitation get a numeric suffix so distinct runtime
/// tools never share a wire name.
#[derive(Debug, Default)]
pub struct ToolNameMap {
    to_wire: HashMap<String, String>,
    to_runtime: HashMap<String, String>,
}

impl ToolNameMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the map for a set of runtime tool names, in order.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut map = Self::new();
        for name in names {
            map.insert(name);
        }
        map
    }

    /// Register a runtime name, returning its (unique) wire name.
    pub fn insert(&mut self, runtime_name: &str) -> String {
        if let Some(wire) = self.to_wire.get(runtime_name) {
            return wire.clone();
        }
        let base = sanitize_tool_name(runtime_name);
        let mut wire = base.clone();
        let mut n = 2;
        while self.to_runtime.contains_key(&wire) {
            let suffix = format!("_{n}");
            let mut stem = base.clone();
            stem.truncate(MAX_NAME_LEN.saturating_sub(suffix.len()));
            wire = format!("{stem}{suffix}");
            n += 1;
        }
        self.to_wire
            .insert(runtime_name.to_string(), wire.clone());
        self.to_runtime
            .insert(wire.clone(), runtime_name.to_string());
        wire
    }

    pub fn wire_name(&self, runtime_name: &str) -> Option<&str> {
        self.to_wire.get(runtime_name).map(|s| s.as_str())
    }

    /// Resolve a wire name back to the runtime name. Unknown wire names map
    /// to themselves so replayed items stay coherent.
    pub fn runtime_name<'a>(&'a self, wire_name: &'a str) -> &'a str {
        self.to_runtime
            .get(wire_name)
            .map(|s| s.as_str())
            .unwrap_or(wire_name)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_names_pass_through() {
        assert_eq!(sanitize_tool_name("shell"), "shell");
        assert_eq!(sanitize_tool_name("read_file-v2"), "read_file-v2");
    }

    #[test]
    fn invalid_characters_become_underscores() {
        assert_eq!(sanitize_tool_name("web.search"), "web_search");
        assert_eq!(sanitize_tool_name("run code!"), "run_code_");
    }

    #[test]
    fn leading_digit_gets_underscore_prefix() {
        assert_eq!(sanitize_tool_name("3d_render"), "_3d_render");
    }

    #[test]
    fn leading_dash_gets_underscore_prefix() {
        assert_eq!(sanitize_tool_name("-tool"), "_-tool");
    }

    #[test]
    fn long_names_truncate_to_64() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_tool_name(&long).len(), 64);
    }

    #[test]
    fn map_round_trips_names() {
        let mut map = ToolNameMap::new();
        let wire = map.insert("web.search");
        assert_eq!(wire, "web_search");
        assert_eq!(map.wire_name("web.search"), Some("web_search"));
        assert_eq!(map.runtime_name("web_search"), "web.search");
    }

    #[test]
    fn colliding_names_get_numeric_suffixes() {
        let mut map = ToolNameMap::new();
        assert_eq!(map.insert("web.search"), "web_search");
        assert_eq!(map.insert("web search"), "web_search_2");
        assert_eq!(map.insert("web+search"), "web_search_3");
        assert_eq!(map.runtime_name("web_search_2"), "web search");
    }

    #[test]
    fn insert_is_idempotent_per_runtime_name() {
        let mut map = ToolNameMap::new();
        assert_eq!(map.insert("shell"), "shell");
        assert_eq!(map.insert("shell"), "shell");
    }

    #[test]
    fn unknown_wire_name_maps_to_itself() {
        let map = ToolNameMap::new();
        assert_eq!(map.runtime_name("mystery"), "mystery");
    }

    #[test]
    fn suffixed_collision_stays_within_length_limit() {
        let mut map = ToolNameMap::new();
        let a = "x".repeat(70);
        let b = format!("{}!", "x".repeat(70));
        let w1 = map.insert(&a);
        let w2 = map.insert(&b);
        assert_ne!(w1, w2);
        assert!(w1.len() <= 64 && w2.len() <= 64);
    }
}
