// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Glob matching for `workspace/didChangeWatchedFiles` registrations.
//!
//! Implements the subset of glob syntax LSP servers actually register:
//! `**` (directory-spanning wildcard), `*.ext` extension matches, and a
//! single `{a,b,c}` alternation group. Patterns that don't fit one of
//! these shapes fall back to a plain shell-style glob.

use lsp_types::{FileSystemWatcher, Uri, WatchKind};

use super::uri::uri_to_path;

/// Default watch-kind bitmask when a registration doesn't specify one:
/// create | change | delete.
pub const DEFAULT_WATCH_KIND: WatchKind = WatchKind::from_bits_truncate(0b111);

/// A single registered watcher, resolved to a matchable form.
pub struct CompiledWatcher {
    pattern: CompiledPattern,
    pub kind: WatchKind,
}

enum CompiledPattern {
    Plain(String),
    Relative { base: String, pattern: String },
}

impl CompiledWatcher {
    /// Compiles a raw LSP `FileSystemWatcher` registration.
    #[must_use]
    pub fn compile(watcher: &FileSystemWatcher) -> Self {
        let kind = watcher.kind.unwrap_or(DEFAULT_WATCH_KIND);
        let pattern = match &watcher.glob_pattern {
            lsp_types::GlobPattern::String(s) => CompiledPattern::Plain(s.clone()),
            lsp_types::GlobPattern::Relative(rp) => {
                let base = match &rp.base_uri {
                    lsp_types::OneOf::Left(wf) => wf.uri.as_str().to_string(),
                    lsp_types::OneOf::Right(uri) => uri.as_str().to_string(),
                };
                let base = base_uri_to_path_string(&base);
                CompiledPattern::Relative {
                    base,
                    pattern: rp.pattern.clone(),
                }
            }
        };
        Self { pattern, kind }
    }

    /// Returns true if `path` (absolute filesystem path) is matched by
    /// this registration and the registration cares about `event_kind`.
    #[must_use]
    pub fn matches(&self, path: &str, event_kind: WatchKind) -> bool {
        if !self.kind.intersects(event_kind) {
            return false;
        }
        match &self.pattern {
            CompiledPattern::Plain(pattern) => {
                let basename = path.rsplit('/').next().unwrap_or(path);
                matches_glob(pattern, path) || matches_glob(pattern, basename)
            }
            CompiledPattern::Relative { base, pattern } => {
                path.strip_prefix(base.as_str())
                    .map(|rest| rest.trim_start_matches('/'))
                    .is_some_and(|rel| matches_glob(pattern, rel))
            }
        }
    }
}

fn base_uri_to_path_string(uri: &str) -> String {
    uri.parse::<Uri>()
        .ok()
        .and_then(|u| uri_to_path(&u).ok())
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|| uri.to_string())
}

/// Matches `path` (forward-slash separated) against `pattern`.
#[must_use]
pub fn matches_glob(pattern: &str, path: &str) -> bool {
    if let Some((prefix, rest)) = split_single_alternation(pattern) {
        let (group, suffix) = rest;
        return group
            .split(',')
            .any(|alt| matches_glob(&format!("{prefix}{alt}{suffix}"), path));
    }

    if let Some(rest) = pattern.strip_prefix("**/") {
        if let Some(ext) = simple_extension_pattern(rest) {
            return path.ends_with(&ext);
        }
        if path.ends_with(rest) {
            return true;
        }
        return path
            .split('/')
            .enumerate()
            .any(|(i, _)| path.split('/').skip(i).collect::<Vec<_>>().join("/") == *rest)
            || path.ends_with(rest);
    }

    if let Some((prefix, suffix)) = pattern.split_once("**") {
        if !prefix.is_empty() || !suffix.is_empty() {
            return path.starts_with(prefix) && path.ends_with(suffix);
        }
    }

    if let Some(ext) = simple_extension_pattern(pattern) {
        return path.ends_with(&ext);
    }

    shell_glob(pattern, path)
}

fn simple_extension_pattern(pattern: &str) -> Option<String> {
    pattern
        .strip_prefix('*')
        .filter(|rest| !rest.contains('*') && !rest.contains('/'))
        .map(ToString::to_string)
}

/// Finds a single top-level `{a,b,c}` group, returning (prefix, (group, suffix)).
fn split_single_alternation(pattern: &str) -> Option<(&str, (&str, &str))> {
    let open = pattern.find('{')?;
    let close = pattern[open..].find('}')? + open;
    let prefix = &pattern[..open];
    let group = &pattern[open + 1..close];
    let suffix = &pattern[close + 1..];
    Some((prefix, (group, suffix)))
}

/// Minimal shell-style glob supporting `*` (any run, no `/`) and `?`.
fn shell_glob(pattern: &str, path: &str) -> bool {
    fn helper(p: &[u8], s: &[u8]) -> bool {
        match (p.first(), s.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                helper(&p[1..], s) || (!s.is_empty() && helper(p, &s[1..]))
            }
            (Some(b'?'), Some(_)) => helper(&p[1..], &s[1..]),
            (Some(pc), Some(sc)) if pc == sc => helper(&p[1..], &s[1..]),
            _ => false,
        }
    }
    helper(pattern.as_bytes(), path.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_star_extension() {
        assert!(matches_glob("**/*.go", "/a/b/c.go"));
        assert!(matches_glob("**/*.go", "c.go"));
        assert!(!matches_glob("**/*.go", "c.goo"));
    }

    #[test]
    fn alternation_extensions() {
        let pattern = "*.{go,mod,sum}";
        assert!(matches_glob(pattern, "go.mod"));
        assert!(matches_glob(pattern, "go.sum"));
        assert!(matches_glob(pattern, "main.go"));
        assert!(!matches_glob(pattern, "main.rs"));
    }

    #[test]
    fn embedded_double_star() {
        assert!(matches_glob("src/**/test.rs", "src/a/b/test.rs"));
        assert!(!matches_glob("src/**/test.rs", "lib/a/b/test.rs"));
    }

    #[test]
    fn relative_pattern_scopes_to_base() {
        let watcher = CompiledWatcher {
            pattern: CompiledPattern::Relative {
                base: "/workspace".to_string(),
                pattern: "src/**/*.rs".to_string(),
            },
            kind: DEFAULT_WATCH_KIND,
        };
        assert!(watcher.matches("/workspace/src/x/y.rs", WatchKind::Change));
        assert!(!watcher.matches("/other/src/x/y.rs", WatchKind::Change));
    }

    #[test]
    fn no_patterns_matches_everything_by_default_kind() {
        assert_eq!(DEFAULT_WATCH_KIND, WatchKind::Create | WatchKind::Change | WatchKind::Delete);
    }
}
