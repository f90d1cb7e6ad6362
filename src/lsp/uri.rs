// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Document URI helpers and language-id detection.

use anyhow::{Result, anyhow};
use lsp_types::Uri;
use std::path::{Path, PathBuf};

/// Converts an absolute filesystem path to a `file://` URI.
///
/// On Windows, uppercases the drive letter and ensures a leading slash
/// before the drive (`file:///C:/Users/...`), matching the convention
/// most language servers expect.
pub fn path_to_uri(path: &Path) -> Result<Uri> {
    let display = normalize_for_uri(path);
    format!("file://{display}")
        .parse()
        .map_err(|e| anyhow!("invalid path for URI {}: {e}", path.display()))
}

#[cfg(windows)]
fn normalize_for_uri(path: &Path) -> String {
    let mut s = path.display().to_string().replace('\\', "/");
    if let Some(colon) = s.find(':') {
        if colon == 1 {
            s.replace_range(0..1, &s[0..1].to_uppercase());
        }
    }
    if !s.starts_with('/') {
        s.insert(0, '/');
    }
    s
}

#[cfg(not(windows))]
fn normalize_for_uri(path: &Path) -> String {
    path.display().to_string()
}

/// Converts a `file://` URI back to a filesystem path.
pub fn uri_to_path(uri: &Uri) -> Result<PathBuf> {
    let url = url::Url::parse(uri.as_str())
        .map_err(|e| anyhow!("invalid URI {}: {e}", uri.as_str()))?;
    url.to_file_path()
        .map_err(|()| anyhow!("not a file URI: {}", uri.as_str()))
}

/// Detects the LSP language identifier from a file's extension.
///
/// Unknown extensions yield an empty string — still a valid (if useless)
/// language id to send in `didOpen`, per the wire contract.
#[must_use]
pub fn detect_language_id(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match ext.as_str() {
        "go" => "go",
        "rs" => "rust",
        "py" | "pyi" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "sh" | "bash" | "zsh" => "shellscript",
        "yaml" | "yml" => "yaml",
        "json" | "jsonc" => "json",
        "md" | "markdown" => "markdown",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "less" => "less",
        "toml" => "toml",
        "lua" => "lua",
        "sql" => "sql",
        "kt" | "kts" => "kotlin",
        "swift" => "swift",
        "scala" => "scala",
        "ex" | "exs" => "elixir",
        "erl" => "erlang",
        "hs" => "haskell",
        "clj" | "cljs" => "clojure",
        "dart" => "dart",
        "zig" => "zig",
        "vue" => "vue",
        "graphql" | "gql" => "graphql",
        "proto" => "proto3",
        "dockerfile" => "dockerfile",
        "xml" => "xml",
        "vim" => "viml",
        "r" => "r",
        "pl" | "pm" => "perl",
        "ps1" => "powershell",
        "tf" => "terraform",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_languages() {
        assert_eq!(detect_language_id(Path::new("main.go")), "go");
        assert_eq!(detect_language_id(Path::new("lib.rs")), "rust");
        assert_eq!(detect_language_id(Path::new("App.tsx")), "typescriptreact");
        assert_eq!(detect_language_id(Path::new("noext")), "");
    }

    #[test]
    fn roundtrips_unix_path_through_uri() -> Result<()> {
        let path = PathBuf::from("/tmp/project/main.go");
        let uri = path_to_uri(&path)?;
        let back = uri_to_path(&uri)?;
        assert_eq!(back, path);
        Ok(())
    }
}
