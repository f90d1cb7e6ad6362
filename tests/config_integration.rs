// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for configuration loading and merging.
//!
//! Verifies that settings are layered in the documented priority order:
//! defaults, then user config directory, then an explicit file, then
//! environment variables.

use anyhow::{Context, Result};
use lantern_lsp::config::Config;
use std::io::Write;

#[test]
fn defaults_apply_with_no_sources() -> Result<()> {
    let config = Config::load(None)?;
    assert_eq!(config.idle_timeout, 300);
    assert!(config.server.is_empty());
    Ok(())
}

#[test]
fn explicit_file_overrides_defaults() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        r#"
        idle_timeout = 42

        [server.rust]
        command = "rust-analyzer"
        args = []
        "#
    )?;

    let config = Config::load(Some(file.path().to_path_buf()))?;
    assert_eq!(config.idle_timeout, 42);
    let rust = config.server.get("rust").context("rust server missing")?;
    assert_eq!(rust.command, "rust-analyzer");
    Ok(())
}

#[test]
fn missing_server_lookup_is_none() -> Result<()> {
    let config = Config::load(None)?;
    assert!(config.server.get("nonexistent-language").is_none());
    Ok(())
}
