/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! `lanternd`: spawns the configured language servers for a workspace,
//! waits for them to settle, and prints their diagnostics.
//!
//! This is a thin demonstration harness over [`lantern_lsp::lsp`] — the
//! multi-server client core is the point of this crate, not the CLI
//! wrapped around it.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]
#![allow(clippy::print_stderr, reason = "CLI tool needs to output to stderr")]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lantern_lsp::config::Config;
use lantern_lsp::lsp::{self, ClientManager};

/// Spawns language servers over a workspace and prints their diagnostics.
#[derive(Parser, Debug)]
#[command(name = "lanternd")]
#[command(about = "Spawns LSP servers, waits for readiness, and prints diagnostics")]
struct Args {
    /// Workspace root directory.
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Path to configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// LSP servers to spawn in "lang:command" format (e.g., "rust:rust-analyzer").
    /// Can be specified multiple times; overrides/extends the config file.
    #[arg(short, long = "lsp")]
    lsps: Vec<String>,

    /// Limit the report to diagnostics for this file.
    #[arg(short, long)]
    file: Option<PathBuf>,
}

/// Entry point for the `lanternd` binary.
///
/// # Errors
///
/// Returns an error if configuration loading, server spawning, or the
/// workspace root fails to resolve.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lantern_lsp=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::load(args.config.clone())?;
    for lsp_spec in &args.lsps {
        let (lang, command_str) = lsp_spec
            .split_once(':')
            .with_context(|| format!("Invalid LSP spec: {lsp_spec}. Expected 'lang:command'"))?;
        let mut parts = command_str.trim().split_whitespace();
        let program = parts
            .next()
            .context("command cannot be empty")?
            .to_string();
        let cmd_args: Vec<String> = parts.map(std::string::ToString::to_string).collect();
        config.server.insert(
            lang.trim().to_string(),
            lantern_lsp::config::ServerConfig {
                command: program,
                args: cmd_args,
                initialization_options: None,
            },
        );
    }

    let root = args.root.canonicalize().context("resolving workspace root")?;
    info!(root = %root.display(), "starting lantern");

    let manager = Arc::new(ClientManager::new(config.clone(), root.clone()));

    for lang in config.server.keys() {
        let client = manager.get_client(lang).await?;
        if let Some(file) = &args.file {
            let mut client = client.lock().await;
            client.open_file(file).await.ok();
        }
        info!(language = %lang, "server ready");
    }

    let report = lsp::diagnose(&manager, args.file.as_deref()).await;
    println!("{report}");

    manager.shutdown_all().await;
    Ok(())
}
