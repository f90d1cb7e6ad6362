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

/// Low-level LSP client for communicating with a server process.
pub mod client;
/// Aggregates diagnostics across all active clients for one workspace.
pub mod aggregator;
/// Diagnostics strategy selection and activity monitoring.
pub mod diagnostics;
/// Glob matching for workspace watcher registrations.
pub mod glob;
/// Default handlers for server-initiated requests and notifications.
pub mod handlers;
/// High-level manager for lazy-spawning and caching LSP clients.
pub mod manager;
/// LSP message protocol definitions.
pub mod protocol;
/// Server state and progress tracking.
pub mod state;
/// Document URI helpers and language-id detection.
pub mod uri;
/// Recursive workspace file watcher.
pub mod watcher;
/// Applies LSP `WorkspaceEdit`s to files on disk.
pub mod workspace_edit;

pub use aggregator::diagnose;
pub use client::LspClient;
pub use manager::ClientManager;
pub use state::{ProgressTracker, ServerState};
pub use watcher::{PreloadPolicy, WatcherHandle, WorkspaceWatcher};
