// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Recursive workspace file watcher.
//!
//! Bridges the synchronous `notify` crate into async land via an
//! unbounded channel (the standard pattern for using `notify` from
//! tokio code), then drives the didOpen/didChange/didChangeWatchedFiles
//! traffic for files under a workspace root.

use lsp_types::{FileChangeType, FileEvent, FileSystemWatcher, Uri, WatchKind};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use super::client::LspClient;
use super::glob::CompiledWatcher;
use super::uri::path_to_uri;

const DEBOUNCE_WRITE_CREATE: Duration = Duration::from_millis(300);
const MAX_WATCHED_SIZE: u64 = 5 * 1024 * 1024;
/// How long to wait for the server to register watchers before giving up
/// on the eager bulk-preload pass.
const REGISTRATION_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const REGISTRATION_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Yield to the runtime after opening this many files in the bulk preload
/// pass, so a large workspace doesn't flood the server or starve the live
/// event loop.
const PRELOAD_YIELD_INTERVAL: usize = 25;

const EXCLUDED_DIRS: &[&str] = &[
    "node_modules", "dist", "build", "out", "bin", "coverage", "target", "vendor", ".idea",
    ".vscode", ".cache", ".git",
];

const EXCLUDED_EXTENSIONS: &[&str] = &[
    "swp", "tmp", "log", "o", "so", "dll", "exe", "lock", "png", "jpg", "jpeg", "gif", "ico",
    "mp4", "mov", "wasm", "pdf", "zip", "tar", "gz",
];

/// Shared registration state for one workspace's watcher, handed to the
/// owning client's handler registry at construction time — never a
/// process-wide callback.
#[derive(Clone)]
pub struct WatcherHandle {
    watchers: Arc<RwLock<Vec<CompiledWatcher>>>,
}

impl WatcherHandle {
    #[must_use]
    pub fn new() -> Self {
        Self { watchers: Arc::new(RwLock::new(Vec::new())) }
    }

    /// Additively registers watchers from a `client/registerCapability`
    /// call. Registrations are never revoked in this design.
    pub fn register_watchers(&self, raw: Vec<FileSystemWatcher>) {
        let compiled: Vec<CompiledWatcher> = raw.iter().map(CompiledWatcher::compile).collect();
        if let Ok(mut guard) = self.watchers.write() {
            guard.extend(compiled);
        }
    }

    fn subscribed(&self, path: &str, kind: WatchKind) -> bool {
        self.watchers
            .read()
            .map(|g| g.iter().any(|w| w.matches(path, kind)))
            .unwrap_or(false)
    }

    fn has_watchers(&self) -> bool {
        self.watchers.read().map(|g| !g.is_empty()).unwrap_or(false)
    }
}

impl Default for WatcherHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Which preload policy a server type gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadPolicy {
    /// Open up to `cap` files eagerly after watchers are registered.
    Eager { cap: usize },
    /// Never preload; rely entirely on open-on-demand.
    Lazy,
}

#[derive(Debug, Default)]
struct DebounceState {
    generation: AtomicU64,
}

/// Runs the recursive filesystem watch loop for one workspace, coupled
/// to one client.
pub struct WorkspaceWatcher {
    root: PathBuf,
}

impl WorkspaceWatcher {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Spawns the watcher's background task. Returns the handle that
    /// should be attached to the client before `initialize` so that
    /// `registerCapability` callbacks land here.
    pub fn spawn(
        self,
        client: Arc<Mutex<LspClient>>,
        handle: WatcherHandle,
        policy: PreloadPolicy,
    ) -> tokio::task::JoinHandle<()> {
        let (tx, rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

        let mut watcher = match notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        }) {
            Ok(w) => w,
            Err(e) => {
                warn!("failed to create filesystem watcher: {e}");
                return tokio::spawn(async {});
            }
        };

        if let Err(e) = watcher.watch(&self.root, RecursiveMode::Recursive) {
            warn!("failed to watch {}: {e}", self.root.display());
        }

        tokio::spawn(Self::run(self.root, watcher, rx, client, handle, policy))
    }

    async fn run(
        root: PathBuf,
        // kept alive for the duration of the task; dropping it stops watching
        _watcher: RecommendedWatcher,
        mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
        client: Arc<Mutex<LspClient>>,
        handle: WatcherHandle,
        policy: PreloadPolicy,
    ) {
        let debounce: Arc<Mutex<HashMap<(String, bool), Arc<DebounceState>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let preloaded = Arc::new(AtomicUsize::new(0));

        if let PreloadPolicy::Eager { cap } = policy {
            tokio::spawn(Self::preload_tree(
                root.clone(),
                client.clone(),
                handle.clone(),
                cap,
                preloaded.clone(),
            ));
        }

        while let Some(res) = rx.recv().await {
            let event = match res {
                Ok(e) => e,
                Err(e) => {
                    warn!("filesystem watch error: {e}");
                    continue;
                }
            };

            if let EventKind::Modify(ModifyKind::Name(mode)) = &event.kind {
                Self::handle_rename(mode, &event.paths, &root, &client, &handle, &debounce).await;
                continue;
            }

            for path in &event.paths {
                if is_excluded_dir_component(path, &root) {
                    continue;
                }

                match &event.kind {
                    EventKind::Create(_) => {
                        if path.is_dir() {
                            continue; // notify's recursive mode already covers new subdirs
                        }
                        if is_excluded_file(path) {
                            continue;
                        }
                        Self::handle_create(path, &client, &policy, &preloaded).await;
                        Self::debounce_watched_event(
                            path,
                            FileChangeType::CREATED,
                            &handle,
                            &debounce,
                            &client,
                        )
                        .await;
                    }
                    EventKind::Modify(_) => {
                        if is_excluded_file(path) {
                            continue;
                        }
                        Self::handle_write(path, &client, &handle, &debounce).await;
                    }
                    EventKind::Remove(_) => {
                        Self::handle_remove(path, &client, &handle).await;
                    }
                    _ => {}
                }
            }
        }

        debug!("workspace watcher loop exiting for {}", root.display());
    }

    async fn handle_create(
        path: &Path,
        client: &Arc<Mutex<LspClient>>,
        policy: &PreloadPolicy,
        preloaded: &Arc<AtomicUsize>,
    ) {
        let should_open = match policy {
            PreloadPolicy::Lazy => false,
            PreloadPolicy::Eager { cap } => preloaded.load(Ordering::SeqCst) < *cap,
        };
        if !should_open {
            return;
        }
        let mut client = client.lock().await;
        if client.open_file(path).await.is_ok() {
            preloaded.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Waits for the server's `client/registerCapability` watchers, then
    /// bulk-opens the existing tree: priority filenames first (bypassing
    /// `cap`), then up to `cap` more files from [`initial_file_list`],
    /// yielding periodically so this doesn't starve the live event loop
    /// or flood the server with opens.
    async fn preload_tree(
        root: PathBuf,
        client: Arc<Mutex<LspClient>>,
        handle: WatcherHandle,
        cap: usize,
        preloaded: Arc<AtomicUsize>,
    ) {
        if !Self::wait_for_registration(&handle).await {
            return;
        }

        let priority = { client.lock().await.priority_filenames() };
        for name in priority {
            let path = root.join(name);
            if path.is_file() {
                let mut client = client.lock().await;
                let _ = client.open_file(&path).await;
            }
        }

        let mut opened_since_yield = 0usize;
        for path in initial_file_list(&root) {
            if preloaded.load(Ordering::SeqCst) >= cap {
                break;
            }
            let opened = {
                let mut client = client.lock().await;
                if client.is_open(&path).await {
                    continue;
                }
                client.open_file(&path).await.is_ok()
            };
            if opened {
                preloaded.fetch_add(1, Ordering::SeqCst);
                opened_since_yield += 1;
                if opened_since_yield >= PRELOAD_YIELD_INTERVAL {
                    opened_since_yield = 0;
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    async fn wait_for_registration(handle: &WatcherHandle) -> bool {
        let deadline = tokio::time::Instant::now() + REGISTRATION_WAIT_TIMEOUT;
        loop {
            if handle.has_watchers() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(REGISTRATION_POLL_INTERVAL).await;
        }
    }

    /// Handles a `notify` rename event as a delete of the old path
    /// followed by, if the new path exists, a debounced create — never
    /// as a plain write against a path that no longer has matching
    /// content.
    async fn handle_rename(
        mode: &RenameMode,
        paths: &[PathBuf],
        root: &Path,
        client: &Arc<Mutex<LspClient>>,
        handle: &WatcherHandle,
        debounce: &Arc<Mutex<HashMap<(String, bool), Arc<DebounceState>>>>,
    ) {
        let is_creatable = |path: &Path| !is_excluded_dir_component(path, root) && !is_excluded_file(path);

        match mode {
            RenameMode::Both if paths.len() == 2 => {
                let (old, new) = (&paths[0], &paths[1]);
                if !is_excluded_dir_component(old, root) {
                    Self::handle_remove(old, client, handle).await;
                }
                if is_creatable(new) {
                    Self::debounce_watched_event(new, FileChangeType::CREATED, handle, debounce, client)
                        .await;
                }
            }
            RenameMode::From => {
                for path in paths {
                    if !is_excluded_dir_component(path, root) {
                        Self::handle_remove(path, client, handle).await;
                    }
                }
            }
            RenameMode::To => {
                for path in paths {
                    if is_creatable(path) {
                        Self::debounce_watched_event(
                            path,
                            FileChangeType::CREATED,
                            handle,
                            debounce,
                            client,
                        )
                        .await;
                    }
                }
            }
            _ => {
                // RenameMode::Any/Other gives no reliable old/new split;
                // treat each path as a delete, followed by a create if
                // it still exists on disk.
                for path in paths {
                    if is_excluded_dir_component(path, root) {
                        continue;
                    }
                    Self::handle_remove(path, client, handle).await;
                    if is_creatable(path) && path.exists() {
                        Self::debounce_watched_event(
                            path,
                            FileChangeType::CREATED,
                            handle,
                            debounce,
                            client,
                        )
                        .await;
                    }
                }
            }
        }
    }

    async fn handle_write(
        path: &Path,
        client: &Arc<Mutex<LspClient>>,
        handle: &WatcherHandle,
        debounce: &Arc<Mutex<HashMap<(String, bool), Arc<DebounceState>>>>,
    ) {
        let is_open = {
            let client = client.lock().await;
            client.is_open(path).await
        };
        if is_open {
            let mut client = client.lock().await;
            if let Err(e) = client.notify_change(path).await {
                warn!("failed to send didChange for {}: {e}", path.display());
            }
            return;
        }

        Self::debounce_watched_event(path, FileChangeType::CHANGED, handle, debounce, client).await;
    }

    async fn handle_remove(path: &Path, client: &Arc<Mutex<LspClient>>, handle: &WatcherHandle) {
        let Ok(uri) = path_to_uri(path) else { return };
        {
            let client = client.lock().await;
            client.clear_diagnostics_for_uri(&uri).await;
        }
        let path_str = path.to_string_lossy().replace('\\', "/");
        if handle.subscribed(&path_str, WatchKind::Delete) {
            let client = client.lock().await;
            client
                .send_watched_files(vec![FileEvent { uri, typ: FileChangeType::DELETED }])
                .await;
        }
    }

    /// Deletes bypass debouncing entirely; creates and
    /// changes are coalesced per `{uri, kind}` key so a burst of writes
    /// produces one notification.
    async fn debounce_watched_event(
        path: &Path,
        change_type: FileChangeType,
        handle: &WatcherHandle,
        debounce: &Arc<Mutex<HashMap<(String, bool), Arc<DebounceState>>>>,
        client: &Arc<Mutex<LspClient>>,
    ) {
        let path_str = path.to_string_lossy().replace('\\', "/");
        let kind = if change_type == FileChangeType::CREATED {
            WatchKind::Create
        } else {
            WatchKind::Change
        };
        if !handle.subscribed(&path_str, kind) {
            return;
        }

        let Ok(uri) = path_to_uri(path) else { return };
        let key = (path_str, change_type == FileChangeType::CREATED);
        let state = {
            let mut map = debounce.lock().await;
            map.entry(key).or_insert_with(|| Arc::new(DebounceState::default())).clone()
        };
        let generation = state.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let client = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE_WRITE_CREATE).await;
            if state.generation.load(Ordering::SeqCst) != generation {
                return; // superseded by a later event on the same key
            }
            let client = client.lock().await;
            client.send_watched_files(vec![FileEvent { uri, typ: change_type }]).await;
        });
    }
}

fn is_excluded_dir_component(path: &Path, root: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else { return false };
    relative.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        name.starts_with('.') || EXCLUDED_DIRS.contains(&name.as_ref())
    })
}

fn is_excluded_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else { return true };
    if name.starts_with('.') {
        return true;
    }
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if EXCLUDED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            return true;
        }
    }
    match std::fs::metadata(path) {
        Ok(meta) => meta.len() > MAX_WATCHED_SIZE,
        Err(_) => true,
    }
}

/// Walks `root` once at startup via [`ignore::WalkBuilder`] — honoring
/// `.gitignore`/`.ignore` the way an editor would, on top of this
/// module's own exclusion lists — and returns files suitable for the
/// initial preload pass (sorted so that the same tree always yields the
/// same order, resolving the "readiness for typescript-family servers"
/// open question).
#[must_use]
pub fn initial_file_list(root: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = ignore::WalkBuilder::new(root)
        .hidden(true)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !EXCLUDED_DIRS.contains(&name.as_ref())
        })
        .build()
        .filter_map(std::result::Result::ok)
        .map(ignore::DirEntry::into_path)
        .filter(|path| path.is_file() && !is_excluded_file(path))
        .collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_dotdirs_and_known_names() {
        let root = Path::new("/workspace");
        assert!(is_excluded_dir_component(Path::new("/workspace/node_modules/x.js"), root));
        assert!(is_excluded_dir_component(Path::new("/workspace/.git/HEAD"), root));
        assert!(!is_excluded_dir_component(Path::new("/workspace/src/main.rs"), root));
    }

    #[test]
    fn excludes_binary_and_lock_extensions() {
        assert!(is_excluded_file(Path::new("/tmp/definitely-not-real-xyz.lock")));
    }
}
