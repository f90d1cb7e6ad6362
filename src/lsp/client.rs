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

use anyhow::{Context, Result, anyhow};
use bytes::BytesMut;
use lsp_types::{
    ApplyWorkspaceEditParams, ClientCapabilities, DidChangeTextDocumentParams,
    DidChangeWatchedFilesClientCapabilities, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, DocumentSymbolClientCapabilities, DocumentSymbolParams,
    FileEvent, GeneralClientCapabilities, InitializeParams, InitializeResult,
    InitializedParams, PositionEncodingKind, PublishDiagnosticsClientCapabilities,
    PublishDiagnosticsParams, SemanticTokensClientCapabilities, TextDocumentClientCapabilities,
    TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem,
    TextDocumentSyncClientCapabilities, Uri, VersionedTextDocumentIdentifier,
    WorkDoneProgressParams, WorkspaceClientCapabilities, WorkspaceFolder,
    WorkspaceSymbolClientCapabilities, WorkspaceSymbolParams,
};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, Notify, oneshot};
use tracing::{debug, error, trace, warn};

use super::diagnostics::{ActivityState, DiagnosticsStrategy, ProcessMonitor, ProgressMonitor, TokenMonitor};
use super::handlers;
use super::protocol::{self, NotificationMessage, RequestId, RequestMessage, ResponseMessage};
use super::state::{ProgressTracker, ServerState};
use super::uri::{detect_language_id, path_to_uri};
use super::watcher::WatcherHandle;

/// Cached diagnostics for a file.
pub type DiagnosticsCache = Arc<Mutex<HashMap<Uri, Vec<lsp_types::Diagnostic>>>>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const READINESS_TIMEOUT: Duration = Duration::from_secs(30);
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(500);
const FALLBACK_DIAGNOSTICS_PAUSE: Duration = Duration::from_millis(100);

/// Inferred server family, used to pick a readiness probe and a
/// watched-file preload policy. Matching substrings of the spawn
/// command is fragile but avoids requiring every server definition to
/// declare its own family explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    TypeScriptFamily,
    PythonClangdJava,
    GoplsRustAnalyzerGeneric,
}

impl ServerKind {
    #[must_use]
    pub fn infer(command: &str) -> Self {
        let c = command.to_ascii_lowercase();
        if c.contains("typescript-language-server") || c.contains("tsserver") || c.contains("vtsls") {
            Self::TypeScriptFamily
        } else if c.contains("pyright") || c.contains("pylsp") || c.contains("clangd") || c.contains("jdtls") {
            Self::PythonClangdJava
        } else {
            Self::GoplsRustAnalyzerGeneric
        }
    }
}

/// Per-document state held while a file is open on this client.
struct OpenDocument {
    version: i32,
}

/// Manages communication with one LSP server process.
pub struct LspClient {
    next_id: AtomicI64,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: Arc<Mutex<HashMap<RequestId, oneshot::Sender<ResponseMessage>>>>,
    diagnostics: DiagnosticsCache,
    diagnostics_versions: Arc<Mutex<HashMap<Uri, i32>>>,
    diagnostics_notify: Arc<Notify>,
    /// Per-URI serializing lock for the {read, increment-version, send}
    /// sequence in `notify_change`.
    open_documents: Arc<Mutex<HashMap<Uri, Arc<Mutex<OpenDocument>>>>>,
    alive: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    progress: Arc<Mutex<ProgressTracker>>,
    trust_failures: Arc<AtomicU32>,
    /// Set once a `$/progress` notification is observed; gates
    /// `TokenMonitor` into the strategy preference order.
    saw_progress: Arc<AtomicBool>,
    /// Set once a `publishDiagnostics` carries a `version`; gates the
    /// version-causality wait in `wait_for_diagnostics`.
    saw_version: Arc<AtomicBool>,
    encoding: Arc<std::sync::Mutex<PositionEncodingKind>>,
    server_kind: ServerKind,
    watcher: Arc<std::sync::Mutex<Option<WatcherHandle>>>,
    pid: u32,
    command: String,
    _reader_handle: tokio::task::JoinHandle<()>,
    _child: Child,
}

impl LspClient {
    /// Spawns the LSP server process and starts the response reader task.
    pub async fn spawn(program: &str, args: &[&str]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to spawn LSP server: {program}"))?;

        let pid = child.id().unwrap_or(0);
        let stdin = child.stdin.take().context("stdin not captured")?;
        let stdout = child.stdout.take().context("stdout not captured")?;

        let stdin = Arc::new(Mutex::new(stdin));
        let pending: Arc<Mutex<HashMap<RequestId, oneshot::Sender<ResponseMessage>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let diagnostics: DiagnosticsCache = Arc::new(Mutex::new(HashMap::new()));
        let diagnostics_versions = Arc::new(Mutex::new(HashMap::new()));
        let diagnostics_notify = Arc::new(Notify::new());
        let alive = Arc::new(AtomicBool::new(true));
        let state = Arc::new(AtomicU8::new(ServerState::Initializing.as_u8()));
        let progress = Arc::new(Mutex::new(ProgressTracker::new()));
        let saw_progress = Arc::new(AtomicBool::new(false));
        let saw_version = Arc::new(AtomicBool::new(false));
        let encoding = Arc::new(std::sync::Mutex::new(PositionEncodingKind::UTF16));
        let watcher: Arc<std::sync::Mutex<Option<WatcherHandle>>> = Arc::new(std::sync::Mutex::new(None));

        let reader_handle = tokio::spawn(Self::reader_task(
            stdin.clone(),
            stdout,
            pending.clone(),
            diagnostics.clone(),
            diagnostics_versions.clone(),
            diagnostics_notify.clone(),
            alive.clone(),
            state.clone(),
            progress.clone(),
            saw_progress.clone(),
            saw_version.clone(),
            encoding.clone(),
            watcher.clone(),
        ));

        Ok(Self {
            next_id: AtomicI64::new(1),
            stdin,
            pending,
            diagnostics,
            diagnostics_versions,
            diagnostics_notify,
            open_documents: Arc::new(Mutex::new(HashMap::new())),
            alive,
            state,
            progress,
            trust_failures: Arc::new(AtomicU32::new(0)),
            saw_progress,
            saw_version,
            encoding,
            server_kind: ServerKind::infer(program),
            watcher,
            pid,
            command: program.to_string(),
            _reader_handle: reader_handle,
            _child: child,
        })
    }

    /// Attaches the workspace watcher this client should forward
    /// `didChangeWatchedFiles` registrations to. Safe to call any time —
    /// the reader task reads through the same shared handle, so a
    /// registration that races `initialize` is never lost.
    pub fn attach_watcher(&mut self, watcher: WatcherHandle) {
        if let Ok(mut guard) = self.watcher.lock() {
            *guard = Some(watcher);
        }
    }

    #[must_use]
    pub fn server_kind(&self) -> ServerKind {
        self.server_kind
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Background task that reads LSP messages, routes responses, and
    /// dispatches server-initiated requests/notifications through the
    /// default handler registry.
    #[allow(clippy::too_many_arguments, reason = "internal reader loop wiring, not a public seam")]
    async fn reader_task(
        stdin: Arc<Mutex<ChildStdin>>,
        stdout: ChildStdout,
        pending: Arc<Mutex<HashMap<RequestId, oneshot::Sender<ResponseMessage>>>>,
        diagnostics: DiagnosticsCache,
        diagnostics_versions: Arc<Mutex<HashMap<Uri, i32>>>,
        diagnostics_notify: Arc<Notify>,
        alive: Arc<AtomicBool>,
        state: Arc<AtomicU8>,
        progress: Arc<Mutex<ProgressTracker>>,
        saw_progress: Arc<AtomicBool>,
        saw_version: Arc<AtomicBool>,
        encoding: Arc<std::sync::Mutex<PositionEncodingKind>>,
        watcher: Arc<std::sync::Mutex<Option<WatcherHandle>>>,
    ) {
        let mut reader = BufReader::new(stdout);
        let mut buffer = BytesMut::with_capacity(8192);

        loop {
            let mut temp = [0u8; 4096];
            match reader.read(&mut temp).await {
                Ok(0) => {
                    debug!("LSP stdout closed");
                    break;
                }
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
                Err(e) => {
                    error!("Error reading from LSP stdout: {e}");
                    break;
                }
            }

            loop {
                let message_str = match protocol::try_parse_message(&mut buffer) {
                    Ok(Some(m)) => m,
                    Ok(None) => break,
                    Err(e) => {
                        error!("malformed LSP frame, terminating transport: {e}");
                        alive.store(false, Ordering::SeqCst);
                        state.store(ServerState::Dead.as_u8(), Ordering::SeqCst);
                        return;
                    }
                };
                trace!("Received LSP message: {}", message_str);

                let value: serde_json::Value = match serde_json::from_str(&message_str) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("Failed to parse JSON: {e}");
                        continue;
                    }
                };

                if let Some(method) = value.get("method").and_then(|m| m.as_str()).map(str::to_string) {
                    if value.get("id").is_some() {
                        Self::handle_server_request(&stdin, &value, &method, &encoding, &watcher).await;
                    } else if let Ok(notification) = serde_json::from_value::<NotificationMessage>(value) {
                        Self::handle_notification(
                            &notification,
                            &diagnostics,
                            &diagnostics_versions,
                            &diagnostics_notify,
                            &state,
                            &progress,
                            &saw_progress,
                            &saw_version,
                        )
                        .await;
                    }
                } else if value.get("id").is_some() {
                    if let Ok(response) = serde_json::from_value::<ResponseMessage>(value) {
                        if let Some(id) = &response.id {
                            let mut pending = pending.lock().await;
                            if let Some(sender) = pending.remove(id) {
                                let _ = sender.send(response);
                            } else {
                                warn!("Received response for unknown request id: {:?}", id);
                            }
                        }
                    }
                } else {
                    warn!("Unknown message format: {}", message_str);
                }
            }
        }

        alive.store(false, Ordering::SeqCst);
        state.store(ServerState::Dead.as_u8(), Ordering::SeqCst);
        warn!("LSP reader task exiting - server connection lost");
    }

    async fn handle_server_request(
        stdin: &Arc<Mutex<ChildStdin>>,
        value: &serde_json::Value,
        method: &str,
        encoding: &Arc<std::sync::Mutex<PositionEncodingKind>>,
        watcher: &Arc<std::sync::Mutex<Option<WatcherHandle>>>,
    ) {
        let id = value
            .get("id")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(RequestId::Number(0));
        let params = value.get("params").cloned().unwrap_or(serde_json::Value::Null);

        let result: std::result::Result<serde_json::Value, (i64, String)> = match method {
            "workspace/configuration" => {
                serde_json::from_value::<lsp_types::ConfigurationParams>(params)
                    .map(|p| handlers::handle_configuration(&p))
                    .map_err(|e| (-32602, e.to_string()))
            }
            "client/registerCapability" => {
                match serde_json::from_value::<lsp_types::RegistrationParams>(params) {
                    Ok(p) => {
                        let current = watcher.lock().ok().and_then(|g| g.clone());
                        handlers::handle_register_capability(&p.registrations, current.as_ref());
                        Ok(serde_json::Value::Null)
                    }
                    Err(e) => Err((-32602, e.to_string())),
                }
            }
            "workspace/applyEdit" => match serde_json::from_value::<ApplyWorkspaceEditParams>(params) {
                Ok(p) => {
                    let current_encoding =
                        encoding.lock().map(|g| g.clone()).unwrap_or(PositionEncodingKind::UTF16);
                    let reply = handlers::handle_apply_edit(&p, &current_encoding).await;
                    serde_json::to_value(reply).map_err(|e| (-32603, e.to_string()))
                }
                Err(e) => Err((-32602, e.to_string())),
            },
            _ => Err((-32601, format!("Method '{method}' not supported by client"))),
        };

        let response = match result {
            Ok(result) => ResponseMessage {
                jsonrpc: "2.0".to_string(),
                id: Some(id),
                result: Some(result),
                error: None,
            },
            Err((code, message)) => ResponseMessage {
                jsonrpc: "2.0".to_string(),
                id: Some(id),
                result: None,
                error: Some(protocol::ResponseError { code, message, data: None }),
            },
        };
        Self::write_response(stdin, &response).await;
    }

    async fn write_response(stdin: &Arc<Mutex<ChildStdin>>, response: &ResponseMessage) {
        let Ok(body) = serde_json::to_string(response) else { return };
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        let mut stdin = stdin.lock().await;
        if let Err(e) = stdin.write_all(header.as_bytes()).await {
            warn!("Failed to write response header: {e}");
        } else if let Err(e) = stdin.write_all(body.as_bytes()).await {
            warn!("Failed to write response body: {e}");
        } else if let Err(e) = stdin.flush().await {
            warn!("Failed to flush response: {e}");
        }
    }

    #[allow(clippy::too_many_arguments, reason = "internal reader loop wiring, not a public seam")]
    async fn handle_notification(
        notification: &NotificationMessage,
        diagnostics: &DiagnosticsCache,
        diagnostics_versions: &Arc<Mutex<HashMap<Uri, i32>>>,
        diagnostics_notify: &Arc<Notify>,
        state: &Arc<AtomicU8>,
        progress: &Arc<Mutex<ProgressTracker>>,
        saw_progress: &Arc<AtomicBool>,
        saw_version: &Arc<AtomicBool>,
    ) {
        match notification.method.as_str() {
            "textDocument/publishDiagnostics" => {
                if let Ok(params) =
                    serde_json::from_value::<PublishDiagnosticsParams>(notification.params.clone())
                {
                    debug!(count = params.diagnostics.len(), uri = %params.uri.as_str(), "publishDiagnostics");
                    let mut cache = diagnostics.lock().await;
                    cache.insert(params.uri.clone(), params.diagnostics);
                    drop(cache);
                    if let Some(version) = params.version {
                        saw_version.store(true, Ordering::SeqCst);
                        let mut versions = diagnostics_versions.lock().await;
                        versions.insert(params.uri, version);
                    }
                    diagnostics_notify.notify_waiters();
                } else {
                    warn!("Failed to parse publishDiagnostics params");
                }
            }
            "$/progress" => {
                if let Ok(params) = serde_json::from_value::<lsp_types::ProgressParams>(notification.params.clone()) {
                    saw_progress.store(true, Ordering::SeqCst);
                    let mut tracker = progress.lock().await;
                    let was_ready = state.load(Ordering::SeqCst) == ServerState::Ready.as_u8();
                    tracker.update(&params);
                    if was_ready {
                        // Ready servers that later re-enter progress stay
                        // Ready; only the pre-readiness probe cares about
                        // Indexing.
                    } else if tracker.is_busy() {
                        state.store(ServerState::Indexing.as_u8(), Ordering::SeqCst);
                    }
                }
            }
            "window/showMessage" => {
                if let Ok(p) = serde_json::from_value::<lsp_types::ShowMessageParams>(notification.params.clone()) {
                    handlers::handle_show_message(&p);
                }
            }
            "window/logMessage" => {
                if let Some(message) = notification.params.get("message").and_then(|m| m.as_str()) {
                    debug!("LSP server log: {message}");
                }
            }
            _ => trace!("Ignoring notification: {} params={}", notification.method, notification.params),
        }
    }

    async fn request<P: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = RequestMessage {
            jsonrpc: "2.0".to_string(),
            id: id.clone(),
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id.clone(), tx);
        }

        self.send_message(&request).await?;

        let response = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(anyhow!("LSP server closed connection")),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                return Err(anyhow!("LSP request '{method}' timed out after {REQUEST_TIMEOUT:?}"));
            }
        };

        if let Some(error) = response.error {
            return Err(anyhow!("LSP error {}: {}", error.code, error.message));
        }
        let result = response.result.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result).context("Failed to parse LSP response")
    }

    async fn notify<P: serde::Serialize>(&self, method: &str, params: P) -> Result<()> {
        let notification = NotificationMessage {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };
        self.send_message(&notification).await
    }

    async fn send_message<T: serde::Serialize>(&self, message: &T) -> Result<()> {
        let body = serde_json::to_string(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        trace!("Sending LSP message: {}", body);
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(header.as_bytes()).await?;
        stdin.write_all(body.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Performs the `initialize`/`initialized` handshake.
    pub async fn initialize(&mut self, root: &Path) -> Result<InitializeResult> {
        self.initialize_with_options(root, None).await
    }

    /// Performs the `initialize`/`initialized` handshake, forwarding
    /// `initialization_options` from the server's config entry.
    pub async fn initialize_with_options(
        &mut self,
        root: &Path,
        initialization_options: Option<serde_json::Value>,
    ) -> Result<InitializeResult> {
        let root_uri = path_to_uri(root)?;

        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(root_uri.clone()),
            initialization_options,
            capabilities: ClientCapabilities {
                workspace: Some(WorkspaceClientCapabilities {
                    configuration: Some(true),
                    did_change_watched_files: Some(DidChangeWatchedFilesClientCapabilities {
                        dynamic_registration: Some(true),
                        relative_pattern_support: Some(true),
                    }),
                    apply_edit: Some(true),
                    ..Default::default()
                }),
                text_document: Some(TextDocumentClientCapabilities {
                    synchronization: Some(TextDocumentSyncClientCapabilities {
                        dynamic_registration: Some(true),
                        did_save: Some(true),
                        ..Default::default()
                    }),
                    publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                        version_support: Some(true),
                        ..Default::default()
                    }),
                    semantic_tokens: Some(SemanticTokensClientCapabilities {
                        dynamic_registration: Some(true),
                        ..Default::default()
                    }),
                    code_action: Some(lsp_types::CodeActionClientCapabilities {
                        code_action_literal_support: Some(lsp_types::CodeActionLiteralSupport {
                            code_action_kind: lsp_types::CodeActionKindLiteralSupport {
                                value_set: vec![],
                            },
                        }),
                        ..Default::default()
                    }),
                    document_symbol: Some(DocumentSymbolClientCapabilities {
                        dynamic_registration: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                general: Some(GeneralClientCapabilities {
                    position_encodings: Some(vec![
                        PositionEncodingKind::UTF8,
                        PositionEncodingKind::UTF16,
                    ]),
                    ..Default::default()
                }),
                ..Default::default()
            },
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: root.file_name().map_or_else(|| "workspace".to_string(), |s| s.to_string_lossy().to_string()),
            }]),
            ..Default::default()
        };

        let result: InitializeResult = self.request("initialize", params).await?;

        let negotiated = result.capabilities.position_encoding.clone().unwrap_or_else(|| {
            debug!("Server did not specify position encoding, defaulting to UTF-16");
            PositionEncodingKind::UTF16
        });
        if let Ok(mut guard) = self.encoding.lock() {
            *guard = negotiated;
        }

        self.notify("initialized", InitializedParams {}).await?;
        Ok(result)
    }

    /// Preopens server-specific configuration/entry files, then polls
    /// until a readiness probe succeeds or `READINESS_TIMEOUT` elapses.
    /// On timeout the client is left Usable-but-degraded (state = Dead
    /// is *not* set; only the readiness signal itself times out).
    pub async fn wait_until_ready(&mut self, root: &Path) {
        self.preopen_for_kind(root).await;

        let deadline = tokio::time::Instant::now() + READINESS_TIMEOUT;
        loop {
            if self.probe_ready(root).await {
                self.state.store(ServerState::Ready.as_u8(), Ordering::SeqCst);
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("readiness probe timed out for {}", self.command);
                return;
            }
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }

    /// Language-specific configuration/entry-point filenames for this
    /// server, always opened immediately ahead of any preload cap.
    #[must_use]
    pub fn priority_filenames(&self) -> &'static [&'static str] {
        match self.server_kind {
            ServerKind::TypeScriptFamily => &["tsconfig.json", "package.json", "jsconfig.json"],
            ServerKind::GoplsRustAnalyzerGeneric if self.command.to_ascii_lowercase().contains("gopls") => {
                &["go.mod", "go.sum"]
            }
            ServerKind::GoplsRustAnalyzerGeneric => &["Cargo.toml", "Cargo.lock"],
            ServerKind::PythonClangdJava => &[],
        }
    }

    async fn preopen_for_kind(&mut self, root: &Path) {
        let candidates = self.priority_filenames();
        for name in candidates {
            let path = root.join(name);
            if path.exists() {
                let _ = self.open_file(&path).await;
            }
        }

        if self.server_kind == ServerKind::TypeScriptFamily {
            // Up to 5 sample source files, deterministically ordered
            // (files are visited in a deterministic, sorted order).
            for path in super::watcher::initial_file_list(root).into_iter().take(5) {
                if matches!(path.extension().and_then(|e| e.to_str()), Some("ts" | "tsx" | "js" | "jsx")) {
                    let _ = self.open_file(&path).await;
                }
            }
        }
    }

    async fn probe_ready(&self, root: &Path) -> bool {
        let empty_query = WorkspaceSymbolParams {
            query: String::new(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: lsp_types::PartialResultParams::default(),
        };
        if self
            .request::<_, Option<lsp_types::WorkspaceSymbolResponse>>("workspace/symbol", empty_query)
            .await
            .is_ok()
        {
            return true;
        }

        if self.server_kind != ServerKind::TypeScriptFamily {
            return false;
        }

        // Fallback: documentSymbol on any matching open file, else find
        // and open one from the tree.
        let open = self.open_documents.lock().await;
        let candidate = open.keys().find(|uri| {
            let s = uri.as_str();
            s.ends_with(".ts") || s.ends_with(".tsx") || s.ends_with(".js") || s.ends_with(".jsx")
        }).cloned();
        drop(open);

        let uri = match candidate {
            Some(uri) => uri,
            None => {
                let Some(path) = super::watcher::initial_file_list(root)
                    .into_iter()
                    .find(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("ts" | "tsx" | "js" | "jsx")))
                else {
                    return false;
                };
                if self.open_file(&path).await.is_err() {
                    return false;
                }
                let Ok(uri) = path_to_uri(&path) else { return false };
                uri
            }
        };

        self.request::<_, Option<lsp_types::DocumentSymbolResponse>>(
            "textDocument/documentSymbol",
            DocumentSymbolParams {
                text_document: TextDocumentIdentifier { uri },
                work_done_progress_params: WorkDoneProgressParams::default(),
                partial_result_params: lsp_types::PartialResultParams::default(),
            },
        )
        .await
        .is_ok()
    }

    /// Opens `path` on the server (idempotent). Fails without mutating
    /// state if the file can't be read.
    pub async fn open_file(&self, path: &Path) -> Result<()> {
        let uri = path_to_uri(path)?;
        {
            let docs = self.open_documents.lock().await;
            if docs.contains_key(&uri) {
                return Ok(());
            }
        }

        let content = tokio::fs::read_to_string(path).await?;
        let language_id = detect_language_id(path);

        self.did_open(DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: uri.clone(),
                language_id: language_id.to_string(),
                version: 1,
                text: content,
            },
        })
        .await?;

        let mut docs = self.open_documents.lock().await;
        docs.insert(uri, Arc::new(Mutex::new(OpenDocument { version: 1 })));
        Ok(())
    }

    /// Returns whether `path` is currently open on this client.
    pub async fn is_open(&self, path: &Path) -> bool {
        let Ok(uri) = path_to_uri(path) else { return false };
        self.open_documents.lock().await.contains_key(&uri)
    }

    /// Re-reads `path` and sends a whole-document `didChange`,
    /// incrementing the version. The per-URI lock held across
    /// read+increment+send makes this atomic with respect to concurrent
    /// calls on the same URI.
    pub async fn notify_change(&self, path: &Path) -> Result<()> {
        let uri = path_to_uri(path)?;
        let slot = {
            let docs = self.open_documents.lock().await;
            docs.get(&uri).cloned().ok_or_else(|| anyhow!("document not open: {}", uri.as_str()))?
        };

        let mut doc = slot.lock().await;
        let content = tokio::fs::read_to_string(path).await?;
        doc.version += 1;
        let version = doc.version;

        self.did_change(DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier { uri, version },
            content_changes: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: content,
            }],
        })
        .await
    }

    /// Closes `path` (idempotent).
    pub async fn close_file(&self, path: &Path) -> Result<()> {
        let uri = path_to_uri(path)?;
        let removed = {
            let mut docs = self.open_documents.lock().await;
            docs.remove(&uri).is_some()
        };
        if !removed {
            return Ok(());
        }
        self.did_close(DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier { uri },
        })
        .await
    }

    /// Closes every open document, logging and continuing past
    /// individual failures.
    pub async fn close_all_files(&self) {
        let uris: Vec<Uri> = {
            let docs = self.open_documents.lock().await;
            docs.keys().cloned().collect()
        };
        for uri in uris {
            if let Ok(path) = super::uri::uri_to_path(&uri) {
                if let Err(e) = self.close_file(&path).await {
                    warn!("failed to close {}: {e}", path.display());
                }
            }
        }
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) -> Result<()> {
        self.notify("textDocument/didOpen", params).await
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) -> Result<()> {
        self.notify("textDocument/didChange", params).await
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) -> Result<()> {
        self.notify("textDocument/didClose", params).await
    }

    /// Sends a `workspace/didChangeWatchedFiles` notification.
    pub async fn send_watched_files(&self, changes: Vec<FileEvent>) {
        if let Err(e) = self
            .notify("workspace/didChangeWatchedFiles", lsp_types::DidChangeWatchedFilesParams { changes })
            .await
        {
            warn!("failed to send didChangeWatchedFiles: {e}");
        }
    }

    /// Pure cache read — the last `publishDiagnostics` set, or empty.
    pub async fn get_file_diagnostics(&self, uri: &Uri) -> Vec<lsp_types::Diagnostic> {
        self.diagnostics.lock().await.get(uri).cloned().unwrap_or_default()
    }

    /// Returns a snapshot of every cached diagnostics entry.
    pub async fn get_diagnostics(&self) -> HashMap<Uri, Vec<lsp_types::Diagnostic>> {
        self.diagnostics.lock().await.clone()
    }

    /// Ensures `path` is open, waits (via the best available strategy
    /// for this server) for diagnostics to settle, then returns the
    /// cached set.
    pub async fn get_diagnostics_for_file(&self, path: &Path) -> Result<Vec<lsp_types::Diagnostic>> {
        let uri = path_to_uri(path)?;
        let slot = {
            let docs = self.open_documents.lock().await;
            docs.get(&uri).cloned()
        };
        let sent_version = match slot {
            Some(slot) => slot.lock().await.version,
            None => {
                self.open_file(path).await?;
                1
            }
        };

        self.wait_for_diagnostics(&uri, sent_version).await;
        Ok(self.get_file_diagnostics(&uri).await)
    }

    async fn wait_for_diagnostics(&self, uri: &Uri, sent_version: i32) {
        let strategy = self.diagnostics_strategy();
        let patience = Duration::from_secs(2);
        let deadline = tokio::time::Instant::now() + patience;

        match strategy {
            DiagnosticsStrategy::Version => {
                if !self.saw_version.load(Ordering::SeqCst) {
                    // No server-reported version seen yet — nothing to wait
                    // on causally, so fall back to the flat pause.
                    tokio::time::sleep(FALLBACK_DIAGNOSTICS_PAUSE).await;
                    return;
                }
                loop {
                    if let Some(seen) = self.diagnostics_versions.lock().await.get(uri) {
                        if *seen >= sent_version {
                            return;
                        }
                    }
                    if tokio::time::Instant::now() >= deadline {
                        self.trust_failures.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                    let _ = tokio::time::timeout(Duration::from_millis(200), self.diagnostics_notify.notified()).await;
                }
            }
            DiagnosticsStrategy::TokenMonitor => {
                let mut monitor = TokenMonitor::new(self.state.clone(), self.alive.clone());
                self.poll_until_idle(&mut monitor, deadline).await;
            }
            DiagnosticsStrategy::ProcessMonitor => {
                let mut monitor = ProcessMonitor::new(self.pid, self.alive.clone(), self.trust_failures.clone());
                let patience = monitor.patience();
                let deadline = tokio::time::Instant::now() + patience;
                self.poll_until_idle(&mut monitor, deadline).await;
            }
        }
    }

    async fn poll_until_idle(&self, monitor: &mut dyn ProgressMonitor, deadline: tokio::time::Instant) {
        loop {
            match monitor.poll() {
                ActivityState::Idle | ActivityState::Dead => return,
                ActivityState::Active => {}
            }
            if tokio::time::Instant::now() >= deadline {
                self.trust_failures.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(FALLBACK_DIAGNOSTICS_PAUSE).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Picks the strongest diagnostics-readiness signal this server has
    /// shown, in order: CPU-time polling once a prior wait on this client
    /// has already timed out (the trust counter is nonzero); document-
    /// version causality once the server has ever reported a version on
    /// `publishDiagnostics`; progress-token monitoring once the server
    /// has ever sent `$/progress` without also reporting versions;
    /// otherwise the flat pause (handled inside the `Version` arm of
    /// `wait_for_diagnostics` when no version has been seen).
    fn diagnostics_strategy(&self) -> DiagnosticsStrategy {
        if self.trust_failures.load(Ordering::SeqCst) > 0 {
            return DiagnosticsStrategy::ProcessMonitor;
        }
        if self.saw_progress.load(Ordering::SeqCst) && !self.saw_version.load(Ordering::SeqCst) {
            return DiagnosticsStrategy::TokenMonitor;
        }
        DiagnosticsStrategy::Version
    }

    /// Removes the cached diagnostics entry for `uri` outright (used
    /// when the underlying file is deleted).
    pub async fn clear_diagnostics_for_uri(&self, uri: &Uri) {
        self.diagnostics.lock().await.remove(uri);
    }

    /// Best-effort shutdown: closes open documents (5s), sends
    /// `shutdown`/`exit` and closes stdin, waits for exit (2s), then
    /// kills. Always releases the process.
    pub async fn close(&mut self) {
        let _ = tokio::time::timeout(Duration::from_secs(5), self.close_all_files()).await;

        if tokio::time::timeout(Duration::from_secs(2), async {
            let _: Result<serde_json::Value> = self.request("shutdown", serde_json::Value::Null).await;
            let _ = self.notify("exit", serde_json::Value::Null).await;
        })
        .await
        .is_err()
        {
            warn!("shutdown handshake timed out for {}", self.command);
        }

        match tokio::time::timeout(Duration::from_secs(2), self._child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                let _ = self._child.kill().await;
            }
        }
        self.alive.store(false, Ordering::SeqCst);
        self.state.store(ServerState::Dead.as_u8(), Ordering::SeqCst);
    }

    /// The encoding negotiated with the server at `initialize` time (or
    /// the UTF-16 default, before that completes).
    #[must_use]
    pub fn encoding(&self) -> PositionEncodingKind {
        self.encoding.lock().map(|g| g.clone()).unwrap_or(PositionEncodingKind::UTF16)
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_typescript_family_from_command() {
        assert_eq!(ServerKind::infer("typescript-language-server"), ServerKind::TypeScriptFamily);
        assert_eq!(ServerKind::infer("/usr/bin/gopls"), ServerKind::GoplsRustAnalyzerGeneric);
        assert_eq!(ServerKind::infer("pyright-langserver"), ServerKind::PythonClangdJava);
    }
}
