// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Default handlers for server-initiated requests and notifications.
//!
//! Registered once per client at construction time. `workspace/applyEdit`
//! delegates to [`crate::lsp::workspace_edit`]; `client/registerCapability`
//! forwards `didChangeWatchedFiles` registrations to the client's watcher
//! handle rather than a process-wide callback.

use lsp_types::{
    ApplyWorkspaceEditParams, ApplyWorkspaceEditResult, ConfigurationParams,
    PositionEncodingKind, Registration,
};
use serde_json::Value;
use tracing::debug;

use super::watcher::WatcherHandle;
use super::workspace_edit::apply_workspace_edit;

/// Replies to `workspace/configuration` with one empty object per
/// requested section — the minimal viable answer for servers that only
/// check for the presence of a config key.
#[must_use]
pub fn handle_configuration(params: &ConfigurationParams) -> Value {
    let items: Vec<Value> = params.items.iter().map(|_| Value::Object(Default::default())).collect();
    Value::Array(items)
}

/// Extracts `didChangeWatchedFiles` registrations and forwards them to
/// the watcher. Other registration methods are accepted and ignored.
pub fn handle_register_capability(registrations: &[Registration], watcher: Option<&WatcherHandle>) {
    for registration in registrations {
        if registration.method != "workspace/didChangeWatchedFiles" {
            continue;
        }
        let Some(options) = &registration.register_options else {
            continue;
        };
        let Ok(params) = serde_json::from_value::<lsp_types::DidChangeWatchedFilesRegistrationOptions>(
            options.clone(),
        ) else {
            continue;
        };
        if let Some(watcher) = watcher {
            watcher.register_watchers(params.watchers);
        } else {
            debug!("didChangeWatchedFiles registered but no watcher attached to this client");
        }
    }
}

/// Applies a workspace edit requested by the server, returning the
/// `{applied, failureReason}` shape the LSP spec requires in reply.
pub async fn handle_apply_edit(
    params: &ApplyWorkspaceEditParams,
    encoding: &PositionEncodingKind,
) -> ApplyWorkspaceEditResult {
    match apply_workspace_edit(&params.edit, encoding).await {
        Ok(()) => ApplyWorkspaceEditResult {
            applied: true,
            failure_reason: None,
            failed_change: None,
        },
        Err(e) => ApplyWorkspaceEditResult {
            applied: false,
            failure_reason: Some(e.to_string()),
            failed_change: None,
        },
    }
}

/// Logs a `window/showMessage` notification at debug level.
pub fn handle_show_message(params: &lsp_types::ShowMessageParams) {
    debug!(message = %params.message, kind = ?params.typ, "server window/showMessage");
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::ConfigurationItem;

    #[test]
    fn configuration_returns_one_empty_object_per_section() {
        let params = ConfigurationParams {
            items: vec![
                ConfigurationItem { scope_uri: None, section: Some("go".into()) },
                ConfigurationItem { scope_uri: None, section: Some("gopls".into()) },
            ],
        };
        let result = handle_configuration(&params);
        let Value::Array(items) = result else { unreachable!("must be an array") };
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|v| matches!(v, Value::Object(m) if m.is_empty())));
    }
}
