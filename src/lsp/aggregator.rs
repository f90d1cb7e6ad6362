// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Aggregates diagnostics across every active client for one workspace
//! into the textual report the demonstration harness prints:
//! severity-prefixed lines grouped by file, plus a trailing summary
//! count.

use lsp_types::DiagnosticSeverity;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::manager::ClientManager;
use super::uri::uri_to_path;

/// One formatted diagnostic line, independent of which server produced it.
struct Line {
    /// Absolute, canonicalized path — used for grouping and for matching
    /// the requested file, never printed directly.
    path: PathBuf,
    /// The form actually printed: the caller's original path for the
    /// requested file, a cwd-relative path otherwise.
    display: PathBuf,
    is_target: bool,
    line: u32,
    character: u32,
    severity: DiagnosticSeverity,
    server: String,
    message: String,
}

impl Line {
    fn format(&self) -> String {
        format!(
            "{}: {}:{}:{} [{}] {}",
            severity_label(self.severity),
            self.display.display(),
            self.line + 1,
            self.character + 1,
            self.server,
            self.message
        )
    }
}

const fn severity_label(severity: DiagnosticSeverity) -> &'static str {
    match severity {
        DiagnosticSeverity::ERROR => "Error",
        DiagnosticSeverity::WARNING => "Warning",
        DiagnosticSeverity::INFORMATION => "Information",
        DiagnosticSeverity::HINT => "Hint",
        _ => "Error",
    }
}

/// Renders `absolute` relative to `cwd` when it's underneath it, falling
/// back to the absolute form otherwise (the file lives outside the
/// current workspace, or `cwd` itself couldn't be determined).
fn display_relative(absolute: &Path, cwd: &Path) -> PathBuf {
    absolute.strip_prefix(cwd).map(Path::to_path_buf).unwrap_or_else(|_| absolute.to_path_buf())
}

/// Runs the diagnose operation: when `file_path` is given, the named
/// file is opened (if not already) and given a chance to publish fresh
/// diagnostics before anything is read back, and its diagnostics across
/// every server are shown under `<file_diagnostics>` using the caller's
/// own path form; the full workspace is always summarized under
/// `<project_diagnostics>` and `<diagnostic_summary>`, skipping any
/// diagnostic for a file that no longer exists on disk.
pub async fn diagnose(manager: &ClientManager, file_path: Option<&Path>) -> String {
    let clients = manager.active_clients().await;
    let cwd = std::env::current_dir().unwrap_or_default();

    let target_absolute = file_path.map(|target| {
        let absolute = if target.is_absolute() { target.to_path_buf() } else { cwd.join(target) };
        absolute.canonicalize().unwrap_or(absolute)
    });

    if let Some(target) = &target_absolute {
        for client in clients.values() {
            let client = client.lock().await;
            let _ = client.get_diagnostics_for_file(target).await;
        }
    }

    let mut all_lines: Vec<Line> = Vec::new();
    for (server, client) in &clients {
        let client = client.lock().await;
        for (uri, diagnostics) in client.get_diagnostics().await {
            let Ok(path) = uri_to_path(&uri) else { continue };
            if !path.exists() {
                continue; // published before the file was deleted or moved
            }
            let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
            let is_target = target_absolute.as_ref() == Some(&canonical);
            let display = if is_target {
                file_path.map_or_else(|| display_relative(&canonical, &cwd), Path::to_path_buf)
            } else {
                display_relative(&canonical, &cwd)
            };

            for diagnostic in diagnostics {
                all_lines.push(Line {
                    path: canonical.clone(),
                    display: display.clone(),
                    is_target,
                    line: diagnostic.range.start.line,
                    character: diagnostic.range.start.character,
                    severity: diagnostic.severity.unwrap_or(DiagnosticSeverity::ERROR),
                    server: server.clone(),
                    message: diagnostic.message,
                });
            }
        }
    }

    let mut by_file: BTreeMap<PathBuf, Vec<&Line>> = BTreeMap::new();
    for line in &all_lines {
        by_file.entry(line.path.clone()).or_default().push(line);
    }

    let mut out = String::new();
    let mut current_errors = 0usize;
    let mut current_warnings = 0usize;

    if file_path.is_some() {
        let target_lines: Vec<&Line> = all_lines.iter().filter(|l| l.is_target).collect();
        current_errors =
            target_lines.iter().filter(|l| l.severity == DiagnosticSeverity::ERROR).count();
        current_warnings =
            target_lines.iter().filter(|l| l.severity == DiagnosticSeverity::WARNING).count();

        out.push_str("<file_diagnostics>\n");
        if target_lines.is_empty() {
            out.push_str("No diagnostics for this file.\n");
        } else {
            for line in &target_lines {
                out.push_str(&line.format());
                out.push('\n');
            }
        }
        out.push_str("</file_diagnostics>\n\n");
    }

    out.push_str("<project_diagnostics>\n");
    if all_lines.is_empty() {
        out.push_str("No diagnostics reported.\n");
    } else {
        for lines in by_file.values() {
            for line in lines {
                out.push_str(&line.format());
                out.push('\n');
            }
        }
    }
    out.push_str("</project_diagnostics>\n\n");

    let errors = all_lines.iter().filter(|l| l.severity == DiagnosticSeverity::ERROR).count();
    let warnings = all_lines.iter().filter(|l| l.severity == DiagnosticSeverity::WARNING).count();
    out.push_str("<diagnostic_summary>\n");
    if file_path.is_some() {
        out.push_str(&format!("Current file: {current_errors} errors, {current_warnings} warnings\n"));
    }
    out.push_str(&format!(
        "{} error(s), {} warning(s) across {} file(s), {} server(s)\n",
        errors,
        warnings,
        by_file.len(),
        clients.len()
    ));
    out.push_str("</diagnostic_summary>\n");

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_labels_match_lsp_names() {
        assert_eq!(severity_label(DiagnosticSeverity::ERROR), "Error");
        assert_eq!(severity_label(DiagnosticSeverity::WARNING), "Warning");
        assert_eq!(severity_label(DiagnosticSeverity::HINT), "Hint");
    }

    #[test]
    fn relative_display_strips_cwd_prefix() {
        let cwd = Path::new("/home/dev/project");
        let absolute = Path::new("/home/dev/project/src/foo.go");
        assert_eq!(display_relative(absolute, cwd), Path::new("src/foo.go"));

        let outside = Path::new("/other/tree/bar.go");
        assert_eq!(display_relative(outside, cwd), outside);
    }
}
