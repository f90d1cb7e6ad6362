// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Applies a server-produced `WorkspaceEdit` to the filesystem.
//!
//! Handles plain text edits (with line-ending and trailing-newline
//! preservation, and overlap rejection) plus file create/rename/delete
//! operations from `documentChanges`.

use lsp_types::{
    DocumentChangeOperation, DocumentChanges, OneOf, Position, PositionEncodingKind, ResourceOp,
    TextEdit, WorkspaceEdit,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

use super::uri::uri_to_path;

/// Failure applying a workspace edit.
#[derive(Debug, Error)]
pub enum EditApplyError {
    /// Two edits in the same apply call shared a character range.
    #[error("overlapping edits in {path}: [{a_start}, {a_end}) and [{b_start}, {b_end})")]
    Overlap {
        /// File the overlapping edits target.
        path: PathBuf,
        a_start: usize,
        a_end: usize,
        b_start: usize,
        b_end: usize,
    },
    /// A position fell outside the document after clamping.
    #[error("invalid range in {path}: start {start} > end {end}")]
    OutOfRange {
        path: PathBuf,
        start: usize,
        end: usize,
    },
    /// A file-create/rename/delete flag was violated.
    #[error("{0}")]
    Operation(String),
    /// Underlying filesystem or URI error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Invalid URI in the edit.
    #[error(transparent)]
    Uri(#[from] anyhow::Error),
}

/// Applies every edit and file operation in `edit`, in order where an
/// order is specified. On any error the remaining operations are not
/// attempted; earlier file operations may already have taken effect
/// (the LSP spec gives no cross-file transaction guarantee either).
pub async fn apply_workspace_edit(
    edit: &WorkspaceEdit,
    encoding: &PositionEncodingKind,
) -> Result<(), EditApplyError> {
    if let Some(changes) = &edit.changes {
        let mut file_edits: HashMap<PathBuf, Vec<TextEdit>> = HashMap::new();
        for (uri, edits) in changes {
            let path = uri_to_path(uri)?;
            file_edits.entry(path).or_default().extend(edits.iter().cloned());
        }
        for (path, edits) in file_edits {
            apply_edits_to_file(&path, edits, encoding).await?;
        }
        return Ok(());
    }

    let Some(doc_changes) = &edit.document_changes else {
        return Ok(());
    };

    match doc_changes {
        DocumentChanges::Edits(edits) => {
            for text_doc_edit in edits {
                let path = uri_to_path(&text_doc_edit.text_document.uri)?;
                let edits = text_doc_edit
                    .edits
                    .iter()
                    .map(annotated_to_text_edit)
                    .collect();
                apply_edits_to_file(&path, edits, encoding).await?;
            }
        }
        DocumentChanges::Operations(ops) => {
            // Order matters: a rename can be followed by an edit on the
            // new path, so operations are applied sequentially, not
            // grouped by file first.
            for op in ops {
                match op {
                    DocumentChangeOperation::Edit(text_doc_edit) => {
                        let path = uri_to_path(&text_doc_edit.text_document.uri)?;
                        let edits = text_doc_edit
                            .edits
                            .iter()
                            .map(annotated_to_text_edit)
                            .collect();
                        apply_edits_to_file(&path, edits, encoding).await?;
                    }
                    DocumentChangeOperation::Op(resource_op) => {
                        apply_resource_op(resource_op).await?;
                    }
                }
            }
        }
    }

    Ok(())
}

fn annotated_to_text_edit(edit: &OneOf<TextEdit, lsp_types::AnnotatedTextEdit>) -> TextEdit {
    match edit {
        OneOf::Left(te) => te.clone(),
        OneOf::Right(ae) => ae.text_edit.clone(),
    }
}

async fn apply_resource_op(op: &ResourceOp) -> Result<(), EditApplyError> {
    match op {
        ResourceOp::Create(create) => {
            let path = uri_to_path(&create.uri)?;
            let overwrite = create.options.as_ref().is_some_and(|o| o.overwrite == Some(true));
            let ignore_if_exists = create
                .options
                .as_ref()
                .is_some_and(|o| o.ignore_if_exists == Some(true));
            let exists = fs::metadata(&path).await.is_ok();
            if exists && !overwrite && ignore_if_exists {
                return Ok(());
            }
            if exists && !overwrite {
                return Err(EditApplyError::Operation(format!(
                    "create target already exists: {}",
                    path.display()
                )));
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&path, []).await?;
        }
        ResourceOp::Delete(delete) => {
            let path = uri_to_path(&delete.uri)?;
            let recursive = delete.options.as_ref().is_some_and(|o| o.recursive == Some(true));
            let metadata = fs::metadata(&path).await?;
            if metadata.is_dir() {
                if recursive {
                    fs::remove_dir_all(&path).await?;
                } else {
                    fs::remove_dir(&path).await?;
                }
            } else {
                fs::remove_file(&path).await?;
            }
        }
        ResourceOp::Rename(rename) => {
            let from = uri_to_path(&rename.old_uri)?;
            let to = uri_to_path(&rename.new_uri)?;
            let overwrite = rename.options.as_ref().is_some_and(|o| o.overwrite == Some(true));
            if fs::metadata(&to).await.is_ok() && !overwrite {
                return Err(EditApplyError::Operation(format!(
                    "rename target already exists: {}",
                    to.display()
                )));
            }
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&from, &to).await?;
        }
    }
    Ok(())
}

/// Line-ending style detected in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    fn detect(content: &str) -> Self {
        if content.contains("\r\n") {
            Self::CrLf
        } else {
            Self::Lf
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

async fn apply_edits_to_file(
    path: &Path,
    mut edits: Vec<TextEdit>,
    encoding: &PositionEncodingKind,
) -> Result<(), EditApplyError> {
    if edits.is_empty() {
        return Ok(());
    }

    let content = fs::read_to_string(path).await?;
    let ending = LineEnding::detect(&content);
    let had_trailing_newline = content.ends_with(&['\n', '\r'][..]);

    let mut ranges = Vec::with_capacity(edits.len());
    for edit in &edits {
        let start = position_to_offset(&content, edit.range.start, encoding)?;
        let end = position_to_offset(&content, edit.range.end, encoding)?;
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        ranges.push((start, end));
    }
    check_no_overlap(path, &ranges)?;

    // Sort edits + their resolved ranges together, descending by start,
    // so applying bottom-up never invalidates an earlier offset.
    let mut indexed: Vec<usize> = (0..edits.len()).collect();
    indexed.sort_by(|&a, &b| ranges[b].0.cmp(&ranges[a].0));

    let mut result = normalize_newlines(&content);
    for &i in &indexed {
        let (start, end) = normalize_range(&content, ranges[i]);
        result.replace_range(start..end, &edits_new_text(&mut edits, i));
    }

    let mut output = result.replace('\n', ending.as_str());
    if !had_trailing_newline {
        while output.ends_with(['\n', '\r']) {
            output.pop();
        }
    }

    fs::write(path, output).await?;
    Ok(())
}

fn edits_new_text(edits: &mut [TextEdit], i: usize) -> String {
    std::mem::take(&mut edits[i].new_text)
}

/// Reduce CRLF to LF for uniform character-offset math; offsets computed
/// against the original (CRLF-containing) content are adjusted by the
/// caller via [`normalize_range`].
fn normalize_newlines(content: &str) -> String {
    content.replace("\r\n", "\n")
}

/// `position_to_offset` resolves offsets against the *original* content,
/// which may contain `\r\n`. After `normalize_newlines` collapses those
/// to `\n`, every offset past a `\r\n` pair needs to shift left by one
/// per preceding pair.
fn normalize_range(original: &str, (start, end): (usize, usize)) -> (usize, usize) {
    let shift = |offset: usize| -> usize {
        offset - original.as_bytes()[..offset.min(original.len())]
            .windows(2)
            .filter(|w| w == b"\r\n")
            .count()
    };
    (shift(start), shift(end))
}

fn check_no_overlap(path: &Path, ranges: &[(usize, usize)]) -> Result<(), EditApplyError> {
    let mut sorted: Vec<(usize, usize)> = ranges.to_vec();
    sorted.sort_unstable();
    for pair in sorted.windows(2) {
        let (a_start, a_end) = pair[0];
        let (b_start, b_end) = pair[1];
        if b_start < a_end {
            return Err(EditApplyError::Overlap {
                path: path.to_path_buf(),
                a_start,
                a_end,
                b_start,
                b_end,
            });
        }
    }
    Ok(())
}

/// Converts an LSP position (line + UTF-8/UTF-16 character offset) to a
/// byte offset into `content`, clamping out-of-range values per spec:
/// the character clamps to the line length, the line clamps to the
/// last line.
pub fn position_to_offset(
    content: &str,
    position: Position,
    encoding: &PositionEncodingKind,
) -> Result<usize, EditApplyError> {
    let mut line_start_byte = 0;
    let mut current_line = 0;
    if position.line > 0 {
        let mut found = false;
        for (i, b) in content.as_bytes().iter().enumerate() {
            if *b == b'\n' {
                current_line += 1;
                if current_line == position.line {
                    line_start_byte = i + 1;
                    found = true;
                    break;
                }
            }
        }
        if !found {
            // Clamp to end of file.
            return Ok(content.len());
        }
    }

    let line_end_byte = content[line_start_byte..]
        .find('\n')
        .map_or(content.len(), |i| line_start_byte + i);
    let line_text = &content[line_start_byte..line_end_byte];

    if *encoding == PositionEncodingKind::UTF8 {
        let char_offset = (position.character as usize).min(line_text.len());
        Ok(line_start_byte + char_offset)
    } else {
        let mut utf16_offset = 0;
        let mut byte_offset = 0;
        for c in line_text.chars() {
            if utf16_offset >= position.character as usize {
                break;
            }
            utf16_offset += c.len_utf16();
            byte_offset += c.len_utf8();
        }
        Ok(line_start_byte + byte_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::Range;
    use tempfile::NamedTempFile;

    fn edit(sl: u32, sc: u32, el: u32, ec: u32, text: &str) -> TextEdit {
        TextEdit {
            range: Range {
                start: Position { line: sl, character: sc },
                end: Position { line: el, character: ec },
            },
            new_text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn empty_edit_list_is_noop() -> Result<(), EditApplyError> {
        let file = NamedTempFile::new().map_err(EditApplyError::Io)?;
        fs::write(file.path(), "hello\n").await?;
        apply_edits_to_file(file.path(), vec![], &PositionEncodingKind::UTF16).await?;
        let content = fs::read_to_string(file.path()).await?;
        assert_eq!(content, "hello\n");
        Ok(())
    }

    #[tokio::test]
    async fn replace_then_restore_round_trips_byte_for_byte() -> Result<(), EditApplyError> {
        let file = NamedTempFile::new().map_err(EditApplyError::Io)?;
        let original = "line one\nline two\nline three\n";
        fs::write(file.path(), original).await?;

        apply_edits_to_file(
            file.path(),
            vec![edit(1, 0, 1, 9, "REPLACED\n")],
            &PositionEncodingKind::UTF16,
        )
        .await?;
        let replaced = fs::read_to_string(file.path()).await?;
        assert_eq!(replaced, "line one\nREPLACED\nline three\n");

        apply_edits_to_file(
            file.path(),
            vec![edit(1, 0, 1, 9, "line two\n")],
            &PositionEncodingKind::UTF16,
        )
        .await?;
        let restored = fs::read_to_string(file.path()).await?;
        assert_eq!(restored, original);
        Ok(())
    }

    #[tokio::test]
    async fn preserves_crlf_and_missing_trailing_newline() -> Result<(), EditApplyError> {
        let file = NamedTempFile::new().map_err(EditApplyError::Io)?;
        let original = "a\r\nb\r\nc";
        fs::write(file.path(), original).await?;

        apply_edits_to_file(
            file.path(),
            vec![edit(1, 0, 1, 1, "B")],
            &PositionEncodingKind::UTF16,
        )
        .await?;
        let result = fs::read_to_string(file.path()).await?;
        assert_eq!(result, "a\r\nB\r\nc");
        Ok(())
    }

    #[tokio::test]
    async fn overlapping_edits_are_rejected_and_file_untouched() -> Result<(), EditApplyError> {
        let file = NamedTempFile::new().map_err(EditApplyError::Io)?;
        let original = "abcdef\n";
        fs::write(file.path(), original).await?;

        let result = apply_edits_to_file(
            file.path(),
            vec![edit(0, 0, 0, 3, "xx"), edit(0, 2, 0, 5, "yy")],
            &PositionEncodingKind::UTF16,
        )
        .await;

        assert!(matches!(result, Err(EditApplyError::Overlap { .. })));
        let content = fs::read_to_string(file.path()).await?;
        assert_eq!(content, original);
        Ok(())
    }

    #[test]
    fn utf16_surrogate_pair_position() {
        let content = "a\u{1F600}b";
        let pos = Position { line: 0, character: 3 };
        let offset = position_to_offset(content, pos, &PositionEncodingKind::UTF16)
            .expect("valid offset");
        assert_eq!(&content[offset..], "b");
    }
}
