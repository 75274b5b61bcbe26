// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File snapshot captures carried inline in tool and config-change events.

use serde_json::Value;

/// Cap on stored snapshot bodies. Content beyond this is cut and marked.
pub const MAX_SNAPSHOT_BYTES: usize = 1024 * 1024;

/// Literal suffix appended to truncated snapshot bodies. Not reversible:
/// rewinding a truncated snapshot is best-effort, not bit-exact.
pub const TRUNCATED_MARKER: &str = "[TRUNCATED]";

/// A before/after capture of one file, read out of `data.fileSnapshot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotCapture {
    pub file_path: String,
    pub tool_name: Option<String>,
    pub content_before: Option<String>,
    pub content_after: Option<String>,
    pub existed_before: bool,
    pub exists_after: bool,
}

impl SnapshotCapture {
    /// Extract a capture from an event payload.
    ///
    /// Requires `fileSnapshot` plus a file path from either `data.filePath`
    /// or `fileSnapshot.filePath` (tracers have emitted both spellings).
    pub fn from_payload(data: &Value) -> Option<Self> {
        let snap = data.get("fileSnapshot")?;
        let file_path = data
            .get("filePath")
            .and_then(Value::as_str)
            .or_else(|| snap.get("filePath").and_then(Value::as_str))?
            .to_string();

        Some(Self {
            file_path,
            tool_name: data.get("toolName").and_then(Value::as_str).map(str::to_string),
            content_before: snap
                .get("contentBefore")
                .and_then(Value::as_str)
                .map(truncate_content),
            content_after: snap.get("contentAfter").and_then(Value::as_str).map(truncate_content),
            existed_before: snap.get("existedBefore").and_then(Value::as_bool).unwrap_or(false),
            exists_after: snap.get("existsAfter").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

/// Cut a body at [`MAX_SNAPSHOT_BYTES`] (on a char boundary) and append the
/// truncation marker.
pub fn truncate_content(content: &str) -> String {
    if content.len() <= MAX_SNAPSHOT_BYTES {
        return content.to_string();
    }
    let mut cut = MAX_SNAPSHOT_BYTES;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = content[..cut].to_string();
    out.push_str(TRUNCATED_MARKER);
    out
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
