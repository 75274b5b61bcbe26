// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem rewind.
//!
//! Restores every file touched up to a target sequence back to its earliest
//! captured pre-state, backing up current contents first. Atomicity is per
//! file: individual failures land in the result list and the overall call
//! still succeeds when at least one file was restored. Backup tuples are
//! kept in the audit record for manual recovery.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use forked_core::Clock;
use forked_storage::{SnapshotRow, Store, StoreError};

#[derive(Debug, Error)]
pub enum RewindError {
    #[error("No file snapshots recorded for run {run_id} at or before seq {target_seq}")]
    NoSnapshots { run_id: String, target_seq: i64 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Preview line: what a rewind would do to one file.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreviewFile {
    pub file_path: String,
    pub original_existed: bool,
    /// `restore` or `delete`.
    pub action: &'static str,
}

/// Result line for one file of an executed rewind.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    pub file_path: String,
    /// `restored`, `deleted`, or `already_absent`.
    pub action: &'static str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Pre-rewind state of one file, for manual recovery.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    pub file_path: String,
    pub existed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Outcome of an executed rewind.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewindOutcome {
    pub success: bool,
    pub backup_id: String,
    pub files_affected: usize,
    pub results: Vec<FileResult>,
    pub backups: Vec<BackupEntry>,
}

pub struct RewindEngine<C: Clock> {
    store: Arc<Mutex<Store>>,
    clock: C,
}

impl<C: Clock> RewindEngine<C> {
    pub fn new(store: Arc<Mutex<Store>>, clock: C) -> Self {
        Self { store, clock }
    }

    /// The per-file plan without touching the filesystem.
    pub fn preview(&self, run_id: &str, target_seq: i64) -> Result<Vec<PreviewFile>, RewindError> {
        let snapshots = self.store.lock().snapshots_for_rewind(run_id, target_seq)?;
        Ok(earliest_per_path(snapshots)
            .into_iter()
            .map(|snap| PreviewFile {
                original_existed: snap.existed_before,
                action: if snap.existed_before { "restore" } else { "delete" },
                file_path: snap.file_path,
            })
            .collect())
    }

    /// Execute a rewind and append the audit event to the run.
    pub fn rewind(&self, run_id: &str, target_seq: i64) -> Result<RewindOutcome, RewindError> {
        let outcome = self.perform(run_id, target_seq)?;

        let session_key = self.store.lock().latest_session_key(run_id)?;
        let audit = self.audit_payload(run_id, target_seq, &outcome);
        if let Err(e) = self.store.lock().append_audit_event(
            run_id,
            session_key.as_deref(),
            None,
            audit,
            false,
            None,
            self.clock.epoch_ms(),
        ) {
            warn!(run_id, error = %e, "failed to append rewind audit event");
        }

        Ok(outcome)
    }

    /// Execute the filesystem operations without writing an audit event.
    /// The fork engine uses this and writes its own audit row inside the
    /// placeholder run.
    pub fn perform(&self, run_id: &str, target_seq: i64) -> Result<RewindOutcome, RewindError> {
        let snapshots = self.store.lock().snapshots_for_rewind(run_id, target_seq)?;
        if snapshots.is_empty() {
            return Err(RewindError::NoSnapshots {
                run_id: run_id.to_string(),
                target_seq,
            });
        }

        let targets = earliest_per_path(snapshots);
        let backup_id = format!("rewind_{}", self.clock.epoch_ms());

        let backups: Vec<BackupEntry> = targets
            .iter()
            .map(|snap| {
                let path = Path::new(&snap.file_path);
                let content = std::fs::read_to_string(path).ok();
                BackupEntry {
                    file_path: snap.file_path.clone(),
                    existed: path.exists(),
                    content,
                }
            })
            .collect();

        let results: Vec<FileResult> = targets.iter().map(restore_file).collect();
        let success = results.iter().any(|r| r.success);

        info!(
            run_id,
            target_seq,
            backup_id,
            files = results.len(),
            restored = results.iter().filter(|r| r.success).count(),
            "rewind executed"
        );

        Ok(RewindOutcome {
            success,
            backup_id,
            files_affected: results.len(),
            results,
            backups,
        })
    }

    /// The `rewind_executed` audit payload.
    pub fn audit_payload(
        &self,
        run_id: &str,
        target_seq: i64,
        outcome: &RewindOutcome,
    ) -> serde_json::Value {
        json!({
            "type": "rewind_executed",
            "runId": run_id,
            "targetSeq": target_seq,
            "backupId": outcome.backup_id,
            "filesAffected": outcome.files_affected,
            "results": outcome.results,
            "backups": outcome.backups,
        })
    }
}

/// Earliest snapshot per distinct path: its `content_before`/`existed_before`
/// is the file state just prior to the target sequence.
fn earliest_per_path(snapshots: Vec<SnapshotRow>) -> Vec<SnapshotRow> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for snap in snapshots {
        if seen.insert(snap.file_path.clone()) {
            out.push(snap);
        }
    }
    out
}

/// Restore or delete one file per its earliest snapshot.
fn restore_file(snap: &SnapshotRow) -> FileResult {
    let path = Path::new(&snap.file_path);

    if !snap.existed_before {
        if path.exists() {
            return match std::fs::remove_file(path) {
                Ok(()) => FileResult {
                    file_path: snap.file_path.clone(),
                    action: "deleted",
                    success: true,
                    error: None,
                },
                Err(e) => FileResult {
                    file_path: snap.file_path.clone(),
                    action: "deleted",
                    success: false,
                    error: Some(e.to_string()),
                },
            };
        }
        return FileResult {
            file_path: snap.file_path.clone(),
            action: "already_absent",
            success: true,
            error: None,
        };
    }

    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, snap.content_before.as_deref().unwrap_or(""))
    };
    match write() {
        Ok(()) => FileResult {
            file_path: snap.file_path.clone(),
            action: "restored",
            success: true,
            error: None,
        },
        Err(e) => FileResult {
            file_path: snap.file_path.clone(),
            action: "restored",
            success: false,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
#[path = "rewind_tests.rs"]
mod tests;
