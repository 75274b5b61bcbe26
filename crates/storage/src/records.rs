// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Row records for events, snapshots, and derived aggregates.

use forked_core::Stream;
use serde::Serialize;

/// Insert shape for one event row.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub run_id: String,
    pub session_key: Option<String>,
    pub seq: i64,
    pub stream: Stream,
    /// Tracer-assigned wall-clock ms.
    pub ts: i64,
    pub data: serde_json::Value,
    pub is_fork: bool,
    pub forked_from_run_id: Option<String>,
    /// Arrival ms in the daemon.
    pub created_at: i64,
}

/// One stored event, as served by the trace API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRow {
    pub id: i64,
    pub run_id: String,
    pub session_key: Option<String>,
    pub seq: i64,
    pub stream: String,
    pub ts: i64,
    pub data: serde_json::Value,
    pub is_fork: bool,
    pub forked_from_run_id: Option<String>,
    pub created_at: i64,
}

/// One row per run in the session listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    pub run_id: String,
    /// Most recent non-null session key observed for the run.
    pub session_key: Option<String>,
    pub start_time: i64,
    pub last_activity: i64,
    pub event_count: i64,
    pub llm_input_count: i64,
    pub llm_output_count: i64,
    pub is_fork: bool,
    pub forked_from_run_id: Option<String>,
}

/// One stored file snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRow {
    pub id: i64,
    pub run_id: String,
    pub seq: i64,
    pub tool_name: Option<String>,
    pub file_path: String,
    pub content_before: Option<String>,
    pub content_after: Option<String>,
    pub existed_before: bool,
    pub exists_after: bool,
    pub created_at: i64,
}

/// Per-run lineage facts, used to rebuild the in-memory lineage table at
/// startup.
#[derive(Debug, Clone)]
pub struct LineageRow {
    pub run_id: String,
    pub is_fork: bool,
    pub forked_from_run_id: Option<String>,
    pub session_key: Option<String>,
    pub event_count: i64,
    pub has_fork_info: bool,
}
