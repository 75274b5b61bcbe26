// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::fork::PendingFork;
use forked_core::FakeClock;
use serde_json::{json, Value};

const SK: &str = "agent:main:telegram:g1";

struct Harness {
    store: Arc<Mutex<Store>>,
    lineage: Arc<LineageTable>,
    pending: Arc<PendingForks>,
    pipeline: Pipeline<FakeClock>,
}

fn harness() -> Harness {
    let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
    let lineage = Arc::new(LineageTable::new(2));
    let pending = Arc::new(PendingForks::new());
    let pipeline = Pipeline::new(
        Arc::clone(&store),
        Arc::clone(&lineage),
        Arc::clone(&pending),
        FakeClock::at(5_000),
    );
    Harness { store, lineage, pending, pipeline }
}

fn frame(
    run_id: Option<&str>,
    session_key: Option<&str>,
    seq: i64,
    stream: Stream,
    ts: i64,
    data: Value,
) -> TraceFrame {
    TraceFrame {
        run_id: run_id.map(str::to_string),
        session_key: session_key.map(str::to_string),
        seq,
        stream,
        ts,
        data,
    }
}

#[test]
fn ingest_then_list_sessions() {
    let h = harness();
    h.pipeline
        .process(frame(Some("R1"), Some(SK), 1, Stream::Lifecycle, 1000,
                       json!({"type": "session_start", "sessionId": SK})))
        .unwrap();
    h.pipeline
        .process(frame(Some("R1"), Some(SK), 2, Stream::Assistant, 1100,
                       json!({"type": "llm_input", "prompt": "hi"})))
        .unwrap();

    let sessions = h.store.lock().list_sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].run_id, "R1");
    assert_eq!(sessions[0].event_count, 2);
    assert_eq!(sessions[0].llm_input_count, 1);
}

#[test]
fn snapshot_pair_produces_one_filled_row() {
    let h = harness();
    h.pipeline
        .process(frame(Some("R1"), Some(SK), 1, Stream::Tool, 1000,
            json!({"type": "tool_call_start", "toolName": "write",
                   "fileSnapshot": {"filePath": "/tmp/a", "contentBefore": "X",
                                     "existedBefore": true}})))
        .unwrap();
    h.pipeline
        .process(frame(Some("R1"), Some(SK), 2, Stream::Tool, 1100,
            json!({"type": "tool_call_end", "toolName": "write",
                   "fileSnapshot": {"filePath": "/tmp/a", "contentAfter": "Y",
                                     "existsAfter": true}})))
        .unwrap();

    let rows = h.store.lock().list_snapshots_by_session_id("R1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content_before.as_deref(), Some("X"));
    assert_eq!(rows[0].content_after.as_deref(), Some("Y"));
}

#[test]
fn config_change_writes_whole_file_snapshot() {
    let h = harness();
    h.pipeline
        .process(frame(Some("R1"), Some(SK), 1, Stream::Tool, 1000,
            json!({"type": "config_change", "filePath": "/etc/x.json",
                   "fileSnapshot": {"contentBefore": "{}", "existedBefore": true,
                                     "contentAfter": "{\"a\":1}", "existsAfter": true}})))
        .unwrap();

    let rows = h.store.lock().list_snapshots_by_session_id("R1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content_before.as_deref(), Some("{}"));
    assert_eq!(rows[0].content_after.as_deref(), Some("{\"a\":1}"));
}

#[test]
fn background_event_synthesizes_run_from_known_session() {
    let h = harness();
    h.pipeline
        .process(frame(Some("R1"), Some(SK), 1, Stream::Lifecycle, 1000, json!({})))
        .unwrap();

    let row = h
        .pipeline
        .process(frame(Some("unknown"), None, 3, Stream::Tool, 2000,
                       json!({"type": "config_change"})))
        .unwrap();
    assert!(row.is_some());

    let events = h.store.lock().list_traces_by_session_id(SK).unwrap();
    let bg: Vec<_> = events.iter().filter(|e| e.run_id.starts_with("bg_")).collect();
    assert_eq!(bg.len(), 1);
    assert_eq!(bg[0].run_id, format!("bg_{}_2000_3", &SK[..8]));
    assert_eq!(bg[0].session_key.as_deref(), Some(SK));
}

#[test]
fn background_event_without_known_session_is_dropped() {
    let h = harness();
    let row = h
        .pipeline
        .process(frame(None, None, 1, Stream::Tool, 2000, json!({"type": "config_change"})))
        .unwrap();
    assert!(row.is_none());
    assert!(h.store.lock().list_sessions().unwrap().is_empty());
}

#[test]
fn non_background_frame_without_run_id_is_dropped() {
    let h = harness();
    h.pipeline
        .process(frame(Some("R1"), Some(SK), 1, Stream::Lifecycle, 1000, json!({})))
        .unwrap();
    let row = h
        .pipeline
        .process(frame(None, Some(SK), 2, Stream::Assistant, 1100,
                       json!({"type": "llm_input"})))
        .unwrap();
    assert!(row.is_none());
}

#[test]
fn new_run_after_fork_head_is_promoted_and_backfilled() {
    let h = harness();
    // Main run with enough history to be immune to promotion.
    for seq in 1..=5 {
        h.pipeline
            .process(frame(Some("M"), Some(SK), seq, Stream::Lifecycle, 1000 + seq, json!({})))
            .unwrap();
    }
    h.lineage.record_placeholder("P", "M", Some(SK));

    // New run N: first event inserts unstamped, then promotion back-fills.
    h.pipeline
        .process(frame(Some("N"), Some(SK), 1, Stream::Lifecycle, 2000, json!({})))
        .unwrap();
    h.pipeline
        .process(frame(Some("N"), Some(SK), 2, Stream::Assistant, 2100, json!({})))
        .unwrap();

    let events = h.store.lock().events_for_run("N").unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.is_fork));
    assert!(events.iter().all(|e| e.forked_from_run_id.as_deref() == Some("P")));

    // M itself is untouched.
    let main_events = h.store.lock().events_for_run("M").unwrap();
    assert!(main_events.iter().all(|e| !e.is_fork));
}

#[test]
fn newly_seen_run_consumes_pending_fork() {
    let h = harness();
    h.pending.register(PendingFork {
        placeholder_run_id: "P".to_string(),
        origin_run_id: "M".to_string(),
        fork_from_seq: 4,
        session_key: Some(SK.to_string()),
        modified_payload: json!({}),
        started_at_ms: 5_000,
    });

    h.pipeline
        .process(frame(Some("GW1"), Some(SK), 1, Stream::Lifecycle, 6000, json!({})))
        .unwrap();

    assert!(h.pending.is_empty());
    assert!(h.lineage.is_linked("GW1"));
    let events = h.store.lock().events_for_run("GW1").unwrap();
    assert!(events[0].is_fork);
    assert_eq!(events[0].forked_from_run_id.as_deref(), Some("P"));
}

#[test]
fn store_order_keeps_seq_non_decreasing() {
    let h = harness();
    for seq in [1, 2, 3, 5, 8] {
        h.pipeline
            .process(frame(Some("R1"), Some(SK), seq, Stream::Lifecycle, 1000 + seq, json!({})))
            .unwrap();
    }
    let events = h.store.lock().events_for_run("R1").unwrap();
    assert!(events.windows(2).all(|w| w[0].seq <= w[1].seq));
}
