// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ingest specs: tracer frames through the pipeline, read back over the API.

use crate::prelude::*;

#[tokio::test]
async fn ingest_then_list_sessions() {
    let world = World::new();
    world.ingest("R1", Some(SK), 1, Stream::Lifecycle, 1000,
                 json!({"type": "session_start", "sessionId": SK}));
    world.ingest("R1", Some(SK), 2, Stream::Assistant, 1100,
                 json!({"type": "llm_input", "prompt": "hi"}));

    let (status, body) = world.get("/api/sessions").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("runId"), Some(&json!("R1")));
    assert_eq!(rows[0].get("eventCount"), Some(&json!(2)));
    assert_eq!(rows[0].get("llmInputCount"), Some(&json!(1)));
}

#[tokio::test]
async fn snapshot_pair_round_trips() {
    let world = World::new();
    world.ingest("R1", Some(SK), 1, Stream::Tool, 1000,
        json!({"type": "tool_call_start", "toolName": "write",
               "fileSnapshot": {"filePath": "/tmp/a", "contentBefore": "X",
                                 "existedBefore": true}}));
    world.ingest("R1", Some(SK), 2, Stream::Tool, 1100,
        json!({"type": "tool_call_end", "toolName": "write",
               "fileSnapshot": {"filePath": "/tmp/a", "contentAfter": "Y",
                                 "existsAfter": true}}));

    let (status, body) = world.get("/api/snapshots/R1").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("contentBefore"), Some(&json!("X")));
    assert_eq!(rows[0].get("contentAfter"), Some(&json!("Y")));
}

#[tokio::test]
async fn traces_fetch_by_session_key_and_run_id() {
    let world = World::new();
    world.ingest("R1", Some(SK), 1, Stream::Lifecycle, 1000, json!({}));
    world.ingest("R2", Some(SK), 1, Stream::Lifecycle, 1200, json!({}));

    let (_, by_session) = world.get(&format!("/api/traces/{SK}")).await;
    assert_eq!(by_session.as_array().unwrap().len(), 2);

    let (_, by_run) = world.get("/api/traces/R2").await;
    assert_eq!(by_run.as_array().unwrap().len(), 1);
    assert_eq!(by_run[0].get("runId"), Some(&json!("R2")));

    // Events are ordered by (ts, seq) and annotated with a branch key.
    assert!(by_session
        .as_array()
        .unwrap()
        .iter()
        .all(|e| e.get("branchKey") == Some(&json!("main"))));
}

#[tokio::test]
async fn background_config_change_attaches_to_live_session() {
    let world = World::new();
    world.ingest("R1", Some(SK), 1, Stream::Lifecycle, 1000, json!({}));

    // Tracer lost the run id for a background filesystem observation.
    world
        .pipeline
        .process(forked_core::TraceFrame {
            run_id: Some("unknown".to_string()),
            session_key: None,
            seq: 7,
            stream: Stream::Tool,
            ts: 2000,
            data: json!({"type": "config_change", "filePath": "/etc/openclaw.json",
                         "fileSnapshot": {"contentBefore": "{}", "existedBefore": true,
                                           "contentAfter": "{\"a\":1}", "existsAfter": true}}),
        })
        .unwrap();

    let (_, traces) = world.get(&format!("/api/traces/{SK}")).await;
    let bg: Vec<_> = traces
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e.get("runId").and_then(Value::as_str).unwrap().starts_with("bg_"))
        .collect();
    assert_eq!(bg.len(), 1);

    // Its whole-file snapshot is queryable through the session too.
    let (_, snapshots) = world.get(&format!("/api/snapshots/{SK}")).await;
    assert_eq!(snapshots.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn health_and_config_endpoints() {
    let world = World::new();
    let (status, health) = world.get("/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health.get("status"), Some(&json!("ok")));

    let (_, config) = world.get("/api/config").await;
    assert_eq!(config.get("retentionDays"), Some(&json!(14)));
}
