// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fork specs: placeholder branches, gateway round trip, run classification.

use crate::prelude::*;

#[tokio::test]
async fn fork_creates_branch_and_replays_through_gateway() {
    let world = World::new();
    world.ingest("M", Some(SK), 1, Stream::Lifecycle, 1000,
                 json!({"type": "message_received", "content": "hi",
                        "from": "telegram:group:-100:topic:42"}));
    world.ingest("M", Some(SK), 2, Stream::Assistant, 1100,
                 json!({"type": "llm_input", "prompt": "hi"}));

    let (status, body) = world
        .post("/api/fork", json!({"originalRunId": "M", "forkFromSeq": 2,
                                   "modifiedData": {"prompt": "try differently"}}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.get("success"), Some(&json!(true)));
    let new_run_id = body.get("newRunId").and_then(Value::as_str).unwrap().to_string();
    assert!(new_run_id.starts_with("fork_M_"));

    // Placeholder round trip: fork_info appears in the session timeline with
    // its lineage stamp and its own branch key.
    let (_, traces) = world.get(&format!("/api/traces/{SK}")).await;
    let placeholder: Vec<_> = traces
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e.get("stream") == Some(&json!("fork_info")))
        .collect();
    assert_eq!(placeholder.len(), 1);
    assert_eq!(placeholder[0].get("isFork"), Some(&json!(true)));
    assert_eq!(placeholder[0].get("forkedFromRunId"), Some(&json!("M")));
    assert_eq!(placeholder[0].get("branchKey"), Some(&json!(new_run_id.as_str())));

    // The edited prompt was replayed through the gateway with the session key.
    let calls = world.gateway.agent_calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "try differently");
    assert_eq!(calls[0].1.as_deref(), Some(SK));

    // Echo first, then the terminal reply, both to the derived hint target.
    let sends = world.gateway.sends.lock();
    assert_eq!(sends.len(), 2);
    assert_eq!(sends[0].message, "FORKED (YOU): try differently");
    assert_eq!(sends[0].to, "-100");
    assert_eq!(sends[0].thread_id.as_deref(), Some("42"));
}

#[tokio::test]
async fn new_gateway_run_is_classified_under_the_fork() {
    let world = World::new();
    // Long-lived main run.
    for seq in 1..=5 {
        world.ingest("M", Some(SK), seq, Stream::Lifecycle, 1000 + seq, json!({}));
    }

    let (_, body) = world
        .post("/api/fork", json!({"originalRunId": "M", "forkFromSeq": 3,
                                   "modifiedData": {"prompt": "redo"}}))
        .await;
    let placeholder = body.get("newRunId").and_then(Value::as_str).unwrap().to_string();
    // The fake gateway returned no runId; the pending fork waits for ingest.
    assert_eq!(body.get("linked"), Some(&json!(false)));

    // The gateway-created run N starts streaming events.
    world.ingest("N", Some(SK), 1, Stream::Lifecycle, NOW + 100, json!({}));
    world.ingest("N", Some(SK), 2, Stream::Assistant, NOW + 200, json!({}));

    let (_, traces) = world.get("/api/traces/N").await;
    let rows = traces.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    // Every row of N carries the lineage stamp pointing at the placeholder.
    for row in rows {
        assert_eq!(row.get("isFork"), Some(&json!(true)), "{row}");
        assert_eq!(row.get("forkedFromRunId"), Some(&json!(placeholder.as_str())));
        assert_eq!(row.get("branchKey"), Some(&json!(placeholder.as_str())));
    }

    // Main run M stays on the main branch.
    let (_, main_traces) = world.get("/api/traces/M").await;
    assert!(main_traces
        .as_array()
        .unwrap()
        .iter()
        .all(|e| e.get("isFork") == Some(&json!(false))));
}

#[tokio::test]
async fn fork_with_pre_rewind_restores_before_replay() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    std::fs::write(&file, "after-edit").unwrap();
    let path = file.to_string_lossy().into_owned();

    let world = World::new();
    world.ingest("M", Some(SK), 1, Stream::Tool, 1000,
        json!({"type": "tool_call_start", "toolName": "write",
               "fileSnapshot": {"filePath": &path, "contentBefore": "pristine",
                                 "existedBefore": true}}));

    let (status, body) = world
        .post("/api/fork", json!({
            "originalRunId": "M", "forkFromSeq": 2,
            "modifiedData": {"prompt": "redo",
                              "__forkedRewindFirst": {"runId": "M", "targetSeq": 1}}}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.get("success"), Some(&json!(true)));
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "pristine");

    // The placeholder carries the rewind audit at seq 2 and the persisted
    // fork_info does not leak the control flag.
    let new_run_id = body.get("newRunId").and_then(Value::as_str).unwrap();
    let (_, traces) = world.get(&format!("/api/traces/{new_run_id}")).await;
    let rows = traces.as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows[0].pointer("/data/modifiedData/__forkedRewindFirst").is_none());
    assert_eq!(rows[2].get("seq"), Some(&json!(2)));
    assert_eq!(rows[2].get("stream"), Some(&json!("rewind")));
}

#[tokio::test]
async fn gateway_failure_returns_502_but_keeps_branch() {
    let world = World::new();
    world.ingest("M", Some(SK), 1, Stream::Lifecycle, 1000, json!({}));
    world
        .gateway
        .respond_with(Err(forked_daemon::GatewayError::Rejected("agent busy".to_string())));

    let (status, body) = world
        .post("/api/fork", json!({"originalRunId": "M", "forkFromSeq": 2, "modifiedData": {}}))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body.get("success"), Some(&json!(false)));

    assert!(world.pending.is_empty());
    let (_, traces) = world.get(&format!("/api/traces/{SK}")).await;
    assert!(traces
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e.get("stream") == Some(&json!("fork_info"))));
}
