// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rewind specs: snapshot capture through ingest, preview, execute, audit.

use crate::prelude::*;

#[tokio::test]
async fn rewind_restores_disk_state_and_audits() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    std::fs::write(&file, "Y").unwrap();
    let path = file.to_string_lossy().into_owned();

    let world = World::new();
    world.ingest("R1", Some(SK), 1, Stream::Tool, 1000,
        json!({"type": "tool_call_start", "toolName": "write",
               "fileSnapshot": {"filePath": &path, "contentBefore": "X",
                                 "existedBefore": true}}));
    world.ingest("R1", Some(SK), 2, Stream::Tool, 1100,
        json!({"type": "tool_call_end", "toolName": "write",
               "fileSnapshot": {"filePath": &path, "contentAfter": "Y",
                                 "existsAfter": true}}));

    let (status, preview) = world.get("/api/rewind/preview/R1/99").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview.pointer("/files/0/action"), Some(&json!("restore")));

    let (status, body) = world
        .post("/api/rewind", json!({"runId": "R1", "targetSeq": 99}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.get("success"), Some(&json!(true)));
    assert_eq!(body.pointer("/results/0/action"), Some(&json!("restored")));
    assert_eq!(body.pointer("/results/0/success"), Some(&json!(true)));
    assert_eq!(
        preview.pointer("/files").unwrap().as_array().unwrap().len(),
        body.pointer("/results").unwrap().as_array().unwrap().len(),
    );

    // Disk state equals the earliest captured pre-state.
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "X");

    // A rewind-stream audit event landed on the run.
    let (_, traces) = world.get("/api/traces/R1").await;
    let audit: Vec<_> = traces
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e.get("stream") == Some(&json!("rewind")))
        .collect();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].pointer("/data/type"), Some(&json!("rewind_executed")));
    assert!(audit[0].pointer("/data/backupId").is_some());
}

#[tokio::test]
async fn rewind_with_no_snapshots_reports_failure() {
    let world = World::new();
    world.ingest("R1", Some(SK), 1, Stream::Lifecycle, 1000, json!({}));

    let (status, body) = world
        .post("/api/rewind", json!({"runId": "R1", "targetSeq": 0}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.get("success"), Some(&json!(false)));
    assert!(body
        .get("message")
        .and_then(Value::as_str)
        .unwrap()
        .starts_with("No file snapshots"));
}
