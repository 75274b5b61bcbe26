// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for the scenario specs.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use parking_lot::Mutex;
use tower::ServiceExt;

use forked_core::{FakeClock, TraceFrame};
use forked_daemon::api::{self, ApiState};
use forked_daemon::config::{HostConfig, Retention};
use forked_daemon::fork::PendingForks;
use forked_daemon::gateway::FakeGateway;
use forked_daemon::ingest::Pipeline;
use forked_daemon::{ForkEngine, LineageTable, RewindEngine};
use forked_storage::Store;

pub use axum::http::StatusCode;
pub use forked_core::Stream;
pub use serde_json::{json, Value};

pub const SK: &str = "agent:main:telegram:g1";
pub const NOW: i64 = 10_000_000;

/// In-process daemon assembly.
pub struct World {
    pub pending: Arc<PendingForks>,
    pub gateway: Arc<FakeGateway>,
    pub pipeline: Pipeline<FakeClock>,
    pub router: Router,
}

impl World {
    pub fn new() -> Self {
        Self::with_channels(&["telegram"])
    }

    pub fn with_channels(channels: &[&str]) -> Self {
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let clock = FakeClock::at(NOW);
        let lineage = Arc::new(LineageTable::new(2));
        let pending = Arc::new(PendingForks::new());
        let rewind = Arc::new(RewindEngine::new(Arc::clone(&store), clock.clone()));
        let gateway = Arc::new(FakeGateway::new());
        let fork = Arc::new(ForkEngine::new(
            Arc::clone(&store),
            Arc::clone(&lineage),
            Arc::clone(&pending),
            Arc::clone(&rewind),
            Arc::clone(&gateway),
            channels.iter().map(|c| c.to_string()).collect(),
            clock.clone(),
        ));
        let pipeline = Pipeline::new(
            Arc::clone(&store),
            Arc::clone(&lineage),
            Arc::clone(&pending),
            clock.clone(),
        );
        let state = ApiState {
            store: Arc::clone(&store),
            lineage: Arc::clone(&lineage),
            host_config: Arc::new(HostConfig::from_file(None)),
            retention: Retention::Days(14),
            rewind,
            fork,
            started: Instant::now(),
        };
        let router = api::router(state);
        World { pending, gateway, pipeline, router }
    }

    /// Push one tracer frame through the ingest pipeline.
    pub fn ingest(&self, run_id: &str, session_key: Option<&str>, seq: i64, stream: Stream, ts: i64, data: Value) {
        self.pipeline
            .process(TraceFrame {
                run_id: Some(run_id.to_string()),
                session_key: session_key.map(str::to_string),
                seq,
                stream,
                ts,
                data,
            })
            .unwrap();
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    pub async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}
