// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP API for the UI.
//!
//! Loopback-only JSON endpoints, a thin shell over the store and engines.
//! No AuthN/Z beyond the loopback bind; CORS admits localhost origins only.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::error;

use forked_core::Clock;
use forked_storage::{Store, StoreError};

use crate::config::{HostConfig, Retention};
use crate::fork::{ForkEngine, ForkError};
use crate::gateway::GatewayApi;
use crate::lineage::LineageTable;
use crate::rewind::{RewindEngine, RewindError};

/// Shared handler state.
pub struct ApiState<G, C: Clock> {
    pub store: Arc<Mutex<Store>>,
    pub lineage: Arc<LineageTable>,
    pub host_config: Arc<HostConfig>,
    pub retention: Retention,
    pub rewind: Arc<RewindEngine<C>>,
    pub fork: Arc<ForkEngine<G, C>>,
    pub started: Instant,
}

impl<G, C: Clock> Clone for ApiState<G, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            lineage: Arc::clone(&self.lineage),
            host_config: Arc::clone(&self.host_config),
            retention: self.retention,
            rewind: Arc::clone(&self.rewind),
            fork: Arc::clone(&self.fork),
            started: self.started,
        }
    }
}

pub fn router<G, C>(state: ApiState<G, C>) -> Router
where
    G: GatewayApi + 'static,
    C: Clock,
{
    Router::new()
        .route("/api/health", get(health::<G, C>))
        .route("/api/config", get(retention_config::<G, C>))
        .route("/api/openclaw-config", get(openclaw_config::<G, C>))
        .route("/api/sessions", get(sessions::<G, C>))
        .route("/api/traces/{id}", get(traces::<G, C>))
        .route("/api/snapshots/{id}", get(snapshots::<G, C>))
        .route("/api/rewind/preview/{run_id}/{seq}", get(rewind_preview::<G, C>))
        .route("/api/rewind", post(rewind_execute::<G, C>))
        .route("/api/fork", post(fork_execute::<G, C>))
        .layer(cors_layer())
        .with_state(state)
}

/// Serve until the shutdown token fires.
pub async fn serve<G, C>(
    listener: tokio::net::TcpListener,
    state: ApiState<G, C>,
    shutdown: CancellationToken,
) -> std::io::Result<()>
where
    G: GatewayApi + 'static,
    C: Clock,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin, _| {
            origin.to_str().map(is_local_origin).unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

fn is_local_origin(origin: &str) -> bool {
    origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
        .map(|rest| {
            let host = rest.split([':', '/']).next().unwrap_or("");
            host == "localhost" || host == "127.0.0.1"
        })
        .unwrap_or(false)
}

/// Store failures become plain 500s.
struct ApiError(StatusCode, String);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        error!(error = %e, "store error serving API request");
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({"error": self.1}))).into_response()
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"success": false, "message": message})),
    )
        .into_response()
}

async fn health<G, C: Clock>(State(state): State<ApiState<G, C>>) -> Json<Value> {
    Json(json!({"status": "ok", "uptime": state.started.elapsed().as_secs()}))
}

async fn retention_config<G, C: Clock>(State(state): State<ApiState<G, C>>) -> Json<Value> {
    Json(json!({"retentionDays": state.retention.to_value()}))
}

async fn openclaw_config<G, C: Clock>(State(state): State<ApiState<G, C>>) -> Json<Value> {
    match state.host_config.sanitized() {
        Some(config) => Json(json!({"ok": true, "config": config})),
        None => {
            let error = state
                .host_config
                .error
                .clone()
                .unwrap_or_else(|| "host config unavailable".to_string());
            Json(json!({"ok": false, "error": error}))
        }
    }
}

async fn sessions<G, C: Clock>(
    State(state): State<ApiState<G, C>>,
) -> Result<Json<Value>, ApiError> {
    let rows = state.store.lock().list_sessions()?;
    Ok(Json(serde_json::to_value(rows).unwrap_or_default()))
}

/// Events of a session (or single run), each annotated with its branch key.
async fn traces<G, C: Clock>(
    State(state): State<ApiState<G, C>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let rows = state.store.lock().list_traces_by_session_id(&id)?;
    let annotated: Vec<Value> = rows
        .into_iter()
        .map(|row| {
            let branch = state.lineage.branch_key(&row.run_id);
            let mut value = serde_json::to_value(&row).unwrap_or_default();
            if let Some(map) = value.as_object_mut() {
                map.insert("branchKey".to_string(), Value::from(branch));
            }
            value
        })
        .collect();
    Ok(Json(Value::Array(annotated)))
}

async fn snapshots<G, C: Clock>(
    State(state): State<ApiState<G, C>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let rows = state.store.lock().list_snapshots_by_session_id(&id)?;
    Ok(Json(serde_json::to_value(rows).unwrap_or_default()))
}

async fn rewind_preview<G, C: Clock>(
    State(state): State<ApiState<G, C>>,
    Path((run_id, seq)): Path<(String, i64)>,
) -> Result<Json<Value>, ApiError> {
    let files = match state.rewind.preview(&run_id, seq) {
        Ok(files) => files,
        Err(RewindError::NoSnapshots { .. }) => Vec::new(),
        Err(RewindError::Store(e)) => return Err(e.into()),
    };
    Ok(Json(json!({"runId": run_id, "targetSeq": seq, "files": files})))
}

async fn rewind_execute<G, C: Clock>(
    State(state): State<ApiState<G, C>>,
    Json(body): Json<Value>,
) -> Response {
    let (Some(run_id), Some(target_seq)) = (
        body.get("runId").and_then(Value::as_str),
        body.get("targetSeq").and_then(Value::as_i64),
    ) else {
        return bad_request("runId and targetSeq are required");
    };

    match state.rewind.rewind(run_id, target_seq) {
        Ok(outcome) => {
            let mut value = serde_json::to_value(&outcome).unwrap_or_default();
            if let Some(map) = value.as_object_mut() {
                map.insert(
                    "message".to_string(),
                    Value::from(format!("Restored {} file(s)", outcome.files_affected)),
                );
            }
            Json(value).into_response()
        }
        Err(e @ RewindError::NoSnapshots { .. }) => {
            Json(json!({"success": false, "message": e.to_string()})).into_response()
        }
        Err(RewindError::Store(e)) => ApiError::from(e).into_response(),
    }
}

async fn fork_execute<G, C>(
    State(state): State<ApiState<G, C>>,
    Json(body): Json<Value>,
) -> Response
where
    G: GatewayApi + 'static,
    C: Clock,
{
    let (Some(origin), Some(fork_from_seq)) = (
        body.get("originalRunId").and_then(Value::as_str),
        body.get("forkFromSeq").and_then(Value::as_i64),
    ) else {
        return bad_request("originalRunId and forkFromSeq are required");
    };
    let modified = body.get("modifiedData").cloned().unwrap_or_else(|| json!({}));

    match state.fork.fork(origin, fork_from_seq, modified).await {
        Ok(outcome) => Json(serde_json::to_value(&outcome).unwrap_or_default()).into_response(),
        Err(ForkError::Gateway(e)) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"success": false, "message": e.to_string(), "kind": e.kind()})),
        )
            .into_response(),
        Err(ForkError::RewindFailed(e)) => {
            Json(json!({"success": false, "message": e.to_string()})).into_response()
        }
        Err(ForkError::Store(e)) => ApiError::from(e).into_response(),
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
