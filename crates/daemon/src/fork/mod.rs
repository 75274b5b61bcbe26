// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fork orchestration.
//!
//! A fork re-runs an agent from a chosen point of an existing run with
//! edited inputs: placeholder branch events are written first, the
//! filesystem is optionally rewound, the gateway executes the replay, the
//! reply is echoed back to the originating user channel, and the
//! gateway-created run is linked under the placeholder as its events arrive.

pub mod hint;
pub mod pending;

pub use hint::{derive_hint, parse_address, DeliveryHint, HintContext, SESSION_TAIL_LIMIT};
pub use pending::{run_reaper, PendingFork, PendingForks, PENDING_FORK_TTL};

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use forked_core::{payload, short, Clock, Stream};
use forked_storage::{EventRow, NewEvent, Store, StoreError};

use crate::gateway::{GatewayApi, GatewayError};
use crate::lineage::LineageTable;
use crate::rewind::{RewindEngine, RewindError};

/// Echo truncation limit (characters).
pub const ECHO_LIMIT: usize = 3000;

/// Control flag the UI smuggles inside the edited payload. Extracted at the
/// boundary and never persisted into `fork_info`.
const REWIND_CONTROL_KEY: &str = "__forkedRewindFirst";

/// Window behind `started_at` when scanning the store for the
/// gateway-created run.
const LINKAGE_LOOKBACK_MS: i64 = 1_000;

#[derive(Debug, Error)]
pub enum ForkError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Pre-fork rewind failed; the pending fork was dropped but the
    /// placeholder branch remains visible.
    #[error("{0}")]
    RewindFailed(#[from] RewindError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkOutcome {
    pub success: bool,
    pub new_run_id: String,
    pub linked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_result: Option<Value>,
}

pub struct ForkEngine<G, C: Clock> {
    store: Arc<Mutex<Store>>,
    lineage: Arc<LineageTable>,
    pending: Arc<PendingForks>,
    rewind: Arc<RewindEngine<C>>,
    gateway: Arc<G>,
    configured_channels: HashSet<String>,
    clock: C,
}

impl<G: GatewayApi, C: Clock> ForkEngine<G, C> {
    pub fn new(
        store: Arc<Mutex<Store>>,
        lineage: Arc<LineageTable>,
        pending: Arc<PendingForks>,
        rewind: Arc<RewindEngine<C>>,
        gateway: Arc<G>,
        configured_channels: HashSet<String>,
        clock: C,
    ) -> Self {
        Self { store, lineage, pending, rewind, gateway, configured_channels, clock }
    }

    /// Execute a fork end to end.
    pub async fn fork(
        &self,
        origin_run_id: &str,
        fork_from_seq: i64,
        modified_payload: Value,
    ) -> Result<ForkOutcome, ForkError> {
        let history = self.store.lock().events_before(origin_run_id, fork_from_seq)?;
        let session_key = self.store.lock().latest_session_key(origin_run_id)?;
        let (rewind_ctrl, edited_payload) = split_rewind_control(modified_payload);
        let message = choose_replay_message(&edited_payload, &history);

        let started_at = self.clock.epoch_ms();
        let new_run_id = format!("fork_{}_{}", short(origin_run_id, 8), started_at);

        self.write_placeholder(
            &new_run_id,
            origin_run_id,
            fork_from_seq,
            session_key.as_deref(),
            &edited_payload,
            &message,
            started_at,
        )?;
        self.lineage.record_placeholder(&new_run_id, origin_run_id, session_key.as_deref());
        self.pending.register(PendingFork {
            placeholder_run_id: new_run_id.clone(),
            origin_run_id: origin_run_id.to_string(),
            fork_from_seq,
            session_key: session_key.clone(),
            modified_payload: edited_payload.clone(),
            started_at_ms: started_at,
        });

        if let Some((rewind_run, rewind_seq)) = rewind_ctrl {
            match self.rewind.perform(&rewind_run, rewind_seq) {
                Ok(outcome) => {
                    let audit = self.rewind.audit_payload(&rewind_run, rewind_seq, &outcome);
                    self.store.lock().append_audit_event(
                        &new_run_id,
                        session_key.as_deref(),
                        Some(2),
                        audit,
                        true,
                        Some(origin_run_id),
                        self.clock.epoch_ms(),
                    )?;
                    write_config_payload(&edited_payload);
                }
                Err(e) => {
                    warn!(origin_run_id, error = %e, "pre-fork rewind failed, dropping fork");
                    self.pending.remove(&new_run_id);
                    return Err(e.into());
                }
            }
        }

        let session_tail = match session_key.as_deref() {
            Some(key) => self.store.lock().lifecycle_tail(key, SESSION_TAIL_LIMIT)?,
            None => Vec::new(),
        };
        let delivery = derive_hint(&HintContext {
            modified_payload: &edited_payload,
            history: &history,
            session_key: session_key.as_deref(),
            session_tail: &session_tail,
            configured_channels: &self.configured_channels,
        });

        if let Some(target) = delivery.as_ref().filter(|h| h.channel == "telegram") {
            let echo = format!("FORKED (YOU): {}", truncate_chars(&message, ECHO_LIMIT));
            if let Err(e) = self
                .gateway
                .send_message(&target.channel, &target.to, target.thread_id.as_deref(), &echo)
                .await
            {
                warn!(error = %e, "fork echo delivery failed");
            }
        }

        let gateway_result = match self.gateway.run_agent(&message, session_key.as_deref()).await {
            Ok(result) => result,
            Err(e) => {
                // The placeholder branch stays visible; only the pending
                // linkage entry is withdrawn.
                self.pending.remove(&new_run_id);
                return Err(e.into());
            }
        };

        if let (Some(text), Some(target)) = (terminal_text(&gateway_result), delivery.as_ref()) {
            if let Err(e) = self
                .gateway
                .send_message(&target.channel, &target.to, target.thread_id.as_deref(), &text)
                .await
            {
                warn!(error = %e, "fork reply delivery failed");
            }
        }

        let linked = self.link_after_run(&new_run_id, origin_run_id, &gateway_result, started_at, session_key.as_deref())?;

        Ok(ForkOutcome {
            success: true,
            new_run_id,
            linked,
            gateway_result: Some(gateway_result),
        })
    }

    /// seq 0 `fork_info` plus the synthetic seq 1 replay message, written
    /// under one store lock so no reader observes a half-written placeholder.
    #[allow(clippy::too_many_arguments)]
    fn write_placeholder(
        &self,
        new_run_id: &str,
        origin_run_id: &str,
        fork_from_seq: i64,
        session_key: Option<&str>,
        edited_payload: &Value,
        message: &str,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let store = self.store.lock();
        store.insert_event(&NewEvent {
            run_id: new_run_id.to_string(),
            session_key: session_key.map(str::to_string),
            seq: 0,
            stream: Stream::ForkInfo,
            ts: now_ms,
            data: json!({
                "type": "fork_info",
                "originalRunId": origin_run_id,
                "forkFromSeq": fork_from_seq,
                "modifiedData": edited_payload,
            }),
            is_fork: true,
            forked_from_run_id: Some(origin_run_id.to_string()),
            created_at: now_ms,
        })?;
        if !message.is_empty() {
            store.insert_event(&NewEvent {
                run_id: new_run_id.to_string(),
                session_key: session_key.map(str::to_string),
                seq: 1,
                stream: Stream::Lifecycle,
                ts: now_ms,
                data: json!({
                    "type": "message_received",
                    "source": "forked",
                    "content": message,
                    "timestamp": now_ms,
                    "synthetic": true,
                }),
                is_fork: true,
                forked_from_run_id: Some(origin_run_id.to_string()),
                created_at: now_ms,
            })?;
        }
        Ok(())
    }

    /// Link the gateway-created run under the placeholder: first via the
    /// returned runId, then by scanning runs that appeared since the fork
    /// started. Returns whether this fork's pending entry was consumed.
    fn link_after_run(
        &self,
        new_run_id: &str,
        origin_run_id: &str,
        gateway_result: &Value,
        started_at: i64,
        session_key: Option<&str>,
    ) -> Result<bool, StoreError> {
        if let Some(returned) = gateway_result.get("runId").and_then(Value::as_str) {
            try_link(&self.store, &self.lineage, &self.pending, returned);
        }
        if !self.pending.contains(new_run_id) {
            return Ok(true);
        }

        let candidates = self
            .store
            .lock()
            .runs_created_after(started_at - LINKAGE_LOOKBACK_MS, session_key)?;
        for candidate in candidates {
            if candidate == new_run_id || candidate == origin_run_id {
                continue;
            }
            try_link(&self.store, &self.lineage, &self.pending, &candidate);
            if !self.pending.contains(new_run_id) {
                return Ok(true);
            }
        }
        Ok(!self.pending.contains(new_run_id))
    }
}

/// Adopt `new_run_id` against the FIFO-oldest pending fork.
///
/// Idempotent: an already-linked run is never re-stamped. A pending entry
/// popped for its own placeholder or origin is put back untouched.
pub fn try_link(
    store: &Mutex<Store>,
    lineage: &LineageTable,
    pending: &PendingForks,
    new_run_id: &str,
) -> Option<PendingFork> {
    if lineage.is_linked(new_run_id) {
        return None;
    }
    let entry = pending.pop_oldest()?;
    if new_run_id == entry.placeholder_run_id || new_run_id == entry.origin_run_id {
        pending.push_front(entry);
        return None;
    }

    if let Err(e) = store.lock().stamp_run_lineage(new_run_id, &entry.placeholder_run_id) {
        warn!(new_run_id, error = %e, "failed to back-fill fork lineage");
        pending.push_front(entry);
        return None;
    }
    lineage.link_fork_child(new_run_id, &entry.placeholder_run_id, entry.session_key.as_deref());
    info!(
        new_run_id,
        placeholder = entry.placeholder_run_id,
        "linked gateway run into fork lineage"
    );
    Some(entry)
}

/// Detach the `__forkedRewindFirst` control flag from the edited payload.
fn split_rewind_control(mut payload: Value) -> (Option<(String, i64)>, Value) {
    let ctrl = payload
        .as_object_mut()
        .and_then(|map| map.remove(REWIND_CONTROL_KEY))
        .and_then(|ctrl| {
            let run_id = ctrl.get("runId").and_then(Value::as_str)?.to_string();
            let target_seq = ctrl.get("targetSeq").and_then(Value::as_i64)?;
            Some((run_id, target_seq))
        });
    (ctrl, payload)
}

/// The message replayed to the agent: the edited payload's own text, else
/// the newest inbound/prompt text in the history slice, else the serialized
/// payload itself.
fn choose_replay_message(edited_payload: &Value, history: &[EventRow]) -> String {
    if let Some(text) = payload::replay_text(edited_payload) {
        return text.to_string();
    }
    for event in history.iter().rev() {
        if let Some(text) =
            payload::message_content(&event.data).or_else(|| payload::llm_prompt(&event.data))
        {
            return text.to_string();
        }
    }
    serde_json::to_string(edited_payload).unwrap_or_default()
}

/// After a pre-fork rewind, an edited config-change payload is written back
/// to disk so the forked run starts from the edited configuration.
fn write_config_payload(edited_payload: &Value) {
    if payload::data_type(edited_payload) != Some(payload::CONFIG_CHANGE) {
        return;
    }
    let Some(file_path) = edited_payload.get("filePath").and_then(Value::as_str) else {
        return;
    };
    let body = match edited_payload.get("currentRaw").and_then(Value::as_str) {
        Some(raw) => raw.to_string(),
        None => match edited_payload.get("currentContent") {
            Some(content) => serde_json::to_string_pretty(content).unwrap_or_default(),
            None => return,
        },
    };
    if let Err(e) = std::fs::write(file_path, body) {
        warn!(file_path, error = %e, "failed to write edited config");
    }
}

fn terminal_text(gateway_result: &Value) -> Option<String> {
    let payloads = gateway_result
        .pointer("/result/payloads")
        .or_else(|| gateway_result.get("payloads"))?
        .as_array()?;
    let parts: Vec<&str> =
        payloads.iter().filter_map(|p| p.get("text").and_then(Value::as_str)).collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("\n"))
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
