// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-frame ingest pipeline.
//!
//! For every frame, in order: background run synthesis, lineage resolution
//! (with the promotion heuristic), persist, pending-fork linkage, snapshot
//! extraction. Store failures on a single frame are logged and dropped; the
//! pipeline never terminates on per-event errors.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use forked_core::{payload, short, Clock, SnapshotCapture, Stream, TraceFrame};
use forked_storage::{NewEvent, Store, StoreError};

use crate::fork::{try_link, PendingForks};
use crate::lineage::LineageTable;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct Pipeline<C: Clock> {
    store: Arc<Mutex<Store>>,
    lineage: Arc<LineageTable>,
    pending: Arc<PendingForks>,
    clock: C,
}

impl<C: Clock> Pipeline<C> {
    pub fn new(
        store: Arc<Mutex<Store>>,
        lineage: Arc<LineageTable>,
        pending: Arc<PendingForks>,
        clock: C,
    ) -> Self {
        Self { store, lineage, pending, clock }
    }

    /// Drain the frame channel until it closes or shutdown is requested.
    pub async fn run(self, mut frames: mpsc::Receiver<TraceFrame>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                frame = frames.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = self.process(frame) {
                                warn!(error = %e, "dropping frame after store failure");
                            }
                        }
                        None => break,
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
        info!("ingest pipeline stopped");
    }

    /// Process one frame. Returns the stored row id, or `None` when the
    /// frame was silently dropped (unattributable background event).
    pub fn process(&self, frame: TraceFrame) -> Result<Option<i64>, IngestError> {
        let Some((run_id, session_key)) = self.resolve_run(&frame) else {
            return Ok(None);
        };

        let is_fork_info = frame.stream == Stream::ForkInfo;
        let observation = self.lineage.observe(&run_id, session_key.as_deref(), is_fork_info);
        if let Some(head) = &observation.promoted_under {
            debug!(run_id, head, "promoted run under session fork head");
            self.store.lock().stamp_run_lineage(&run_id, head)?;
        }

        let entry = self.lineage.entry(&run_id).unwrap_or_default();
        let row_id = self.store.lock().insert_event(&NewEvent {
            run_id: run_id.clone(),
            session_key: session_key.clone(),
            seq: frame.seq,
            stream: frame.stream,
            ts: frame.ts,
            data: frame.data.clone(),
            is_fork: entry.is_fork,
            forked_from_run_id: entry.forked_from_run_id.clone(),
            created_at: self.clock.epoch_ms(),
        })?;

        if observation.newly_seen && !self.pending.is_empty() {
            try_link(&self.store, &self.lineage, &self.pending, &run_id);
        }

        self.extract_snapshot(&run_id, frame.seq, &frame.data);

        Ok(Some(row_id))
    }

    /// Attribute the frame to a run.
    ///
    /// Background filesystem events (`config_change`/`setup_file_change`)
    /// may arrive without a usable run id; they are attached to the live
    /// session under a synthesized `bg_*` run. With no known session key
    /// they are dropped silently. Non-background frames without a run id
    /// are malformed and dropped with a warning.
    fn resolve_run(&self, frame: &TraceFrame) -> Option<(String, Option<String>)> {
        let run_id = frame.run_id.as_deref().filter(|id| !id.is_empty() && *id != "unknown");
        if let Some(run_id) = run_id {
            return Some((run_id.to_string(), frame.session_key.clone()));
        }

        if !payload::is_background_type(&frame.data) {
            warn!(data_type = frame.data_type(), "dropping frame without run id");
            return None;
        }

        let session_key = frame
            .session_key
            .clone()
            .or_else(|| self.lineage.background_session_key())?;
        let run_id = format!("bg_{}_{}_{}", short(&session_key, 8), frame.ts, frame.seq);
        Some((run_id, Some(session_key)))
    }

    /// Snapshot extraction driven by the payload type.
    fn extract_snapshot(&self, run_id: &str, seq: i64, data: &serde_json::Value) {
        let Some(capture) = SnapshotCapture::from_payload(data) else {
            return;
        };
        let now = self.clock.epoch_ms();
        let result = match payload::data_type(data) {
            Some(payload::TOOL_CALL_START) => self
                .store
                .lock()
                .insert_snapshot_start(run_id, seq, &capture, now)
                .map(|_| ()),
            Some(payload::TOOL_CALL_END) => {
                match self.store.lock().update_snapshot_end(run_id, &capture) {
                    Ok(true) => Ok(()),
                    Ok(false) => {
                        debug!(run_id, file = capture.file_path, "tool end without open snapshot");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Some(payload::CONFIG_CHANGE) | Some(payload::SETUP_FILE_CHANGE) => self
                .store
                .lock()
                .insert_snapshot_whole_file(run_id, seq, &capture, now)
                .map(|_| ()),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!(run_id, error = %e, "snapshot extraction failed");
        }
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
