// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending forks awaiting their gateway-created run.
//!
//! A fork registers its placeholder here before calling the gateway; the
//! ingest pipeline adopts the next new run against the FIFO-oldest entry.
//! Entries soft-expire after five minutes via the reaper task.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use forked_core::Clock;

/// Lifetime of a pending fork before the reaper drops it.
pub const PENDING_FORK_TTL: Duration = Duration::from_secs(5 * 60);

/// Reaper cadence.
pub const REAP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct PendingFork {
    pub placeholder_run_id: String,
    pub origin_run_id: String,
    pub fork_from_seq: i64,
    pub session_key: Option<String>,
    pub modified_payload: serde_json::Value,
    pub started_at_ms: i64,
}

/// FIFO registry of pending forks.
#[derive(Default)]
pub struct PendingForks {
    inner: Mutex<VecDeque<PendingFork>>,
}

impl PendingForks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, fork: PendingFork) {
        self.inner.lock().push_back(fork);
    }

    pub fn pop_oldest(&self) -> Option<PendingFork> {
        self.inner.lock().pop_front()
    }

    /// Return an entry taken by `pop_oldest` that turned out not to match.
    pub fn push_front(&self, fork: PendingFork) {
        self.inner.lock().push_front(fork);
    }

    pub fn remove(&self, placeholder_run_id: &str) -> Option<PendingFork> {
        let mut inner = self.inner.lock();
        let idx = inner.iter().position(|p| p.placeholder_run_id == placeholder_run_id)?;
        inner.remove(idx)
    }

    pub fn contains(&self, placeholder_run_id: &str) -> bool {
        self.inner.lock().iter().any(|p| p.placeholder_run_id == placeholder_run_id)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Drop entries started before `cutoff_ms`; returns how many.
    pub fn reap_started_before(&self, cutoff_ms: i64) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.len();
        inner.retain(|p| p.started_at_ms >= cutoff_ms);
        before - inner.len()
    }
}

/// Periodic reaper: linkage after expiry is not attempted.
pub async fn run_reaper<C: Clock>(
    pending: std::sync::Arc<PendingForks>,
    clock: C,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    interval.tick().await; // immediate first tick; nothing to reap yet
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let cutoff = clock.epoch_ms() - PENDING_FORK_TTL.as_millis() as i64;
                let reaped = pending.reap_started_before(cutoff);
                if reaped > 0 {
                    info!(reaped, "expired pending forks");
                } else {
                    debug!("no pending forks to reap");
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

#[cfg(test)]
#[path = "pending_tests.rs"]
mod tests;
