// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retention sweeper.
//!
//! Runs once at startup and then hourly, deleting events and snapshots
//! older than the retention window. Best-effort: failures are logged and
//! never retried before the next tick.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use forked_core::Clock;
use forked_storage::Store;

use crate::config::Retention;

/// Sweep cadence.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub async fn run<C: Clock>(
    store: Arc<Mutex<Store>>,
    retention: Retention,
    clock: C,
    shutdown: CancellationToken,
) {
    let Retention::Days(days) = retention else {
        info!("retention disabled, sweeper idle");
        return;
    };

    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => sweep_once(&store, days, clock.epoch_ms()),
            _ = shutdown.cancelled() => break,
        }
    }
}

pub fn sweep_once(store: &Mutex<Store>, days: u32, now_ms: i64) {
    match store.lock().delete_older_than(days, now_ms) {
        Ok((0, 0)) => {}
        Ok((events, snapshots)) => {
            info!(events, snapshots, days, "retention sweep deleted rows");
        }
        Err(e) => warn!(error = %e, "retention sweep failed"),
    }
}

#[cfg(test)]
#[path = "sweeper_tests.rs"]
mod tests;
