// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup and initialization logic.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

use forked_core::{Clock, SystemClock};
use forked_storage::Store;

use crate::config::HostConfig;
use crate::fork::{ForkEngine, PendingForks};
use crate::gateway::{GatewayEndpoint, WsGateway};
use crate::identity::Identity;
use crate::ingest::FRAME_QUEUE_DEPTH;
use crate::lineage::LineageTable;
use crate::rewind::RewindEngine;

use super::{App, Config, LifecycleError, StartupResult};

/// Start the daemon: lock, store, identity, lineage reconstruction, sockets.
///
/// Fatal failures here (lock, store open, port bind) abort the process;
/// everything after startup is best-effort.
pub async fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    // Acquire the lock first. Open without truncating so a losing race does
    // not wipe the running daemon's PID.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    std::fs::write(&config.version_path, crate::env::DAEMON_VERSION)?;

    let host_config = Arc::new(HostConfig::load(&config.state_dir));
    let clock = SystemClock;

    let store = Store::open(&config.db_path)?;
    let lineage_rows = store.lineage_entries()?;
    info!(runs = lineage_rows.len(), "reconstructed lineage from store");
    let lineage = Arc::new(LineageTable::from_store(
        lineage_rows,
        crate::env::promote_max_events(),
    ));
    let store = Arc::new(Mutex::new(store));

    let identity = Arc::new(Identity::load_or_generate(&config.identity_path, clock.epoch_ms())?);
    info!(device_id = identity.device_id(), "device identity ready");

    let pending = Arc::new(PendingForks::new());
    let rewind = Arc::new(RewindEngine::new(Arc::clone(&store), clock.clone()));
    let gateway = Arc::new(WsGateway::new(
        GatewayEndpoint {
            url: host_config.gateway_url.clone(),
            token: host_config.gateway_token.clone(),
        },
        Arc::clone(&identity),
        clock.clone(),
    ));
    let fork = Arc::new(ForkEngine::new(
        Arc::clone(&store),
        Arc::clone(&lineage),
        Arc::clone(&pending),
        Arc::clone(&rewind),
        gateway,
        host_config.channels.clone(),
        clock,
    ));

    let ingest_listener = bind(config.ingest_port).await?;
    let api_listener = bind(config.api_port).await?;

    let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);

    Ok(StartupResult {
        app: App {
            store,
            lineage,
            pending,
            host_config,
            identity,
            rewind,
            fork,
            start_time: Instant::now(),
        },
        ingest_listener,
        api_listener,
        frames_tx,
        frames_rx,
        lock_file,
    })
}

async fn bind(port: u16) -> Result<TcpListener, LifecycleError> {
    TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|source| LifecycleError::Bind { port, source })
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
