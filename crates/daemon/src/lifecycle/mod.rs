// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, recovery.

mod startup;

pub use startup::startup;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use forked_core::{SystemClock, TraceFrame};
use forked_storage::{Store, StoreError};

use crate::config::HostConfig;
use crate::fork::{ForkEngine, PendingForks};
use crate::gateway::WsGateway;
use crate::identity::{Identity, IdentityError};
use crate::lineage::LineageTable;
use crate::rewind::RewindEngine;

/// Gateway and engines with concrete daemon types.
pub type DaemonGateway = WsGateway<SystemClock>;
pub type DaemonForkEngine = ForkEngine<DaemonGateway, SystemClock>;
pub type DaemonRewindEngine = RewindEngine<SystemClock>;

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/forked)
    pub state_dir: PathBuf,
    /// Embedded store file
    pub db_path: PathBuf,
    /// Identity keypair file
    pub identity_path: PathBuf,
    /// Lock/PID file
    pub lock_path: PathBuf,
    /// Version file
    pub version_path: PathBuf,
    /// Daemon log file
    pub log_path: PathBuf,
    /// Tracer push-channel port
    pub ingest_port: u16,
    /// HTTP API port
    pub api_port: u16,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Fixed paths under the state dir; one daemon per user.
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = crate::env::state_dir()?;
        Ok(Self {
            db_path: state_dir.join("forked.db"),
            identity_path: state_dir.join("identity.json"),
            lock_path: state_dir.join("forkedd.pid"),
            version_path: state_dir.join("forkedd.version"),
            log_path: state_dir.join("forkedd.log"),
            ingest_port: crate::env::ingest_port(),
            api_port: crate::env::api_port(),
            state_dir,
        })
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine state directory (HOME unset)")]
    NoStateDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("another forkedd instance holds the lock: {0}")]
    LockFailed(std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("failed to bind 127.0.0.1:{port}: {source}")]
    Bind { port: u16, source: std::io::Error },
}

/// Shared daemon handles assembled at startup.
pub struct App {
    pub store: Arc<Mutex<Store>>,
    pub lineage: Arc<LineageTable>,
    pub pending: Arc<PendingForks>,
    pub host_config: Arc<HostConfig>,
    pub identity: Arc<Identity>,
    pub rewind: Arc<DaemonRewindEngine>,
    pub fork: Arc<DaemonForkEngine>,
    pub start_time: Instant,
}

/// Everything `main` needs after a successful startup.
pub struct StartupResult {
    pub app: App,
    pub ingest_listener: TcpListener,
    pub api_listener: TcpListener,
    pub frames_tx: mpsc::Sender<TraceFrame>,
    pub frames_rx: mpsc::Receiver<TraceFrame>,
    /// Held for the process lifetime; dropping releases the daemon lock.
    pub lock_file: std::fs::File,
}
