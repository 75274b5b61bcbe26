// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Forked daemon (forkedd)
//!
//! Background process for the Forked time-travel debugger. Ingests tracer
//! events on the loopback push channel, serves the UI API, and drives
//! forked re-runs through the gateway.
//!
//! Architecture:
//! - Ingest listener task: accepts tracer connections, parses frames
//! - Pipeline task: serializes all event processing and store writes
//! - API server task: HTTP endpoints for the UI
//! - Sweeper / reaper timer tasks

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use forked_core::SystemClock;
use forked_daemon::api::{self, ApiState};
use forked_daemon::fork::run_reaper;
use forked_daemon::ingest::{IngestListener, Pipeline};
use forked_daemon::lifecycle::{self, Config, LifecycleError};
use forked_daemon::{env as daemon_env, sweeper};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("forkedd {}", daemon_env::DAEMON_VERSION);
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("forkedd {}", daemon_env::DAEMON_VERSION);
                println!("Forked daemon - time-travel debugger backend for gateway agents");
                println!();
                println!("USAGE:");
                println!("    forkedd");
                println!();
                println!("Listens on loopback port {} for tracer events and", daemon_env::ingest_port());
                println!("serves the UI API on loopback port {}.", daemon_env::api_port());
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: forkedd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load()?;

    rotate_log_if_needed(&config.log_path);
    write_startup_marker(&config)?;
    let log_guard = setup_logging(&config)?;

    info!("starting forkedd");

    let startup = match lifecycle::startup(&config).await {
        Ok(result) => result,
        Err(LifecycleError::LockFailed(_)) => {
            let pid = std::fs::read_to_string(&config.lock_path).unwrap_or_default();
            eprintln!("forkedd is already running");
            if !pid.trim().is_empty() {
                eprintln!("  pid: {}", pid.trim());
            }
            std::process::exit(1);
        }
        Err(e) => {
            write_startup_error(&config, &e);
            error!("failed to start daemon: {}", e);
            drop(log_guard);
            return Err(e.into());
        }
    };

    let app = startup.app;
    let shutdown = CancellationToken::new();

    // Ingest: listener feeding the serializing pipeline.
    let listener = IngestListener::new(
        startup.ingest_listener,
        startup.frames_tx.clone(),
        shutdown.clone(),
    );
    tokio::spawn(listener.run());
    let pipeline = Pipeline::new(
        Arc::clone(&app.store),
        Arc::clone(&app.lineage),
        Arc::clone(&app.pending),
        SystemClock,
    );
    let pipeline_task = tokio::spawn(pipeline.run(startup.frames_rx, shutdown.clone()));

    // HTTP API.
    let api_state = ApiState {
        store: Arc::clone(&app.store),
        lineage: Arc::clone(&app.lineage),
        host_config: Arc::clone(&app.host_config),
        retention: app.host_config.retention,
        rewind: Arc::clone(&app.rewind),
        fork: Arc::clone(&app.fork),
        started: app.start_time,
    };
    let api_shutdown = shutdown.clone();
    let api_listener = startup.api_listener;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_listener, api_state, api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    // Periodic timers.
    tokio::spawn(sweeper::run(
        Arc::clone(&app.store),
        app.host_config.retention,
        SystemClock,
        shutdown.clone(),
    ));
    tokio::spawn(run_reaper(
        Arc::clone(&app.pending),
        SystemClock,
        shutdown.clone(),
    ));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(
        ingest_port = config.ingest_port,
        api_port = config.api_port,
        "daemon ready"
    );
    println!("READY");

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down..."),
        _ = sigint.recv() => info!("received SIGINT, shutting down..."),
    }

    // Stop accepting, drain the pipeline, close the store via drop.
    shutdown.cancel();
    drop(startup.frames_tx);
    let _ = pipeline_task.await;
    drop(startup.lock_file);

    info!("daemon stopped");
    Ok(())
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log if it exceeds [`MAX_LOG_SIZE`]. Best-effort.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let _ = std::fs::rename(format!("{log_str}.{i}"), format!("{log_str}.{}", i + 1));
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

/// Startup marker written before tracing is up, so a supervising process can
/// find where this attempt begins in the log.
fn write_startup_marker(config: &Config) -> Result<(), LifecycleError> {
    use std::io::Write;

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)?;
    writeln!(file, "--- forkedd: starting (pid: {}) ---\n", std::process::id())?;
    Ok(())
}

/// Write a startup error synchronously so it is visible even if the process
/// exits before the non-blocking tracing writer flushes.
fn write_startup_error(config: &Config, error: &LifecycleError) {
    use std::io::Write;

    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)
    else {
        return;
    };
    let _ = writeln!(file, "ERROR failed to start daemon: {}", error);
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let parent = config.log_path.parent().ok_or(LifecycleError::NoStateDir)?;
    std::fs::create_dir_all(parent)?;
    let file_name = config.log_path.file_name().ok_or(LifecycleError::NoStateDir)?;

    let file_appender = tracing_appender::rolling::never(parent, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
