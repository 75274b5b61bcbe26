// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;

use crate::lifecycle::LifecycleError;

/// Daemon version (from Cargo.toml)
pub const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracer push-channel port.
pub const DEFAULT_INGEST_PORT: u16 = 7999;

/// Default HTTP API port.
pub const DEFAULT_API_PORT: u16 = 8000;

/// Resolve state directory: FORKED_STATE_DIR > XDG_STATE_HOME/forked >
/// ~/.local/state/forked
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("FORKED_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("forked"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/forked"))
}

/// Tracer push-channel port override.
pub fn ingest_port() -> u16 {
    std::env::var("FORKED_INGEST_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(DEFAULT_INGEST_PORT)
}

/// HTTP API port override.
pub fn api_port() -> u16 {
    std::env::var("FORKED_API_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(DEFAULT_API_PORT)
}

/// Retention override: a positive day count or `"never"`.
///
/// Invalid values are ignored so a typo cannot silently disable retention.
pub fn retention_override() -> Option<crate::config::Retention> {
    let raw = std::env::var("FORKED_RETENTION_DAYS").ok()?;
    crate::config::Retention::parse(&raw)
}

/// Promotion heuristic threshold: a run with at most this many recorded
/// events may be adopted under a session's explicit fork head. Source
/// behavior is 2; kept tunable because very short legitimate runs can be
/// mis-classified.
pub fn promote_max_events() -> i64 {
    std::env::var("FORKED_PROMOTE_MAX_EVENTS")
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(2)
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
