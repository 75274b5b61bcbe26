// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host (OpenClaw) configuration loader.
//!
//! Reads `~/.openclaw/openclaw.json` for the gateway endpoint, shared token,
//! configured delivery channels, and retention policy. The raw document is
//! retained so the API can serve a sanitized view. A missing or broken file
//! never stops the daemon; it starts with defaults and a logged warning.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::warn;

/// Default retention window in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 14;

/// Default gateway port when the host config does not name one.
pub const DEFAULT_GATEWAY_PORT: u16 = 18789;

/// Replacement string for sensitive config values.
pub const REDACTED: &str = "[REDACTED]";

/// Retention policy for stored events and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    Days(u32),
    Never,
}

impl Retention {
    /// Parse `"never"` or a positive day count. Anything else is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("never") {
            return Some(Retention::Never);
        }
        raw.parse::<u32>().ok().filter(|n| *n > 0).map(Retention::Days)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).filter(|n| *n > 0).map(Retention::Days),
            _ => None,
        }
    }

    /// JSON form served by `GET /api/config`.
    pub fn to_value(self) -> Value {
        match self {
            Retention::Days(n) => Value::from(n),
            Retention::Never => Value::from("never"),
        }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Retention::Days(DEFAULT_RETENTION_DAYS)
    }
}

/// Extracted host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Gateway push-channel endpoint, e.g. `ws://127.0.0.1:18789`.
    pub gateway_url: String,
    /// Optional shared secret for the gateway handshake.
    pub gateway_token: Option<String>,
    /// Configured delivery channels, lowercased. Empty set means "accept
    /// any syntactically valid delivery hint".
    pub channels: HashSet<String>,
    pub retention: Retention,
    /// Raw document, kept for the sanitized config API. `None` when the
    /// file was missing or unreadable.
    raw: Option<Value>,
    /// Human-readable read/parse failure, if any.
    pub error: Option<String>,
}

impl HostConfig {
    /// Load from the default location with retention precedence
    /// env > local override file > host config > default.
    pub fn load(state_dir: &Path) -> Self {
        let mut config = Self::from_file(host_config_path().as_deref());
        if let Some(local) = local_retention(state_dir) {
            config.retention = local;
        }
        if let Some(env) = crate::env::retention_override() {
            config.retention = env;
        }
        config
    }

    /// Parse a host config file, falling back to defaults on any failure.
    pub fn from_file(path: Option<&Path>) -> Self {
        let raw = path.map(std::fs::read_to_string);
        match raw {
            Some(Ok(body)) => match serde_json::from_str::<Value>(&body) {
                Ok(value) => Self::from_value(value),
                Err(e) => {
                    warn!(error = %e, "host config is not valid JSON, using defaults");
                    Self::broken(format!("invalid JSON: {e}"))
                }
            },
            Some(Err(e)) => {
                warn!(error = %e, "host config unreadable, using defaults");
                Self::broken(format!("read failed: {e}"))
            }
            None => {
                warn!("no home directory, host config skipped");
                Self::broken("no home directory".to_string())
            }
        }
    }

    fn from_value(raw: Value) -> Self {
        let port = raw
            .pointer("/gateway/port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_GATEWAY_PORT);
        let gateway_token = raw
            .pointer("/gateway/auth/token")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let channels = raw
            .get("channels")
            .and_then(Value::as_object)
            .map(|m| m.keys().map(|k| k.to_lowercase()).collect())
            .unwrap_or_default();
        let retention = raw
            .get("retentionDays")
            .and_then(Retention::from_value)
            .unwrap_or_default();

        Self {
            gateway_url: format!("ws://127.0.0.1:{port}"),
            gateway_token,
            channels,
            retention,
            raw: Some(raw),
            error: None,
        }
    }

    fn broken(error: String) -> Self {
        Self {
            gateway_url: format!("ws://127.0.0.1:{DEFAULT_GATEWAY_PORT}"),
            gateway_token: None,
            channels: HashSet::new(),
            retention: Retention::default(),
            raw: None,
            error: Some(error),
        }
    }

    /// Sanitized copy of the raw document for the UI, or `None` when the
    /// file could not be read.
    pub fn sanitized(&self) -> Option<Value> {
        self.raw.as_ref().map(|raw| sanitize(raw, false))
    }
}

/// `~/.openclaw/openclaw.json`
pub fn host_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".openclaw").join("openclaw.json"))
}

/// Local retention override file: `<state>/config.json`
/// with `{"retentionDays": <n> | "never"}`.
fn local_retention(state_dir: &Path) -> Option<Retention> {
    let body = std::fs::read_to_string(state_dir.join("config.json")).ok()?;
    let value: Value = serde_json::from_str(&body).ok()?;
    value.get("retentionDays").and_then(Retention::from_value)
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    ["token", "secret", "key", "password"].iter().any(|needle| key.contains(needle))
}

/// Recursively replace sensitive values.
///
/// Redacted: any value whose key matches token/secret/key/password
/// (case-insensitive substring), and every value under an `env` object.
fn sanitize(value: &Value, under_env: bool) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                if under_env || is_sensitive_key(key) {
                    out.insert(key.clone(), Value::from(REDACTED));
                } else {
                    out.insert(key.clone(), sanitize(inner, key == "env"));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| sanitize(item, under_env)).collect())
        }
        scalar => {
            if under_env {
                Value::from(REDACTED)
            } else {
                scalar.clone()
            }
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
