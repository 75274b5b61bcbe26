// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-key parsing.
//!
//! Gateway session keys have the shape `agent:<agentId>:<channel>:<rest…>`.
//! Keys without the `agent:` prefix are opaque.

/// The delivery channel segment of a session key, when present.
///
/// `"agent:main:telegram:g1"` → `Some("telegram")`.
pub fn session_channel(session_key: &str) -> Option<&str> {
    let mut parts = session_key.split(':');
    if parts.next() != Some("agent") {
        return None;
    }
    parts.next()?;
    parts.next().filter(|s| !s.is_empty())
}

/// The agent id segment of a session key, defaulting to `"main"`.
///
/// `"agent:coder:telegram:g1"` → `"coder"`.
pub fn session_agent_id(session_key: Option<&str>) -> &str {
    let Some(key) = session_key else {
        return "main";
    };
    let mut parts = key.split(':');
    if parts.next() != Some("agent") {
        return "main";
    }
    match parts.next() {
        Some(id) if !id.is_empty() => id,
        _ => "main",
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
