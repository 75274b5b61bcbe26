// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schema-on-read accessors over event payloads.
//!
//! The `data` field of a trace event carries many shapes discriminated by
//! `type`. The original JSON is retained end to end (store, API); these
//! helpers read the handful of cases the daemon inspects.

use serde_json::Value;

/// Payload type strings the daemon dispatches on.
pub const TOOL_CALL_START: &str = "tool_call_start";
pub const TOOL_CALL_END: &str = "tool_call_end";
pub const CONFIG_CHANGE: &str = "config_change";
pub const SETUP_FILE_CHANGE: &str = "setup_file_change";
pub const MESSAGE_RECEIVED: &str = "message_received";
pub const MESSAGE_SENT: &str = "message_sent";
pub const LLM_INPUT: &str = "llm_input";
pub const FORK_INFO: &str = "fork_info";
pub const REWIND_EXECUTED: &str = "rewind_executed";

/// The `type` discriminator of a payload.
pub fn data_type(data: &Value) -> Option<&str> {
    data.get("type").and_then(Value::as_str)
}

/// Whether this payload is one of the background filesystem observations
/// that may arrive without a usable run id.
pub fn is_background_type(data: &Value) -> bool {
    matches!(data_type(data), Some(CONFIG_CHANGE) | Some(SETUP_FILE_CHANGE))
}

/// Synthetic events (placeholder replays) are skipped during delivery-hint
/// derivation so a fork never addresses its own echo.
pub fn is_synthetic(data: &Value) -> bool {
    data.get("synthetic").and_then(Value::as_bool).unwrap_or(false)
}

fn str_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// `content` of a `message_received` payload.
pub fn message_content(data: &Value) -> Option<&str> {
    (data_type(data) == Some(MESSAGE_RECEIVED)).then(|| str_field(data, "content")).flatten()
}

/// `from` address of a `message_received` payload.
pub fn message_from(data: &Value) -> Option<&str> {
    (data_type(data) == Some(MESSAGE_RECEIVED)).then(|| str_field(data, "from")).flatten()
}

/// `to` address of a `message_sent` payload.
pub fn message_to(data: &Value) -> Option<&str> {
    (data_type(data) == Some(MESSAGE_SENT)).then(|| str_field(data, "to")).flatten()
}

/// `prompt` of an `llm_input` payload.
pub fn llm_prompt(data: &Value) -> Option<&str> {
    (data_type(data) == Some(LLM_INPUT)).then(|| str_field(data, "prompt")).flatten()
}

/// First non-empty of `prompt`, `message`, `content`: the replay-message
/// preference order for edited fork payloads.
pub fn replay_text(data: &Value) -> Option<&str> {
    str_field(data, "prompt")
        .or_else(|| str_field(data, "message"))
        .or_else(|| str_field(data, "content"))
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
