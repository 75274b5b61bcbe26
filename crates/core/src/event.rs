// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trace frames as emitted by the tracer plugin.

use serde::{Deserialize, Serialize};

/// Stream tag of a trace event.
///
/// Serializes to the wire spelling (`"fork_info"` etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    Lifecycle,
    Assistant,
    Tool,
    Error,
    ForkInfo,
    Rewind,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Lifecycle => "lifecycle",
            Stream::Assistant => "assistant",
            Stream::Tool => "tool",
            Stream::Error => "error",
            Stream::ForkInfo => "fork_info",
            Stream::Rewind => "rewind",
        }
    }

    /// Parse the stored spelling back into a tag.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lifecycle" => Some(Stream::Lifecycle),
            "assistant" => Some(Stream::Assistant),
            "tool" => Some(Stream::Tool),
            "error" => Some(Stream::Error),
            "fork_info" => Some(Stream::ForkInfo),
            "rewind" => Some(Stream::Rewind),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound frame on the tracer push channel.
///
/// `run_id` is optional on the wire: background filesystem events may arrive
/// before the tracer knows which run they belong to (the ingest pipeline
/// synthesizes a `bg_*` run id for those).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceFrame {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub session_key: Option<String>,
    pub seq: i64,
    pub stream: Stream,
    /// Wall-clock ms epoch assigned by the tracer.
    pub ts: i64,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl TraceFrame {
    /// The payload's `type` discriminator, if any.
    pub fn data_type(&self) -> Option<&str> {
        crate::payload::data_type(&self.data)
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
