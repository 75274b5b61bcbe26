// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Delivery hint derivation.
//!
//! A forked reply is addressed to the same user channel that drove the
//! original conversation. Addresses look like
//! `"<channel>:<kind>:<value>[:topic:<topicId>]"`; candidates come from the
//! edited payload, then the history slice, then the tail of the whole
//! session, and are accepted only on a configured channel (an empty
//! configured set accepts anything syntactically valid).

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use forked_core::{payload, session_channel};
use forked_storage::EventRow;

/// How many trailing lifecycle events of the whole session are searched as
/// the last-resort candidate source.
pub const SESSION_TAIL_LIMIT: i64 = 200;

/// Routing triple for a forked reply.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryHint {
    pub channel: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// Parse one address string into a hint.
pub fn parse_address(address: &str) -> Option<DeliveryHint> {
    let parts: Vec<&str> = address.split(':').collect();
    if parts.len() < 3 || parts[0].is_empty() || parts[2].is_empty() {
        return None;
    }
    let channel = parts[0].to_lowercase();

    match parts[1] {
        "group" | "direct" => {
            let thread_id = (parts.len() >= 5 && parts[3] == "topic")
                .then(|| parts[4].to_string())
                .filter(|id| !id.is_empty());
            Some(DeliveryHint { channel, to: parts[2].to_string(), thread_id })
        }
        // Unknown kinds keep the raw tail as the address.
        _ => Some(DeliveryHint { channel, to: parts[2..].join(":"), thread_id: None }),
    }
}

/// Inputs to hint derivation.
pub struct HintContext<'a> {
    pub modified_payload: &'a Value,
    /// Events of the origin run before the fork point.
    pub history: &'a [EventRow],
    pub session_key: Option<&'a str>,
    /// Recent lifecycle events across the whole session.
    pub session_tail: &'a [EventRow],
    pub configured_channels: &'a HashSet<String>,
}

/// Derive the delivery hint, in candidate order:
/// (i) the edited payload's own address, (ii) newest matching inbound in the
/// history slice, (iii) newest matching outbound, (iv) the same search over
/// the session tail. Synthetic messages never contribute.
pub fn derive_hint(ctx: &HintContext<'_>) -> Option<DeliveryHint> {
    let expected = ctx.session_key.and_then(session_channel);

    let mut candidates = Vec::new();
    let payload_address = payload::message_from(ctx.modified_payload)
        .or_else(|| payload::message_to(ctx.modified_payload));
    if let Some(hint) = payload_address.and_then(parse_address) {
        candidates.push(hint);
    }
    for events in [ctx.history, ctx.session_tail] {
        if let Some(hint) = newest_address(events, payload::message_from, expected) {
            candidates.push(hint);
        }
        if let Some(hint) = newest_address(events, payload::message_to, expected) {
            candidates.push(hint);
        }
    }

    candidates.into_iter().find(|hint| {
        ctx.configured_channels.is_empty() || ctx.configured_channels.contains(&hint.channel)
    })
}

/// Newest non-synthetic event whose address parses on the expected channel.
fn newest_address(
    events: &[EventRow],
    extract: fn(&Value) -> Option<&str>,
    expected_channel: Option<&str>,
) -> Option<DeliveryHint> {
    events.iter().rev().find_map(|event| {
        if payload::is_synthetic(&event.data) {
            return None;
        }
        let hint = extract(&event.data).and_then(parse_address)?;
        match expected_channel {
            Some(channel) if hint.channel != channel => None,
            _ => Some(hint),
        }
    })
}

#[cfg(test)]
#[path = "hint_tests.rs"]
mod tests;
