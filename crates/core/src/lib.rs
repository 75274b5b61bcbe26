// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! forked-core: Domain types for the Forked time-travel debugger.
//!
//! Trace frames, stream tags, payload accessors, file snapshot captures,
//! and session-key parsing. No I/O lives here.

pub mod clock;
pub mod event;
pub mod payload;
pub mod session;
pub mod snapshot;

pub use clock::{Clock, FakeClock, SystemClock};
pub use event::{Stream, TraceFrame};
pub use session::{session_agent_id, session_channel};
pub use snapshot::{SnapshotCapture, MAX_SNAPSHOT_BYTES, TRUNCATED_MARKER};

/// Shorten an opaque id for log output and derived run ids.
pub fn short(id: &str, n: usize) -> &str {
    match id.char_indices().nth(n) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}
