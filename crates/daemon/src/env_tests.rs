// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::Retention;
use serial_test::serial;

#[test]
#[serial]
fn retention_override_parses_days_and_never() {
    std::env::set_var("FORKED_RETENTION_DAYS", "30");
    assert_eq!(retention_override(), Some(Retention::Days(30)));

    std::env::set_var("FORKED_RETENTION_DAYS", "never");
    assert_eq!(retention_override(), Some(Retention::Never));

    // Invalid values are ignored rather than disabling retention.
    std::env::set_var("FORKED_RETENTION_DAYS", "tomorrow");
    assert_eq!(retention_override(), None);

    std::env::remove_var("FORKED_RETENTION_DAYS");
    assert_eq!(retention_override(), None);
}

#[test]
#[serial]
fn promote_threshold_is_tunable() {
    std::env::remove_var("FORKED_PROMOTE_MAX_EVENTS");
    assert_eq!(promote_max_events(), 2);

    std::env::set_var("FORKED_PROMOTE_MAX_EVENTS", "5");
    assert_eq!(promote_max_events(), 5);
    std::env::remove_var("FORKED_PROMOTE_MAX_EVENTS");
}

#[test]
#[serial]
fn ports_default_when_unset() {
    std::env::remove_var("FORKED_INGEST_PORT");
    std::env::remove_var("FORKED_API_PORT");
    assert_eq!(ingest_port(), DEFAULT_INGEST_PORT);
    assert_eq!(api_port(), DEFAULT_API_PORT);
}
