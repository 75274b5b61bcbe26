// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn data_type_reads_discriminator() {
    assert_eq!(data_type(&json!({"type": "tool_call_start"})), Some("tool_call_start"));
    assert_eq!(data_type(&json!({"kind": "x"})), None);
}

#[yare::parameterized(
    config_change = { "config_change", true },
    setup_file    = { "setup_file_change", true },
    tool_start    = { "tool_call_start", false },
    llm_input     = { "llm_input", false },
)]
fn background_types(ty: &str, expected: bool) {
    assert_eq!(is_background_type(&json!({ "type": ty })), expected);
}

#[test]
fn synthetic_defaults_to_false() {
    assert!(!is_synthetic(&json!({"type": "message_received"})));
    assert!(is_synthetic(&json!({"type": "message_received", "synthetic": true})));
}

#[test]
fn message_accessors_check_type() {
    let received = json!({"type": "message_received", "content": "hi", "from": "telegram:direct:7"});
    assert_eq!(message_content(&received), Some("hi"));
    assert_eq!(message_from(&received), Some("telegram:direct:7"));
    assert_eq!(message_to(&received), None);

    let sent = json!({"type": "message_sent", "to": "telegram:group:-100"});
    assert_eq!(message_to(&sent), Some("telegram:group:-100"));
    assert_eq!(message_content(&sent), None);
}

#[test]
fn llm_prompt_requires_llm_input() {
    assert_eq!(llm_prompt(&json!({"type": "llm_input", "prompt": "p"})), Some("p"));
    assert_eq!(llm_prompt(&json!({"type": "llm_output", "prompt": "p"})), None);
}

#[yare::parameterized(
    prompt_wins  = { json!({"prompt": "a", "message": "b", "content": "c"}), Some("a") },
    then_message = { json!({"message": "b", "content": "c"}), Some("b") },
    then_content = { json!({"content": "c"}), Some("c") },
    none         = { json!({"other": 1}), None },
    empty_skipped = { json!({"prompt": "", "message": "b"}), Some("b") },
)]
fn replay_text_preference(data: serde_json::Value, expected: Option<&str>) {
    assert_eq!(replay_text(&data), expected);
}
