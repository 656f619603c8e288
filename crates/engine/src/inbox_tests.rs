// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::engine::test_engine;

#[test]
fn send_and_list() {
    let (engine, _dispatcher) = test_engine();
    engine
        .inbox
        .send("agent-1", Some("agent-2"), "ping", None)
        .unwrap();
    engine
        .inbox
        .send("agent-1", None, "handoff ready", Some("handoff"))
        .unwrap();
    engine.inbox.send("agent-3", None, "unrelated", None).unwrap();

    let messages = engine.inbox.list("agent-1", false, None).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "ping");
    assert_eq!(messages[0].sender.as_deref(), Some("agent-2"));
    assert_eq!(messages[0].msg_type, "info");
    assert_eq!(messages[1].msg_type, "handoff");
    assert!(!messages[0].read);
}

#[test]
fn mark_read_flips_unread_only() {
    let (engine, _dispatcher) = test_engine();
    engine.inbox.send("agent-1", None, "a", None).unwrap();
    engine.inbox.send("agent-1", None, "b", None).unwrap();

    assert_eq!(engine.inbox.unread_count("agent-1").unwrap(), 2);
    assert_eq!(engine.inbox.mark_read("agent-1").unwrap(), 2);
    assert_eq!(engine.inbox.mark_read("agent-1").unwrap(), 0);
    assert_eq!(engine.inbox.unread_count("agent-1").unwrap(), 0);

    let unread = engine.inbox.list("agent-1", true, None).unwrap();
    assert!(unread.is_empty());
    let all = engine.inbox.list("agent-1", false, None).unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|m| m.read));
}

#[test]
fn recipient_is_validated() {
    let (engine, _dispatcher) = test_engine();
    let err = engine.inbox.send("bad agent", None, "x", None).unwrap_err();
    assert_eq!(err.code(), "ValidationError");
}

#[test]
fn empty_content_is_rejected() {
    let (engine, _dispatcher) = test_engine();
    let err = engine.inbox.send("agent-1", None, "", None).unwrap_err();
    assert_eq!(err.code(), "ValidationError");
}
