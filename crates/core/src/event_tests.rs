// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::Event;

#[test]
fn names_are_dotted() {
    let event = Event::ServiceClaim {
        identity: "myapp:api".into(),
        port: 3100,
        existing: false,
        agent: None,
    };
    assert_eq!(event.name(), "service.claim");
    assert_eq!(event.target_id(), Some("myapp:api"));
}

#[test]
fn data_serializes_variant_fields_flat() {
    let event = Event::LockAcquire {
        name: "deploy".into(),
        owner: "agent-1".into(),
    };
    let data = event.data();
    assert_eq!(data["name"], "deploy");
    assert_eq!(data["owner"], "agent-1");
}

#[test]
fn optional_fields_are_omitted() {
    let event = Event::MessagePublish {
        channel: "builds".into(),
        id: 7,
        sender: None,
    };
    let data = event.data();
    assert!(data.get("sender").is_none());
    assert_eq!(data["id"], 7);
}

#[test]
fn daemon_events_have_no_target() {
    assert_eq!(Event::DaemonStart { pid: 1 }.target_id(), None);
}

#[test]
fn agent_attribution() {
    let event = Event::ResurrectionClaim {
        agent_id: "agent-1".into(),
        new_agent_id: "agent-2".into(),
    };
    assert_eq!(event.agent_id(), Some("agent-2"));
    assert_eq!(event.target_id(), Some("agent-1"));
}
