// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use pd_core::Clock;

use super::{RegisterAgent, DEFAULT_MAX_LOCKS, DEFAULT_MAX_SERVICES};
use crate::engine::test_engine;
use crate::locks::AcquireOptions;
use crate::ports::ClaimOptions;

fn registration(id: &str, identity: Option<&str>) -> RegisterAgent {
    RegisterAgent {
        id: id.to_string(),
        identity: identity.map(String::from),
        ..RegisterAgent::default()
    }
}

#[test]
fn register_parses_identity_components() {
    let (engine, _dispatcher) = test_engine();
    let (agent, hint) = engine
        .agents
        .register(&registration("agent-1", Some("proj:api:main")))
        .unwrap();
    assert_eq!(agent.project.as_deref(), Some("proj"));
    assert_eq!(agent.stack.as_deref(), Some("api"));
    assert_eq!(agent.context.as_deref(), Some("main"));
    assert_eq!(agent.max_services, DEFAULT_MAX_SERVICES);
    assert_eq!(agent.max_locks, DEFAULT_MAX_LOCKS);
    assert!(agent.active);
    assert_eq!(hint.stale_count, 0);
    assert_eq!(hint.pending_count, 0);
}

#[test]
fn register_bad_id_fails() {
    let (engine, _dispatcher) = test_engine();
    let err = engine
        .agents
        .register(&registration("bad id!", None))
        .unwrap_err();
    assert_eq!(err.code(), "ValidationError");
}

#[test]
fn reregister_refreshes_heartbeat_and_keeps_fields() {
    let (engine, _dispatcher) = test_engine();
    engine
        .agents
        .register(&RegisterAgent {
            id: "agent-1".into(),
            name: Some("builder".into()),
            identity: Some("proj".into()),
            ..RegisterAgent::default()
        })
        .unwrap();

    engine.clock.advance(Duration::from_secs(30));
    let (agent, _) = engine.agents.register(&registration("agent-1", None)).unwrap();
    assert_eq!(agent.name.as_deref(), Some("builder"));
    assert_eq!(agent.project.as_deref(), Some("proj"));
    assert_eq!(agent.last_heartbeat, engine.clock.epoch_ms());
}

#[test]
fn heartbeat_updates_liveness() {
    let (engine, _dispatcher) = test_engine();
    engine.agents.register(&registration("agent-1", None)).unwrap();

    engine.clock.advance(Duration::from_secs(150));
    assert!(!engine.agents.get("agent-1").unwrap().active);

    let agent = engine.agents.heartbeat("agent-1", Some(777)).unwrap();
    assert!(agent.active);
    assert_eq!(agent.pid, Some(777));
}

#[test]
fn heartbeat_unknown_agent_is_not_found() {
    let (engine, _dispatcher) = test_engine();
    let err = engine.agents.heartbeat("ghost", None).unwrap_err();
    assert_eq!(err.code(), "NotFound");
}

#[test]
fn list_filters_project_and_liveness() {
    let (engine, _dispatcher) = test_engine();
    engine
        .agents
        .register(&registration("agent-1", Some("proj:api")))
        .unwrap();
    engine
        .agents
        .register(&registration("agent-2", Some("other")))
        .unwrap();

    engine.clock.advance(Duration::from_secs(150));
    engine.agents.heartbeat("agent-2", None).unwrap();

    let all = engine.agents.list(None, false).unwrap();
    assert_eq!(all.len(), 2);
    let proj = engine.agents.list(Some("proj"), false).unwrap();
    assert_eq!(proj.len(), 1);
    let active = engine.agents.list(None, true).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "agent-2");
}

#[test]
fn unregister_releases_locks() {
    let (engine, _dispatcher) = test_engine();
    engine.agents.register(&registration("agent-1", None)).unwrap();
    engine
        .locks
        .acquire(
            "deploy",
            &AcquireOptions {
                owner: Some("agent-1".into()),
                ..AcquireOptions::default()
            },
        )
        .unwrap();

    engine.agents.unregister("agent-1").unwrap();
    assert!(engine.locks.check("deploy").unwrap().is_none());
    assert_eq!(engine.agents.get("agent-1").unwrap_err().code(), "NotFound");
}

#[test]
fn service_cap_counts_stamped_metadata() {
    let (engine, _dispatcher) = test_engine();
    engine
        .agents
        .register(&RegisterAgent {
            id: "agent-1".into(),
            max_services: Some(2),
            ..RegisterAgent::default()
        })
        .unwrap();

    let opts = ClaimOptions {
        agent: Some("agent-1".into()),
        ..ClaimOptions::default()
    };
    engine.ports.claim("a", &opts).unwrap();
    let check = engine.agents.can_claim_service("agent-1").unwrap();
    assert!(check.allowed);
    assert_eq!(check.current, 1);

    engine.ports.claim("b", &opts).unwrap();
    let check = engine.agents.can_claim_service("agent-1").unwrap();
    assert!(!check.allowed);
    assert_eq!(check.current, 2);
    assert_eq!(check.max, 2);
}

#[test]
fn lock_cap_counts_owned_locks() {
    let (engine, _dispatcher) = test_engine();
    engine
        .agents
        .register(&RegisterAgent {
            id: "agent-1".into(),
            max_locks: Some(1),
            ..RegisterAgent::default()
        })
        .unwrap();

    let check = engine.agents.can_acquire_lock("agent-1").unwrap();
    assert!(check.allowed);

    engine
        .locks
        .acquire(
            "deploy",
            &AcquireOptions {
                owner: Some("agent-1".into()),
                ..AcquireOptions::default()
            },
        )
        .unwrap();
    let check = engine.agents.can_acquire_lock("agent-1").unwrap();
    assert!(!check.allowed);
    assert_eq!(check.current, 1);
}

#[test]
fn salvage_hint_counts_same_project_queue_rows() {
    let (engine, _dispatcher) = test_engine();
    engine
        .agents
        .register(&registration("old-agent", Some("proj:api")))
        .unwrap();

    // Lapse past the stale threshold and run the janitor pass
    engine.clock.advance(Duration::from_secs(11 * 60));
    engine.janitor.tick();

    let (_, hint) = engine
        .agents
        .register(&registration("new-agent", Some("proj:web")))
        .unwrap();
    assert_eq!(hint.stale_count, 1);
    assert_eq!(hint.pending_count, 0);

    let (_, other) = engine
        .agents
        .register(&registration("elsewhere", Some("unrelated")))
        .unwrap();
    assert_eq!(other.stale_count, 0);
}
