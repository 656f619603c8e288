// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine assembly: construct every subsystem once and inject shared
//! handles. The daemon owns one `Engine`; request handlers and background
//! workers borrow from it.

use std::sync::Arc;

use pd_core::{Clock, SystemClock};
use pd_storage::Store;

use crate::activity::Activity;
use crate::agents::{Agents, DEFAULT_AGENT_TTL_MS};
use crate::broker::Broker;
use crate::events::EventSink;
use crate::hub::FanoutHub;
use crate::inbox::Inbox;
use crate::janitor::{Janitor, JanitorConfig};
use crate::locks::Locks;
use crate::ports::{Ports, DEFAULT_RANGE, RESERVED_PORTS};
use crate::resurrection::Resurrection;
use crate::sessions::Sessions;
use crate::webhooks::{Dispatcher, Webhooks};

/// Tunables, usually derived from the environment by the daemon.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub port_range: (u16, u16),
    /// Reserved ports beyond the built-in set (the daemon adds its own
    /// HTTP port here).
    pub reserved_ports: Vec<u16>,
    pub agent_ttl_ms: u64,
    pub stale_after_ms: u64,
    pub dead_after_ms: u64,
    pub resurrection_retention_ms: u64,
    pub allow_private_webhooks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port_range: DEFAULT_RANGE,
            reserved_ports: Vec::new(),
            agent_ttl_ms: DEFAULT_AGENT_TTL_MS,
            stale_after_ms: crate::resurrection::DEFAULT_STALE_AFTER_MS,
            dead_after_ms: crate::resurrection::DEFAULT_DEAD_AFTER_MS,
            resurrection_retention_ms: crate::resurrection::DEFAULT_RETENTION_MS,
            allow_private_webhooks: false,
        }
    }
}

/// All subsystems over one store.
#[derive(Clone)]
pub struct Engine<C: Clock = SystemClock> {
    pub store: Store,
    pub clock: C,
    pub hub: Arc<FanoutHub>,
    pub events: EventSink<C>,
    pub activity: Activity<C>,
    pub webhooks: Webhooks<C>,
    pub ports: Ports<C>,
    pub locks: Locks<C>,
    pub broker: Broker<C>,
    pub inbox: Inbox<C>,
    pub sessions: Sessions<C>,
    pub agents: Agents<C>,
    pub resurrection: Resurrection<C>,
    pub janitor: Janitor<C>,
}

impl<C: Clock> Engine<C> {
    /// Build the engine. The returned [`Dispatcher`] must be spawned by
    /// the caller for webhook deliveries to go out.
    pub fn new(store: Store, config: EngineConfig, clock: C) -> (Self, Dispatcher<C>) {
        let hub = FanoutHub::new();

        let activity = Activity::new(store.clone(), clock.clone());
        let (webhooks, dispatcher) =
            Webhooks::new(store.clone(), clock.clone(), config.allow_private_webhooks);
        let events = EventSink::new(activity.clone(), webhooks.clone());

        let mut reserved: Vec<u16> = RESERVED_PORTS.to_vec();
        reserved.extend(&config.reserved_ports);

        let ports = Ports::new(
            store.clone(),
            events.clone(),
            clock.clone(),
            config.port_range,
            reserved,
        );
        let locks = Locks::new(store.clone(), events.clone(), clock.clone());
        let broker = Broker::new(
            store.clone(),
            Arc::clone(&hub),
            events.clone(),
            clock.clone(),
        );
        let inbox = Inbox::new(store.clone(), clock.clone());
        let sessions = Sessions::new(store.clone(), events.clone(), clock.clone());
        let agents = Agents::new(
            store.clone(),
            events.clone(),
            clock.clone(),
            config.agent_ttl_ms,
        );
        let resurrection = Resurrection::new(
            store.clone(),
            events.clone(),
            sessions.clone(),
            clock.clone(),
        );
        let janitor = Janitor::new(
            clock.clone(),
            JanitorConfig {
                stale_after_ms: config.stale_after_ms,
                dead_after_ms: config.dead_after_ms,
                resurrection_retention_ms: config.resurrection_retention_ms,
            },
            ports.clone(),
            locks.clone(),
            broker.clone(),
            agents.clone(),
            resurrection.clone(),
            activity.clone(),
        );

        (
            Self {
                store,
                clock,
                hub,
                events,
                activity,
                webhooks,
                ports,
                locks,
                broker,
                inbox,
                sessions,
                agents,
                resurrection,
                janitor,
            },
            dispatcher,
        )
    }
}

#[cfg(test)]
pub(crate) fn test_engine() -> (Engine<pd_core::FakeClock>, Dispatcher<pd_core::FakeClock>) {
    #[allow(clippy::unwrap_used)]
    let store = Store::open_in_memory().unwrap();
    let clock = pd_core::FakeClock::new();
    Engine::new(
        store,
        EngineConfig {
            allow_private_webhooks: true,
            ..EngineConfig::default()
        },
        clock,
    )
}
