// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background janitor: applies TTLs and escalates stale agents.
//!
//! One tick runs five passes in order: expired services, expired locks,
//! expired channel messages, lapsed agents (resurrection upserts + lock
//! salvage + dead-agent removal), and the activity-log trim. The janitor
//! holds no state across ticks and is safe to restart at any time.

use std::time::Duration;

use pd_core::Clock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::activity::Activity;
use crate::agents::Agents;
use crate::broker::Broker;
use crate::locks::Locks;
use crate::ports::Ports;
use crate::resurrection::Resurrection;

/// Default tick interval.
pub const DEFAULT_TICK: Duration = Duration::from_secs(5);

/// Threshold configuration for the agent pass.
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    pub stale_after_ms: u64,
    pub dead_after_ms: u64,
    pub resurrection_retention_ms: u64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: crate::resurrection::DEFAULT_STALE_AFTER_MS,
            dead_after_ms: crate::resurrection::DEFAULT_DEAD_AFTER_MS,
            resurrection_retention_ms: crate::resurrection::DEFAULT_RETENTION_MS,
        }
    }
}

/// The sweeper.
#[derive(Clone)]
pub struct Janitor<C: Clock> {
    clock: C,
    config: JanitorConfig,
    ports: Ports<C>,
    locks: Locks<C>,
    broker: Broker<C>,
    agents: Agents<C>,
    resurrection: Resurrection<C>,
    activity: Activity<C>,
}

impl<C: Clock> Janitor<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: C,
        config: JanitorConfig,
        ports: Ports<C>,
        locks: Locks<C>,
        broker: Broker<C>,
        agents: Agents<C>,
        resurrection: Resurrection<C>,
        activity: Activity<C>,
    ) -> Self {
        Self {
            clock,
            config,
            ports,
            locks,
            broker,
            agents,
            resurrection,
            activity,
        }
    }

    /// Run one sweep. Each pass is independent; a failing pass is logged
    /// and the rest still run.
    pub fn tick(&self) {
        let now = self.clock.epoch_ms();

        match self.ports.release_expired() {
            Ok(freed) if !freed.is_empty() => {
                debug!(count = freed.len(), "janitor: released expired services")
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "janitor: service pass failed"),
        }

        match self.locks.sweep_expired(now) {
            Ok(names) if !names.is_empty() => {
                debug!(count = names.len(), "janitor: expired locks")
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "janitor: lock pass failed"),
        }

        match self.broker.purge_expired(now) {
            Ok(purged) if purged > 0 => debug!(purged, "janitor: purged expired messages"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "janitor: message pass failed"),
        }

        if let Err(err) = self.agent_pass(now) {
            warn!(error = %err, "janitor: agent pass failed");
        }

        if let Err(err) = self
            .resurrection
            .purge_old(self.config.resurrection_retention_ms)
        {
            warn!(error = %err, "janitor: resurrection retention failed");
        }

        if let Err(err) = self.activity.trim() {
            warn!(error = %err, "janitor: activity trim failed");
        }
    }

    /// Stale/dead agent handling. Services are deliberately untouched;
    /// they expire on their own TTL.
    fn agent_pass(&self, now: u64) -> Result<(), pd_core::DaemonError> {
        let lapsed = self.agents.lapsed(self.config.stale_after_ms)?;
        for agent in lapsed {
            let lapse = now.saturating_sub(agent.last_heartbeat);
            let claimable = lapse >= self.config.dead_after_ms;
            self.resurrection.note_lapsed(&agent, claimable)?;

            if claimable {
                self.locks.release_owned_by(&agent.id)?;
                if self.agents.remove(&agent.id)? {
                    debug!(agent_id = %agent.id, "janitor: removed dead agent");
                }
            }
        }
        Ok(())
    }

    /// Spawn the periodic loop.
    pub fn spawn(self, interval: Duration, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }
                // interval fires immediately once; that first sweep is harmless
                let janitor = self.clone();
                let result = tokio::task::spawn_blocking(move || janitor.tick()).await;
                if result.is_err() {
                    warn!("janitor tick panicked");
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "janitor_tests.rs"]
mod tests;
