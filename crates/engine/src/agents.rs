// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent registry: registration, heartbeats, liveness, resource caps.
//!
//! An agent is "active" while its last heartbeat is within `AGENT_TTL`.
//! The resurrection state machine (stale/dead thresholds) lives in the
//! janitor + resurrection queue; this module only surfaces liveness and
//! answers cap checks.

use pd_core::{Clock, DaemonError, Event, Identity};
use pd_storage::Store;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use crate::events::EventSink;

/// Heartbeat window for the "active" flag (2 min).
pub const DEFAULT_AGENT_TTL_MS: u64 = 2 * 60 * 1000;

/// Default resource caps.
pub const DEFAULT_MAX_SERVICES: i64 = 50;
pub const DEFAULT_MAX_LOCKS: i64 = 20;

/// A registered agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
    pub max_services: i64,
    pub max_locks: i64,
    pub registered_at: u64,
    pub last_heartbeat: u64,
    pub active: bool,
}

/// Registration input.
#[derive(Debug, Clone, Default)]
pub struct RegisterAgent {
    pub id: String,
    pub name: Option<String>,
    pub pid: Option<i64>,
    pub agent_type: Option<String>,
    /// Semantic identity (`project[:stack[:context]]`), stored split.
    pub identity: Option<String>,
    pub purpose: Option<String>,
    pub worktree: Option<String>,
    pub max_services: Option<i64>,
    pub max_locks: Option<i64>,
}

/// Work waiting to be inherited, reported at registration.
#[derive(Debug, Clone, Serialize)]
pub struct SalvageHint {
    pub stale_count: i64,
    pub pending_count: i64,
}

/// A cap check result.
#[derive(Debug, Clone, Serialize)]
pub struct CapCheck {
    pub allowed: bool,
    pub current: i64,
    pub max: i64,
}

/// The registry.
#[derive(Clone)]
pub struct Agents<C: Clock> {
    store: Store,
    events: EventSink<C>,
    clock: C,
    agent_ttl_ms: u64,
}

impl<C: Clock> Agents<C> {
    pub fn new(store: Store, events: EventSink<C>, clock: C, agent_ttl_ms: u64) -> Self {
        Self {
            store,
            events,
            clock,
            agent_ttl_ms,
        }
    }

    /// Register (or refresh) an agent. Returns the row and a salvage hint
    /// counting stale/pending resurrection entries in the same project.
    pub fn register(&self, reg: &RegisterAgent) -> Result<(AgentInfo, SalvageHint), DaemonError> {
        pd_core::validate_agent_id(&reg.id)?;
        let identity = match &reg.identity {
            Some(raw) => Some(Identity::parse(raw)?),
            None => None,
        };
        let now = self.clock.epoch_ms();

        self.store
            .with_tx(|tx| {
                tx.execute(
                    "INSERT INTO agents (id, name, pid, agent_type, project, stack, context,
                                         purpose, worktree, max_services, max_locks,
                                         registered_at, last_heartbeat)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
                     ON CONFLICT(id) DO UPDATE SET
                        name = COALESCE(excluded.name, name),
                        pid = COALESCE(excluded.pid, pid),
                        agent_type = COALESCE(excluded.agent_type, agent_type),
                        project = COALESCE(excluded.project, project),
                        stack = COALESCE(excluded.stack, stack),
                        context = COALESCE(excluded.context, context),
                        purpose = COALESCE(excluded.purpose, purpose),
                        worktree = COALESCE(excluded.worktree, worktree),
                        max_services = excluded.max_services,
                        max_locks = excluded.max_locks,
                        last_heartbeat = excluded.last_heartbeat",
                    params![
                        reg.id,
                        reg.name,
                        reg.pid,
                        reg.agent_type,
                        identity.as_ref().map(|i| i.project.clone()),
                        identity.as_ref().and_then(|i| i.stack.clone()),
                        identity.as_ref().and_then(|i| i.context.clone()),
                        reg.purpose,
                        reg.worktree,
                        reg.max_services.unwrap_or(DEFAULT_MAX_SERVICES),
                        reg.max_locks.unwrap_or(DEFAULT_MAX_LOCKS),
                        now,
                    ],
                )?;
                if let Some(ref identity) = identity {
                    tx.execute(
                        "INSERT INTO projects (name, last_seen) VALUES (?1, ?2)
                         ON CONFLICT(name) DO UPDATE SET last_seen = excluded.last_seen",
                        params![identity.project, now],
                    )?;
                }
                Ok(())
            })
            .map_err(internal)?;

        let hint = self.salvage_hint(identity.as_ref().map(|i| i.project.as_str()))?;
        let agent = self.get(&reg.id)?;
        self.events.emit(&Event::AgentRegister {
            id: reg.id.clone(),
            project: identity.map(|i| i.project),
        });
        Ok((agent, hint))
    }

    /// Record a heartbeat. An agent that had lapsed into the resurrection
    /// queue (stale/pending) is revived: the queue row is dropped.
    pub fn heartbeat(&self, id: &str, pid: Option<i64>) -> Result<AgentInfo, DaemonError> {
        pd_core::validate_agent_id(id)?;
        let now = self.clock.epoch_ms();
        let updated = self
            .store
            .with(|conn| {
                conn.execute(
                    "UPDATE agents SET last_heartbeat = ?2, pid = COALESCE(?3, pid) WHERE id = ?1",
                    params![id, now, pid],
                )
            })
            .map_err(internal)?;
        if updated == 0 {
            return Err(DaemonError::NotFound(format!("agent '{id}'")));
        }
        self.store
            .with(|conn| {
                conn.execute(
                    "DELETE FROM resurrection_queue
                     WHERE agent_id = ?1 AND status IN ('stale', 'pending')",
                    params![id],
                )
            })
            .map_err(internal)?;
        self.get(id)
    }

    /// One agent with its computed `active` flag.
    pub fn get(&self, id: &str) -> Result<AgentInfo, DaemonError> {
        let now = self.clock.epoch_ms();
        let ttl = self.agent_ttl_ms;
        self.store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"
                ))?;
                stmt.query_row(params![id], |row| row_to_agent(row, now, ttl))
                    .optional()
            })
            .map_err(internal)?
            .ok_or_else(|| DaemonError::NotFound(format!("agent '{id}'")))
    }

    /// List agents, optionally filtered by project and liveness.
    pub fn list(
        &self,
        project: Option<&str>,
        active_only: bool,
    ) -> Result<Vec<AgentInfo>, DaemonError> {
        let now = self.clock.epoch_ms();
        let ttl = self.agent_ttl_ms;
        let agents: Vec<AgentInfo> = self
            .store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {AGENT_COLUMNS} FROM agents
                     WHERE (?1 IS NULL OR project = ?1)
                     ORDER BY registered_at ASC"
                ))?;
                let rows = stmt.query_map(params![project], |row| row_to_agent(row, now, ttl))?;
                rows.collect()
            })
            .map_err(internal)?;
        Ok(if active_only {
            agents.into_iter().filter(|a| a.active).collect()
        } else {
            agents
        })
    }

    /// Remove an agent and force-release its locks.
    pub fn unregister(&self, id: &str) -> Result<(), DaemonError> {
        let deleted = self
            .store
            .with(|conn| conn.execute("DELETE FROM agents WHERE id = ?1", params![id]))
            .map_err(internal)?;
        if deleted == 0 {
            return Err(DaemonError::NotFound(format!("agent '{id}'")));
        }
        self.release_locks_of(id)?;
        self.events.emit(&Event::AgentUnregister { id: id.to_string() });
        Ok(())
    }

    /// Can this agent claim another service? Counts services attributed
    /// via the `agent_id` metadata stamp.
    pub fn can_claim_service(&self, id: &str) -> Result<CapCheck, DaemonError> {
        let agent = self.get(id)?;
        let needle = format!("%\"agent_id\":\"{id}\"%");
        let current: i64 = self
            .store
            .with(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM services WHERE metadata LIKE ?1",
                    params![needle],
                    |row| row.get(0),
                )
            })
            .map_err(internal)?;
        Ok(CapCheck {
            allowed: current < agent.max_services,
            current,
            max: agent.max_services,
        })
    }

    /// Can this agent acquire another lock? Counts live locks it owns.
    pub fn can_acquire_lock(&self, id: &str) -> Result<CapCheck, DaemonError> {
        let agent = self.get(id)?;
        let now = self.clock.epoch_ms();
        let current: i64 = self
            .store
            .with(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM locks
                     WHERE owner = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                    params![id, now],
                    |row| row.get(0),
                )
            })
            .map_err(internal)?;
        Ok(CapCheck {
            allowed: current < agent.max_locks,
            current,
            max: agent.max_locks,
        })
    }

    /// Registered agent count (metrics).
    pub fn count(&self) -> Result<usize, DaemonError> {
        self.store
            .with(|conn| {
                conn.query_row("SELECT COUNT(*) FROM agents", [], |row| row.get::<_, i64>(0))
            })
            .map(|n| n as usize)
            .map_err(internal)
    }

    /// Agents whose heartbeat lapsed at least `threshold_ms` ago.
    pub fn lapsed(&self, threshold_ms: u64) -> Result<Vec<AgentInfo>, DaemonError> {
        let now = self.clock.epoch_ms();
        let cutoff = now.saturating_sub(threshold_ms);
        let ttl = self.agent_ttl_ms;
        self.store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {AGENT_COLUMNS} FROM agents WHERE last_heartbeat <= ?1"
                ))?;
                let rows = stmt.query_map(params![cutoff], |row| row_to_agent(row, now, ttl))?;
                rows.collect()
            })
            .map_err(internal)
    }

    /// Delete an agent row without the not-found error (janitor path).
    pub fn remove(&self, id: &str) -> Result<bool, DaemonError> {
        let deleted = self
            .store
            .with(|conn| conn.execute("DELETE FROM agents WHERE id = ?1", params![id]))
            .map_err(internal)?;
        Ok(deleted > 0)
    }

    fn release_locks_of(&self, owner: &str) -> Result<(), DaemonError> {
        // Lock salvage on unregister mirrors the janitor's dead-agent pass.
        let names: Vec<String> = self
            .store
            .with(|conn| {
                let mut stmt = conn.prepare_cached("SELECT name FROM locks WHERE owner = ?1")?;
                let rows = stmt.query_map(params![owner], |row| row.get(0))?;
                rows.collect()
            })
            .map_err(internal)?;
        for name in names {
            self.store
                .with(|conn| conn.execute("DELETE FROM locks WHERE name = ?1", params![name]))
                .map_err(internal)?;
            self.events.emit(&Event::LockRelease {
                name,
                owner: Some(owner.to_string()),
            });
        }
        Ok(())
    }

    fn salvage_hint(&self, project: Option<&str>) -> Result<SalvageHint, DaemonError> {
        let (stale_count, pending_count) = self
            .store
            .with(|conn| {
                let count = |status: &str| -> rusqlite::Result<i64> {
                    conn.query_row(
                        "SELECT COUNT(*) FROM resurrection_queue
                         WHERE status = ?1 AND (?2 IS NULL OR project = ?2)",
                        params![status, project],
                        |row| row.get(0),
                    )
                };
                Ok((count("stale")?, count("pending")?))
            })
            .map_err(internal)?;
        Ok(SalvageHint {
            stale_count,
            pending_count,
        })
    }
}

const AGENT_COLUMNS: &str = "id, name, pid, agent_type, project, stack, context, purpose,
                             worktree, max_services, max_locks, registered_at, last_heartbeat";

fn row_to_agent(row: &Row<'_>, now: u64, ttl_ms: u64) -> rusqlite::Result<AgentInfo> {
    let last_heartbeat: u64 = row.get(12)?;
    Ok(AgentInfo {
        id: row.get(0)?,
        name: row.get(1)?,
        pid: row.get(2)?,
        agent_type: row.get(3)?,
        project: row.get(4)?,
        stack: row.get(5)?,
        context: row.get(6)?,
        purpose: row.get(7)?,
        worktree: row.get(8)?,
        max_services: row.get(9)?,
        max_locks: row.get(10)?,
        registered_at: row.get(11)?,
        last_heartbeat,
        active: now.saturating_sub(last_heartbeat) < ttl_ms,
    })
}

fn internal(err: pd_storage::StoreError) -> DaemonError {
    DaemonError::Internal(err.to_string())
}

#[cfg(test)]
#[path = "agents_tests.rs"]
mod tests;
