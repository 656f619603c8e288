// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resurrection queue: durable record of lapsed agents and the handoff
//! state machine.
//!
//! ```text
//! (heartbeat lapse ≥ STALE)  → stale
//! (heartbeat lapse ≥ DEAD)   → pending
//! claim                      → resurrecting   (bound to the new agent)
//! complete                   → row removed
//! abandon                    → pending        (back in the queue)
//! dismiss                    → row removed
//! ```

use pd_core::{Clock, DaemonError, Event};
use pd_storage::Store;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use crate::events::EventSink;
use crate::sessions::{SessionNote, Sessions};

/// Heartbeat lapse before an agent is queued as stale (10 min).
pub const DEFAULT_STALE_AFTER_MS: u64 = 10 * 60 * 1000;

/// Heartbeat lapse before a queued agent becomes claimable (20 min).
pub const DEFAULT_DEAD_AFTER_MS: u64 = 20 * 60 * 1000;

/// Queue rows older than this are aged out (7 days).
pub const DEFAULT_RETENTION_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Queue row states.
pub const STALE: &str = "stale";
pub const PENDING: &str = "pending";
pub const RESURRECTING: &str = "resurrecting";

/// One queued agent.
#[derive(Debug, Clone, Serialize)]
pub struct ResurrectionEntry {
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub status: String,
    pub attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub detected_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<u64>,
}

/// Context handed to the claiming agent so it can resume the work.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimContext {
    #[serde(flatten)]
    pub entry: ResurrectionEntry,
    pub notes: Vec<SessionNote>,
}

/// The queue.
#[derive(Clone)]
pub struct Resurrection<C: Clock> {
    store: Store,
    events: EventSink<C>,
    sessions: Sessions<C>,
    clock: C,
}

impl<C: Clock> Resurrection<C> {
    pub fn new(store: Store, events: EventSink<C>, sessions: Sessions<C>, clock: C) -> Self {
        Self {
            store,
            events,
            sessions,
            clock,
        }
    }

    /// List queue entries, optionally filtered by project/stack/status.
    pub fn list(
        &self,
        project: Option<&str>,
        stack: Option<&str>,
        status: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ResurrectionEntry>, DaemonError> {
        let limit = limit.unwrap_or(100).min(1000);
        self.store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM resurrection_queue
                     WHERE (?1 IS NULL OR project = ?1)
                       AND (?2 IS NULL OR stack = ?2)
                       AND (?3 IS NULL OR status = ?3)
                     ORDER BY detected_at ASC LIMIT ?4"
                ))?;
                let rows = stmt.query_map(params![project, stack, status, limit], row_to_entry)?;
                rows.collect()
            })
            .map_err(internal)
    }

    /// One entry.
    pub fn get(&self, agent_id: &str) -> Result<ResurrectionEntry, DaemonError> {
        self.entry(agent_id)?
            .ok_or_else(|| DaemonError::NotFound(format!("resurrection entry '{agent_id}'")))
    }

    /// Claim a pending entry for `new_agent_id`; returns the dead agent's
    /// session, purpose, and recent notes.
    pub fn claim(&self, agent_id: &str, new_agent_id: &str) -> Result<ClaimContext, DaemonError> {
        pd_core::validate_agent_id(new_agent_id)?;
        let entry = self.get(agent_id)?;
        if entry.status != PENDING {
            return Err(DaemonError::Validation(format!(
                "entry '{agent_id}' is {}, only pending entries can be claimed",
                entry.status
            )));
        }
        let now = self.clock.epoch_ms();
        self.store
            .with(|conn| {
                conn.execute(
                    "UPDATE resurrection_queue
                     SET status = ?2, new_agent_id = ?3, attempts = attempts + 1,
                         last_attempt_at = ?4
                     WHERE agent_id = ?1",
                    params![agent_id, RESURRECTING, new_agent_id, now],
                )
            })
            .map_err(internal)?;

        let entry = self.get(agent_id)?;
        let notes = match entry.session_id {
            Some(ref session_id) => self.sessions.recent_notes(session_id, 10)?,
            None => Vec::new(),
        };
        self.events.emit(&Event::ResurrectionClaim {
            agent_id: agent_id.to_string(),
            new_agent_id: new_agent_id.to_string(),
        });
        Ok(ClaimContext { entry, notes })
    }

    /// Finish a resurrection: the claimer has taken over; drop the row.
    pub fn complete(&self, agent_id: &str, new_agent_id: &str) -> Result<(), DaemonError> {
        let entry = self.get(agent_id)?;
        if entry.status != RESURRECTING {
            return Err(DaemonError::Validation(format!(
                "entry '{agent_id}' is {}, not resurrecting",
                entry.status
            )));
        }
        if entry.new_agent_id.as_deref() != Some(new_agent_id) {
            return Err(DaemonError::Validation(format!(
                "entry '{agent_id}' was claimed by a different agent"
            )));
        }
        self.store
            .with(|conn| {
                conn.execute(
                    "DELETE FROM resurrection_queue WHERE agent_id = ?1",
                    params![agent_id],
                )
            })
            .map_err(internal)?;
        self.events.emit(&Event::ResurrectionComplete {
            agent_id: agent_id.to_string(),
        });
        Ok(())
    }

    /// Return a claimed entry to the queue.
    pub fn abandon(&self, agent_id: &str) -> Result<(), DaemonError> {
        let entry = self.get(agent_id)?;
        if entry.status != RESURRECTING {
            return Err(DaemonError::Validation(format!(
                "entry '{agent_id}' is {}, not resurrecting",
                entry.status
            )));
        }
        self.store
            .with(|conn| {
                conn.execute(
                    "UPDATE resurrection_queue
                     SET status = ?2, new_agent_id = NULL WHERE agent_id = ?1",
                    params![agent_id, PENDING],
                )
            })
            .map_err(internal)?;
        Ok(())
    }

    /// Drop an entry regardless of state.
    pub fn dismiss(&self, agent_id: &str) -> Result<(), DaemonError> {
        let deleted = self
            .store
            .with(|conn| {
                conn.execute(
                    "DELETE FROM resurrection_queue WHERE agent_id = ?1",
                    params![agent_id],
                )
            })
            .map_err(internal)?;
        if deleted == 0 {
            return Err(DaemonError::NotFound(format!(
                "resurrection entry '{agent_id}'"
            )));
        }
        Ok(())
    }

    /// Janitor hook: record a lapsed agent, upgrading stale → pending once
    /// past the dead threshold. Emits `agent.stale` / `agent.dead` only on
    /// transitions. The agent's most recent active session is captured at
    /// first detection.
    pub fn note_lapsed(
        &self,
        agent: &crate::agents::AgentInfo,
        claimable: bool,
    ) -> Result<(), DaemonError> {
        let desired = if claimable { PENDING } else { STALE };
        let now = self.clock.epoch_ms();
        let existing = self.entry(&agent.id)?;

        match existing {
            None => {
                let session_id = self.sessions.latest_active(Some(&agent.id))?;
                self.store
                    .with(|conn| {
                        conn.execute(
                            "INSERT INTO resurrection_queue
                                (agent_id, name, session_id, purpose, project, stack, context,
                                 status, detected_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                            params![
                                agent.id,
                                agent.name,
                                session_id,
                                agent.purpose,
                                agent.project,
                                agent.stack,
                                agent.context,
                                desired,
                                now,
                            ],
                        )
                    })
                    .map_err(internal)?;
                if claimable {
                    self.events.emit(&Event::AgentDead {
                        id: agent.id.clone(),
                    });
                } else {
                    self.events.emit(&Event::AgentStale {
                        id: agent.id.clone(),
                    });
                }
            }
            Some(entry) if entry.status == STALE && claimable => {
                self.store
                    .with(|conn| {
                        conn.execute(
                            "UPDATE resurrection_queue SET status = ?2 WHERE agent_id = ?1",
                            params![agent.id, PENDING],
                        )
                    })
                    .map_err(internal)?;
                self.events.emit(&Event::AgentDead {
                    id: agent.id.clone(),
                });
            }
            // pending/resurrecting entries (or stale before the dead
            // threshold) are left alone
            Some(_) => {}
        }
        Ok(())
    }

    /// Age out entries past the retention horizon.
    pub fn purge_old(&self, retention_ms: u64) -> Result<usize, DaemonError> {
        let cutoff = self.clock.epoch_ms().saturating_sub(retention_ms);
        self.store
            .with(|conn| {
                conn.execute(
                    "DELETE FROM resurrection_queue WHERE detected_at <= ?1",
                    params![cutoff],
                )
            })
            .map_err(internal)
    }

    fn entry(&self, agent_id: &str) -> Result<Option<ResurrectionEntry>, DaemonError> {
        self.store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM resurrection_queue WHERE agent_id = ?1"
                ))?;
                stmt.query_row(params![agent_id], row_to_entry).optional()
            })
            .map_err(internal)
    }
}

const ENTRY_COLUMNS: &str = "agent_id, name, session_id, purpose, project, stack, context,
                             status, attempts, new_agent_id, metadata, detected_at,
                             last_attempt_at";

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<ResurrectionEntry> {
    let metadata: Option<String> = row.get(10)?;
    Ok(ResurrectionEntry {
        agent_id: row.get(0)?,
        name: row.get(1)?,
        session_id: row.get(2)?,
        purpose: row.get(3)?,
        project: row.get(4)?,
        stack: row.get(5)?,
        context: row.get(6)?,
        status: row.get(7)?,
        attempts: row.get(8)?,
        new_agent_id: row.get(9)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        detected_at: row.get(11)?,
        last_attempt_at: row.get(12)?,
    })
}

fn internal(err: pd_storage::StoreError) -> DaemonError {
    DaemonError::Internal(err.to_string())
}

#[cfg(test)]
#[path = "resurrection_tests.rs"]
mod tests;
