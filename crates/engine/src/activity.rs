// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Activity log: bounded audit trail of every state change.

use pd_core::{Clock, DaemonError, Event};
use pd_storage::Store;
use rusqlite::{params, Row};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Row cap; the janitor trims the oldest beyond this.
pub const MAX_ENTRIES: usize = 10_000;

/// Age cap (7 days).
pub const RETENTION_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Result cap for `get_recent`.
pub const QUERY_CAP: usize = 1000;

/// Result cap for time-range queries.
pub const RANGE_CAP: usize = 10_000;

/// One audit entry.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub ts: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Aggregate counts for `getSummary`.
#[derive(Debug, Clone, Serialize)]
pub struct ActivitySummary {
    pub total: i64,
    pub by_type: BTreeMap<String, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_ts: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_ts: Option<u64>,
}

/// The log.
#[derive(Clone)]
pub struct Activity<C: Clock> {
    store: Store,
    clock: C,
}

impl<C: Clock> Activity<C> {
    pub fn new(store: Store, clock: C) -> Self {
        Self { store, clock }
    }

    /// Record one event. Best-effort: a failed insert is logged, never
    /// propagated to the operation that produced the event.
    pub fn record(&self, event: &Event) {
        let detail = match event.target_id() {
            Some(target) => format!("{} {}", event.name(), target),
            None => event.name().to_string(),
        };
        let now = self.clock.epoch_ms();
        let result = self.store.with(|conn| {
            conn.execute(
                "INSERT INTO activity_log (ts, event_type, agent_id, target, detail, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    now,
                    event.name(),
                    event.agent_id(),
                    event.target_id(),
                    detail,
                    event.data().to_string(),
                ],
            )
        });
        if let Err(err) = result {
            warn!(error = %err, event = event.name(), "failed to record activity");
        }
    }

    /// Newest entries first, optionally filtered by type.
    pub fn get_recent(
        &self,
        limit: Option<usize>,
        event_type: Option<&str>,
    ) -> Result<Vec<ActivityEntry>, DaemonError> {
        let limit = limit.unwrap_or(100).min(QUERY_CAP);
        self.store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {COLUMNS} FROM activity_log
                     WHERE (?1 IS NULL OR event_type = ?1)
                     ORDER BY id DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![event_type, limit], row_to_entry)?;
                rows.collect()
            })
            .map_err(internal)
    }

    /// Entries in `[from, to]`, ascending.
    pub fn get_by_time_range(
        &self,
        from: u64,
        to: u64,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityEntry>, DaemonError> {
        let limit = limit.unwrap_or(RANGE_CAP).min(RANGE_CAP);
        self.store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {COLUMNS} FROM activity_log
                     WHERE ts >= ?1 AND ts <= ?2 ORDER BY id ASC LIMIT ?3"
                ))?;
                let rows = stmt.query_map(params![from, to, limit], row_to_entry)?;
                rows.collect()
            })
            .map_err(internal)
    }

    /// Counts per event type.
    pub fn get_summary(&self) -> Result<ActivitySummary, DaemonError> {
        self.store
            .with(|conn| {
                let mut by_type = BTreeMap::new();
                let mut stmt = conn.prepare_cached(
                    "SELECT event_type, COUNT(*) FROM activity_log GROUP BY event_type",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (event_type, count) = row?;
                    by_type.insert(event_type, count);
                }
                let (total, oldest_ts, newest_ts) = conn.query_row(
                    "SELECT COUNT(*), MIN(ts), MAX(ts) FROM activity_log",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;
                Ok(ActivitySummary {
                    total,
                    by_type,
                    oldest_ts,
                    newest_ts,
                })
            })
            .map_err(internal)
    }

    /// Total rows (metrics).
    pub fn count(&self) -> Result<usize, DaemonError> {
        self.store
            .with(|conn| {
                conn.query_row("SELECT COUNT(*) FROM activity_log", [], |row| {
                    row.get::<_, i64>(0)
                })
            })
            .map(|n| n as usize)
            .map_err(internal)
    }

    /// Apply the size and age caps. Returns rows deleted.
    pub fn trim(&self) -> Result<usize, DaemonError> {
        let cutoff = self.clock.epoch_ms().saturating_sub(RETENTION_MS);
        self.store
            .with(|conn| {
                let mut deleted =
                    conn.execute("DELETE FROM activity_log WHERE ts <= ?1", params![cutoff])?;
                deleted += conn.execute(
                    "DELETE FROM activity_log WHERE id NOT IN
                        (SELECT id FROM activity_log ORDER BY id DESC LIMIT ?1)",
                    params![MAX_ENTRIES],
                )?;
                Ok(deleted)
            })
            .map_err(internal)
    }
}

const COLUMNS: &str = "id, ts, event_type, agent_id, target, detail, metadata";

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<ActivityEntry> {
    let metadata: Option<String> = row.get(6)?;
    Ok(ActivityEntry {
        id: row.get(0)?,
        ts: row.get(1)?,
        event_type: row.get(2)?,
        agent_id: row.get(3)?,
        target: row.get(4)?,
        detail: row.get(5)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
    })
}

fn internal(err: pd_storage::StoreError) -> DaemonError {
    DaemonError::Internal(err.to_string())
}

#[cfg(test)]
#[path = "activity_tests.rs"]
mod tests;
