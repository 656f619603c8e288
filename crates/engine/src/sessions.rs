// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work sessions: purpose, immutable notes, advisory file claims.
//!
//! File claims are cooperative: overlapping active claims from other
//! sessions are reported as conflicts, never enforced. Ending a session
//! releases its active claims; notes are append-only for the audit trail.

use pd_core::{Clock, DaemonError, Event};
use pd_storage::Store;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::events::EventSink;

/// Session states.
pub const ACTIVE: &str = "active";
pub const COMPLETED: &str = "completed";
pub const ABANDONED: &str = "abandoned";

/// Purpose given to sessions auto-created by `quick_note`.
const QUICK_NOTES_PURPOSE: &str = "Quick notes";

/// A session row.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub purpose: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub started_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<u64>,
}

/// An immutable note.
#[derive(Debug, Clone, Serialize)]
pub struct SessionNote {
    pub id: i64,
    pub session_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub note_type: String,
    pub created_at: u64,
}

/// A file claim row. Active while `released_at` is null.
#[derive(Debug, Clone, Serialize)]
pub struct FileClaim {
    pub session_id: String,
    pub path: String,
    pub claimed_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_at: Option<u64>,
}

/// An overlap with another session's active claim.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimConflict {
    pub path: String,
    pub session_id: String,
    pub claimed_at: u64,
}

/// Session plus its notes and claims.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: Session,
    pub notes: Vec<SessionNote>,
    pub files: Vec<FileClaim>,
}

/// The manager.
#[derive(Clone)]
pub struct Sessions<C: Clock> {
    store: Store,
    events: EventSink<C>,
    clock: C,
}

impl<C: Clock> Sessions<C> {
    pub fn new(store: Store, events: EventSink<C>, clock: C) -> Self {
        Self {
            store,
            events,
            clock,
        }
    }

    /// Start a session, optionally claiming files up front.
    pub fn start(
        &self,
        purpose: &str,
        agent_id: Option<&str>,
        files: &[String],
        metadata: Option<serde_json::Value>,
    ) -> Result<(Session, Vec<ClaimConflict>), DaemonError> {
        if purpose.trim().is_empty() {
            return Err(DaemonError::Validation("purpose is empty".into()));
        }
        if let Some(agent_id) = agent_id {
            pd_core::validate_agent_id(agent_id)?;
        }
        let id = pd_core::session_id();
        let now = self.clock.epoch_ms();

        let conflicts = self
            .store
            .with_tx(|tx| {
                tx.execute(
                    "INSERT INTO sessions (id, purpose, agent_id, metadata, started_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        id,
                        purpose,
                        agent_id,
                        metadata.as_ref().map(|m| m.to_string()),
                        now
                    ],
                )?;
                claim_files_tx(tx, &id, files, now)
            })
            .map_err(internal)?;

        self.events.emit(&Event::SessionStart {
            id: id.clone(),
            agent: agent_id.map(String::from),
        });

        Ok((
            Session {
                id,
                purpose: purpose.to_string(),
                status: ACTIVE.to_string(),
                agent_id: agent_id.map(String::from),
                metadata,
                started_at: now,
                ended_at: None,
            },
            conflicts,
        ))
    }

    /// Claim additional files for an active session.
    pub fn claim_files(
        &self,
        session_id: &str,
        files: &[String],
    ) -> Result<Vec<ClaimConflict>, DaemonError> {
        let now = self.clock.epoch_ms();
        let session = self.get_session(session_id)?;
        if session.status != ACTIVE {
            return Err(DaemonError::Validation(format!(
                "session '{session_id}' is {}",
                session.status
            )));
        }
        self.store
            .with_tx(|tx| claim_files_tx(tx, session_id, files, now))
            .map_err(internal)
    }

    /// Release claims. With an empty `files` list, releases everything
    /// active. Rows are kept with `released_at` set for audit.
    pub fn release_files(&self, session_id: &str, files: &[String]) -> Result<usize, DaemonError> {
        self.get_session(session_id)?;
        let now = self.clock.epoch_ms();
        self.store
            .with(|conn| {
                if files.is_empty() {
                    conn.execute(
                        "UPDATE file_claims SET released_at = ?2
                         WHERE session_id = ?1 AND released_at IS NULL",
                        params![session_id, now],
                    )
                } else {
                    let mut released = 0;
                    let mut stmt = conn.prepare_cached(
                        "UPDATE file_claims SET released_at = ?2
                         WHERE session_id = ?1 AND path = ?3 AND released_at IS NULL",
                    )?;
                    for path in files {
                        released += stmt.execute(params![session_id, now, path])?;
                    }
                    Ok(released)
                }
            })
            .map_err(internal)
    }

    /// Append a note. Notes are immutable once written.
    pub fn add_note(
        &self,
        session_id: &str,
        content: &str,
        note_type: Option<&str>,
    ) -> Result<SessionNote, DaemonError> {
        if content.is_empty() {
            return Err(DaemonError::Validation("note content is empty".into()));
        }
        self.get_session(session_id)?;
        let now = self.clock.epoch_ms();
        let note_type = note_type.unwrap_or("note");
        let id = self
            .store
            .with(|conn| {
                conn.execute(
                    "INSERT INTO session_notes (session_id, content, note_type, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![session_id, content, note_type, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .map_err(internal)?;
        Ok(SessionNote {
            id,
            session_id: session_id.to_string(),
            content: content.to_string(),
            note_type: note_type.to_string(),
            created_at: now,
        })
    }

    /// End a session (`completed` or `abandoned`), optionally appending a
    /// handoff note. Active file claims are released.
    pub fn end(
        &self,
        session_id: &str,
        status: &str,
        handoff_note: Option<&str>,
    ) -> Result<Session, DaemonError> {
        if status != COMPLETED && status != ABANDONED {
            return Err(DaemonError::InvalidArgument(format!(
                "status must be '{COMPLETED}' or '{ABANDONED}', got '{status}'"
            )));
        }
        let session = self.get_session(session_id)?;
        if session.status != ACTIVE {
            return Err(DaemonError::Validation(format!(
                "session '{session_id}' already ended ({})",
                session.status
            )));
        }
        let now = self.clock.epoch_ms();

        self.store
            .with_tx(|tx| {
                tx.execute(
                    "UPDATE sessions SET status = ?2, ended_at = ?3 WHERE id = ?1",
                    params![session_id, status, now],
                )?;
                if let Some(note) = handoff_note {
                    tx.execute(
                        "INSERT INTO session_notes (session_id, content, note_type, created_at)
                         VALUES (?1, ?2, 'handoff', ?3)",
                        params![session_id, note, now],
                    )?;
                }
                tx.execute(
                    "UPDATE file_claims SET released_at = ?2
                     WHERE session_id = ?1 AND released_at IS NULL",
                    params![session_id, now],
                )?;
                Ok(())
            })
            .map_err(internal)?;

        self.events.emit(&Event::SessionEnd {
            id: session_id.to_string(),
            status: status.to_string(),
        });

        Ok(Session {
            status: status.to_string(),
            ended_at: Some(now),
            ..session
        })
    }

    /// Session with notes and file claims.
    pub fn get(&self, session_id: &str) -> Result<SessionDetail, DaemonError> {
        let session = self.get_session(session_id)?;
        self.store
            .with(|conn| {
                let notes = load_notes(conn, session_id, 1000)?;
                let files = load_claims(conn, session_id)?;
                Ok(SessionDetail {
                    session: session.clone(),
                    notes,
                    files,
                })
            })
            .map_err(internal)
    }

    /// List sessions, newest first.
    pub fn list(
        &self,
        agent_id: Option<&str>,
        status: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Session>, DaemonError> {
        let limit = limit.unwrap_or(100).min(1000);
        self.store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE (?1 IS NULL OR agent_id = ?1)
                       AND (?2 IS NULL OR status = ?2)
                     ORDER BY started_at DESC LIMIT ?3"
                ))?;
                let rows = stmt.query_map(params![agent_id, status, limit], row_to_session)?;
                rows.collect()
            })
            .map_err(internal)
    }

    /// Delete a session and everything it owns.
    pub fn delete(&self, session_id: &str) -> Result<(), DaemonError> {
        let deleted = self
            .store
            .with(|conn| conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id]))
            .map_err(internal)?;
        if deleted == 0 {
            return Err(DaemonError::NotFound(format!("session '{session_id}'")));
        }
        Ok(())
    }

    /// Append a note to the agent's most recent active session, creating
    /// a "Quick notes" session when none exists.
    pub fn quick_note(
        &self,
        agent_id: Option<&str>,
        content: &str,
        note_type: Option<&str>,
    ) -> Result<(String, SessionNote, bool), DaemonError> {
        if let Some(agent_id) = agent_id {
            pd_core::validate_agent_id(agent_id)?;
        }
        if content.is_empty() {
            return Err(DaemonError::Validation("note content is empty".into()));
        }

        let existing = self.latest_active(agent_id)?;
        let (session_id, created) = match existing {
            Some(id) => (id, false),
            None => {
                let (session, _) = self.start(QUICK_NOTES_PURPOSE, agent_id, &[], None)?;
                (session.id, true)
            }
        };
        let note = self.add_note(&session_id, content, note_type)?;
        Ok((session_id, note, created))
    }

    /// Most recent active session id for an agent (or the anonymous pool).
    pub fn latest_active(&self, agent_id: Option<&str>) -> Result<Option<String>, DaemonError> {
        self.store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id FROM sessions
                     WHERE status = 'active'
                       AND ((?1 IS NULL AND agent_id IS NULL) OR agent_id = ?1)
                     ORDER BY started_at DESC LIMIT 1",
                )?;
                stmt.query_row(params![agent_id], |row| row.get(0)).optional()
            })
            .map_err(internal)
    }

    /// Recent notes for a session (resurrection context).
    pub fn recent_notes(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<SessionNote>, DaemonError> {
        self.store
            .with(|conn| load_notes_desc(conn, session_id, limit))
            .map_err(internal)
    }

    fn get_session(&self, session_id: &str) -> Result<Session, DaemonError> {
        self.store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
                ))?;
                stmt.query_row(params![session_id], row_to_session).optional()
            })
            .map_err(internal)?
            .ok_or_else(|| DaemonError::NotFound(format!("session '{session_id}'")))
    }
}

/// Insert claim rows for `files`, reporting overlaps with other sessions'
/// active claims. The overlap never blocks.
fn claim_files_tx(
    conn: &Connection,
    session_id: &str,
    files: &[String],
    now: u64,
) -> rusqlite::Result<Vec<ClaimConflict>> {
    let mut conflicts = Vec::new();
    let mut overlap_stmt = conn.prepare_cached(
        "SELECT session_id, claimed_at FROM file_claims
         WHERE path = ?1 AND released_at IS NULL AND session_id != ?2",
    )?;
    let mut insert_stmt = conn.prepare_cached(
        "INSERT INTO file_claims (session_id, path, claimed_at) VALUES (?1, ?2, ?3)",
    )?;

    for path in files {
        let rows = overlap_stmt.query_map(params![path, session_id], |row| {
            Ok(ClaimConflict {
                path: path.clone(),
                session_id: row.get(0)?,
                claimed_at: row.get(1)?,
            })
        })?;
        for conflict in rows {
            conflicts.push(conflict?);
        }
        insert_stmt.execute(params![session_id, path, now])?;
    }
    Ok(conflicts)
}

const SESSION_COLUMNS: &str = "id, purpose, status, agent_id, metadata, started_at, ended_at";

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let metadata: Option<String> = row.get(4)?;
    Ok(Session {
        id: row.get(0)?,
        purpose: row.get(1)?,
        status: row.get(2)?,
        agent_id: row.get(3)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
    })
}

fn load_notes(
    conn: &Connection,
    session_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<SessionNote>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, session_id, content, note_type, created_at FROM session_notes
         WHERE session_id = ?1 ORDER BY id ASC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![session_id, limit], row_to_note)?;
    rows.collect()
}

fn load_notes_desc(
    conn: &Connection,
    session_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<SessionNote>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, session_id, content, note_type, created_at FROM session_notes
         WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![session_id, limit], row_to_note)?;
    rows.collect()
}

fn row_to_note(row: &Row<'_>) -> rusqlite::Result<SessionNote> {
    Ok(SessionNote {
        id: row.get(0)?,
        session_id: row.get(1)?,
        content: row.get(2)?,
        note_type: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn load_claims(conn: &Connection, session_id: &str) -> rusqlite::Result<Vec<FileClaim>> {
    let mut stmt = conn.prepare_cached(
        "SELECT session_id, path, claimed_at, released_at FROM file_claims
         WHERE session_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![session_id], |row| {
        Ok(FileClaim {
            session_id: row.get(0)?,
            path: row.get(1)?,
            claimed_at: row.get(2)?,
            released_at: row.get(3)?,
        })
    })?;
    rows.collect()
}

fn internal(err: pd_storage::StoreError) -> DaemonError {
    DaemonError::Internal(err.to_string())
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
