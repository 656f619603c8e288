// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent inbox: directed messages keyed by recipient.

use pd_core::{Clock, DaemonError};
use pd_storage::Store;
use rusqlite::{params, Row};
use serde::Serialize;

/// Cap on messages returned by one list call.
const MAX_LIST: usize = 500;

/// One inbox message.
#[derive(Debug, Clone, Serialize)]
pub struct InboxMessage {
    pub id: i64,
    pub recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub content: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub read: bool,
    pub created_at: u64,
}

/// The inbox.
#[derive(Clone)]
pub struct Inbox<C: Clock> {
    store: Store,
    clock: C,
}

impl<C: Clock> Inbox<C> {
    pub fn new(store: Store, clock: C) -> Self {
        Self { store, clock }
    }

    /// Send a message to `recipient`. The recipient need not be registered;
    /// messages wait for whoever claims the id.
    pub fn send(
        &self,
        recipient: &str,
        sender: Option<&str>,
        content: &str,
        msg_type: Option<&str>,
    ) -> Result<i64, DaemonError> {
        pd_core::validate_agent_id(recipient)?;
        if content.is_empty() {
            return Err(DaemonError::Validation("message content is empty".into()));
        }
        let now = self.clock.epoch_ms();
        self.store
            .with(|conn| {
                conn.execute(
                    "INSERT INTO inbox_messages (recipient, sender, content, msg_type, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![recipient, sender, content, msg_type.unwrap_or("info"), now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .map_err(internal)
    }

    /// List messages for `recipient`, oldest first.
    pub fn list(
        &self,
        recipient: &str,
        unread_only: bool,
        limit: Option<usize>,
    ) -> Result<Vec<InboxMessage>, DaemonError> {
        pd_core::validate_agent_id(recipient)?;
        let limit = limit.unwrap_or(100).min(MAX_LIST);
        self.store
            .with(|conn| {
                let sql = if unread_only {
                    "SELECT id, recipient, sender, content, msg_type, read, created_at
                     FROM inbox_messages WHERE recipient = ?1 AND read = 0
                     ORDER BY id ASC LIMIT ?2"
                } else {
                    "SELECT id, recipient, sender, content, msg_type, read, created_at
                     FROM inbox_messages WHERE recipient = ?1
                     ORDER BY id ASC LIMIT ?2"
                };
                let mut stmt = conn.prepare_cached(sql)?;
                let rows = stmt.query_map(params![recipient, limit], row_to_message)?;
                rows.collect()
            })
            .map_err(internal)
    }

    /// Mark every unread message read; returns how many flipped.
    pub fn mark_read(&self, recipient: &str) -> Result<usize, DaemonError> {
        pd_core::validate_agent_id(recipient)?;
        self.store
            .with(|conn| {
                conn.execute(
                    "UPDATE inbox_messages SET read = 1 WHERE recipient = ?1 AND read = 0",
                    params![recipient],
                )
            })
            .map_err(internal)
    }

    /// Unread count for an agent.
    pub fn unread_count(&self, recipient: &str) -> Result<usize, DaemonError> {
        pd_core::validate_agent_id(recipient)?;
        self.store
            .with(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM inbox_messages WHERE recipient = ?1 AND read = 0",
                    params![recipient],
                    |row| row.get::<_, i64>(0),
                )
            })
            .map(|n| n as usize)
            .map_err(internal)
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<InboxMessage> {
    Ok(InboxMessage {
        id: row.get(0)?,
        recipient: row.get(1)?,
        sender: row.get(2)?,
        content: row.get(3)?,
        msg_type: row.get(4)?,
        read: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
    })
}

fn internal(err: pd_storage::StoreError) -> DaemonError {
    DaemonError::Internal(err.to_string())
}

#[cfg(test)]
#[path = "inbox_tests.rs"]
mod tests;
