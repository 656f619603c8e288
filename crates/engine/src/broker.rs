// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pub/sub broker: durable channel log plus in-memory fan-out.
//!
//! Channels are ad-hoc names; the AUTOINCREMENT row id is the total order
//! within (and across) channels. Long-poll waits on the hub's per-channel
//! signal instead of busy-polling the store.

use std::sync::Arc;
use std::time::Duration;

use pd_core::{Clock, DaemonError, Event};
use pd_storage::Store;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use tokio::time::Instant;

use crate::events::EventSink;
use crate::hub::{ChannelMessage, FanoutHub, Subscription, WILDCARD_CHANNEL};

/// Hard cap on messages returned by one query.
pub const MAX_QUERY_LIMIT: usize = 1000;

/// Long-poll ceiling.
pub const MAX_POLL_TIMEOUT_MS: u64 = 30_000;

/// Per-channel aggregate for `listChannels`.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub channel: String,
    pub message_count: i64,
    pub last_message_at: u64,
    pub last_id: i64,
}

/// The broker.
#[derive(Clone)]
pub struct Broker<C: Clock> {
    store: Store,
    hub: Arc<FanoutHub>,
    events: EventSink<C>,
    clock: C,
}

impl<C: Clock> Broker<C> {
    pub fn new(store: Store, hub: Arc<FanoutHub>, events: EventSink<C>, clock: C) -> Self {
        Self {
            store,
            hub,
            events,
            clock,
        }
    }

    /// Publish one message: insert the row, then fan out to subscribers.
    pub fn publish(
        &self,
        channel: &str,
        payload: serde_json::Value,
        sender: Option<String>,
        expires_after_ms: Option<u64>,
    ) -> Result<i64, DaemonError> {
        pd_core::validate_channel(channel)?;
        if channel == WILDCARD_CHANNEL {
            return Err(DaemonError::InvalidArgument(
                "'*' is reserved for subscriptions".into(),
            ));
        }
        let now = self.clock.epoch_ms();
        let expires_at = expires_after_ms.map(|ttl| now + ttl);
        let stored = payload.to_string();

        let id = self
            .store
            .with(|conn| {
                conn.execute(
                    "INSERT INTO channel_messages (channel, payload, sender, created_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![channel, stored, sender, now, expires_at],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .map_err(internal)?;

        self.hub.publish(&ChannelMessage {
            id,
            channel: channel.to_string(),
            payload,
            sender: sender.clone(),
            created_at: now,
        });
        self.events.emit(&Event::MessagePublish {
            channel: channel.to_string(),
            id,
            sender,
        });
        Ok(id)
    }

    /// Messages after `after` (ascending), or the most recent `limit`
    /// (still returned oldest-first).
    pub fn get_messages(
        &self,
        channel: &str,
        limit: Option<usize>,
        after: Option<i64>,
    ) -> Result<Vec<ChannelMessage>, DaemonError> {
        pd_core::validate_channel(channel)?;
        let limit = limit.unwrap_or(100).min(MAX_QUERY_LIMIT);

        self.store
            .with(|conn| match after {
                Some(after) => {
                    let mut stmt = conn.prepare_cached(
                        "SELECT id, channel, payload, sender, created_at FROM channel_messages
                         WHERE channel = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3",
                    )?;
                    let rows = stmt.query_map(params![channel, after, limit], row_to_message)?;
                    rows.collect()
                }
                None => {
                    let mut stmt = conn.prepare_cached(
                        "SELECT id, channel, payload, sender, created_at FROM channel_messages
                         WHERE channel = ?1 ORDER BY id DESC LIMIT ?2",
                    )?;
                    let rows = stmt.query_map(params![channel, limit], row_to_message)?;
                    let mut messages: Vec<ChannelMessage> = rows.collect::<Result<_, _>>()?;
                    messages.reverse();
                    Ok(messages)
                }
            })
            .map_err(internal)
    }

    /// Earliest message with `id > after`, if any.
    pub fn poll(&self, channel: &str, after: i64) -> Result<Option<ChannelMessage>, DaemonError> {
        pd_core::validate_channel(channel)?;
        self.store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, channel, payload, sender, created_at FROM channel_messages
                     WHERE channel = ?1 AND id > ?2 ORDER BY id ASC LIMIT 1",
                )?;
                stmt.query_row(params![channel, after], row_to_message)
                    .optional()
            })
            .map_err(internal)
    }

    /// Block until a message newer than `after` arrives or the timeout
    /// elapses. Returns `None` on timeout.
    pub async fn long_poll(
        &self,
        channel: &str,
        after: i64,
        timeout_ms: u64,
    ) -> Result<Option<ChannelMessage>, DaemonError> {
        pd_core::validate_channel(channel)?;
        let deadline =
            Instant::now() + Duration::from_millis(timeout_ms.min(MAX_POLL_TIMEOUT_MS));
        let signal = self.hub.poll_signal(channel);

        loop {
            // Register interest before checking, so a publish between the
            // check and the await still wakes us.
            let notified = signal.notified();
            if let Some(message) = self.poll(channel, after)? {
                return Ok(Some(message));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.poll(channel, after);
            }
        }
    }

    /// Subscribe through the hub (SSE feed).
    pub fn subscribe(&self, channel: &str) -> Result<Subscription, DaemonError> {
        pd_core::validate_channel(channel)?;
        FanoutHub::subscribe(&self.hub, channel)
    }

    /// Truncate one channel. Returns the deleted count.
    pub fn clear(&self, channel: &str) -> Result<usize, DaemonError> {
        pd_core::validate_channel(channel)?;
        self.store
            .with(|conn| {
                conn.execute(
                    "DELETE FROM channel_messages WHERE channel = ?1",
                    params![channel],
                )
            })
            .map_err(internal)
    }

    /// Channels with message counts, most recently active first.
    pub fn list_channels(&self) -> Result<Vec<ChannelInfo>, DaemonError> {
        self.store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT channel, COUNT(*), MAX(created_at), MAX(id)
                     FROM channel_messages GROUP BY channel ORDER BY MAX(created_at) DESC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(ChannelInfo {
                        channel: row.get(0)?,
                        message_count: row.get(1)?,
                        last_message_at: row.get(2)?,
                        last_id: row.get(3)?,
                    })
                })?;
                rows.collect()
            })
            .map_err(internal)
    }

    /// Delete expired messages (janitor pass). Returns the count.
    pub fn purge_expired(&self, now: u64) -> Result<usize, DaemonError> {
        self.store
            .with(|conn| {
                conn.execute(
                    "DELETE FROM channel_messages
                     WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                    params![now],
                )
            })
            .map_err(internal)
    }

    /// Total stored messages (metrics).
    pub fn count(&self) -> Result<usize, DaemonError> {
        self.store
            .with(|conn| {
                conn.query_row("SELECT COUNT(*) FROM channel_messages", [], |row| {
                    row.get::<_, i64>(0)
                })
            })
            .map(|n| n as usize)
            .map_err(internal)
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<ChannelMessage> {
    let raw: String = row.get(2)?;
    let payload = serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw));
    Ok(ChannelMessage {
        id: row.get(0)?,
        channel: row.get(1)?,
        payload,
        sender: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn internal(err: pd_storage::StoreError) -> DaemonError {
    DaemonError::Internal(err.to_string())
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
