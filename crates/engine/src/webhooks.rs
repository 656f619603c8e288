// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Webhook registry and delivery dispatcher.
//!
//! Registration validates the URL against the SSRF guard. Triggering
//! selects active webhooks whose event set covers the event and whose
//! filter glob-matches the target id, writes one delivery row per match,
//! and hands the id to the dispatcher over a bounded queue. The worker
//! delivers one at a time: sign, POST with a 10 s timeout, then mark
//! delivered / schedule backoff / mark failed.

use hmac::{Hmac, Mac};
use pd_core::{glob_match, Clock, DaemonError, Event};
use pd_storage::Store;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ssrf;

/// Global cap on registered webhooks.
pub const MAX_WEBHOOKS: usize = 100;

/// Bounded in-memory delivery queue.
pub const QUEUE_CAPACITY: usize = 10_000;

/// Attempts before a delivery is marked failed.
pub const MAX_ATTEMPTS: i64 = 5;

/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured response bodies are truncated to this many bytes.
pub const BODY_CAP: usize = 1000;

/// Deliveries older than this are swept daily.
pub const DELIVERY_RETENTION_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// A registered webhook.
#[derive(Debug, Clone, Serialize)]
pub struct Webhook {
    pub id: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub events: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    pub active: bool,
    pub success_count: i64,
    pub failure_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: u64,
}

/// One delivery attempt record.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub id: String,
    pub webhook_id: String,
    pub event: String,
    pub payload: String,
    pub status: String,
    pub attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    pub created_at: u64,
}

/// Registration / update input.
#[derive(Debug, Clone, Default)]
pub struct WebhookSpec {
    pub url: String,
    pub secret: Option<String>,
    pub events: Option<Vec<String>>,
    pub filter: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Compute the `X-PortDaddy-Signature` value for a payload.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, DaemonError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| DaemonError::Internal(format!("hmac key: {e}")))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// The registry + trigger side. Cloneable; shares the queue sender.
#[derive(Clone)]
pub struct Webhooks<C: Clock> {
    store: Store,
    clock: C,
    queue_tx: mpsc::Sender<String>,
    allow_private: bool,
    overflow: Arc<AtomicU64>,
}

impl<C: Clock> Webhooks<C> {
    /// Build the registry and its dispatcher. The caller spawns
    /// [`Dispatcher::run`].
    pub fn new(store: Store, clock: C, allow_private: bool) -> (Self, Dispatcher<C>) {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        let webhooks = Self {
            store: store.clone(),
            clock: clock.clone(),
            queue_tx: queue_tx.clone(),
            allow_private,
            overflow: Arc::new(AtomicU64::new(0)),
        };
        let dispatcher = Dispatcher {
            store,
            clock,
            queue_rx,
            queue_tx,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        };
        (webhooks, dispatcher)
    }

    /// Register a webhook. Validates the URL scheme and the SSRF blocklist.
    pub fn register(&self, spec: &WebhookSpec) -> Result<Webhook, DaemonError> {
        self.validate_spec(spec)?;
        let count: i64 = self
            .store
            .with(|conn| {
                conn.query_row("SELECT COUNT(*) FROM webhooks", [], |row| row.get(0))
            })
            .map_err(internal)?;
        if count as usize >= MAX_WEBHOOKS {
            return Err(DaemonError::ResourceLimit(format!(
                "webhook cap reached (max {MAX_WEBHOOKS})"
            )));
        }

        let id = pd_core::webhook_id();
        let now = self.clock.epoch_ms();
        let events = spec
            .events
            .clone()
            .unwrap_or_else(|| vec!["*".to_string()]);
        self.store
            .with(|conn| {
                conn.execute(
                    "INSERT INTO webhooks (id, url, secret, events, filter, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        id,
                        spec.url,
                        spec.secret,
                        serde_json::to_string(&events).unwrap_or_else(|_| "[\"*\"]".into()),
                        spec.filter,
                        spec.metadata.as_ref().map(|m| m.to_string()),
                        now,
                    ],
                )
            })
            .map_err(internal)?;
        self.get(&id)
    }

    /// Update mutable fields of a webhook.
    pub fn update(
        &self,
        id: &str,
        spec: &WebhookSpec,
        active: Option<bool>,
    ) -> Result<Webhook, DaemonError> {
        let existing = self.get(id)?;
        let merged = WebhookSpec {
            url: if spec.url.is_empty() {
                existing.url.clone()
            } else {
                spec.url.clone()
            },
            secret: spec.secret.clone().or(existing.secret.clone()),
            events: spec.events.clone().or(Some(existing.events.clone())),
            filter: spec.filter.clone().or(existing.filter.clone()),
            metadata: spec.metadata.clone().or(existing.metadata.clone()),
        };
        self.validate_spec(&merged)?;

        self.store
            .with(|conn| {
                conn.execute(
                    "UPDATE webhooks SET url = ?2, secret = ?3, events = ?4, filter = ?5,
                                         metadata = ?6, active = ?7
                     WHERE id = ?1",
                    params![
                        id,
                        merged.url,
                        merged.secret,
                        serde_json::to_string(&merged.events.clone().unwrap_or_default())
                            .unwrap_or_else(|_| "[\"*\"]".into()),
                        merged.filter,
                        merged.metadata.as_ref().map(|m| m.to_string()),
                        active.unwrap_or(existing.active),
                    ],
                )
            })
            .map_err(internal)?;
        self.get(id)
    }

    /// Delete a webhook (deliveries cascade).
    pub fn delete(&self, id: &str) -> Result<(), DaemonError> {
        let deleted = self
            .store
            .with(|conn| conn.execute("DELETE FROM webhooks WHERE id = ?1", params![id]))
            .map_err(internal)?;
        if deleted == 0 {
            return Err(DaemonError::NotFound(format!("webhook '{id}'")));
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Webhook, DaemonError> {
        self.store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = ?1"
                ))?;
                stmt.query_row(params![id], row_to_webhook).optional()
            })
            .map_err(internal)?
            .ok_or_else(|| DaemonError::NotFound(format!("webhook '{id}'")))
    }

    pub fn list(&self) -> Result<Vec<Webhook>, DaemonError> {
        self.store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {WEBHOOK_COLUMNS} FROM webhooks ORDER BY created_at ASC"
                ))?;
                let rows = stmt.query_map([], row_to_webhook)?;
                rows.collect()
            })
            .map_err(internal)
    }

    /// Delivery history for one webhook, newest first.
    pub fn deliveries(&self, id: &str, limit: Option<usize>) -> Result<Vec<Delivery>, DaemonError> {
        self.get(id)?;
        let limit = limit.unwrap_or(50).min(1000);
        self.store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries
                     WHERE webhook_id = ?1 ORDER BY created_at DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![id, limit], row_to_delivery)?;
                rows.collect()
            })
            .map_err(internal)
    }

    /// Match the event against active webhooks and enqueue deliveries.
    /// Best-effort: never fails the caller; a full queue only bumps the
    /// overflow counter (rows stay pending for the next startup scan).
    pub fn trigger(&self, event: &Event) -> usize {
        let webhooks = match self.list() {
            Ok(webhooks) => webhooks,
            Err(err) => {
                warn!(error = %err, "webhook trigger: list failed");
                return 0;
            }
        };

        let name = event.name();
        let target = event.target_id();
        let mut enqueued = 0;

        for webhook in webhooks.iter().filter(|w| w.active) {
            let event_match = webhook
                .events
                .iter()
                .any(|e| e == "*" || e == name);
            if !event_match {
                continue;
            }
            if let Some(ref filter) = webhook.filter {
                match target {
                    Some(target) if glob_match(filter, target) => {}
                    _ => continue,
                }
            }

            let payload = json!({
                "event": name,
                "timestamp": self.clock.epoch_ms(),
                "data": event.data(),
            });
            if self.enqueue(&webhook.id, name, &payload.to_string()) {
                enqueued += 1;
            }
        }
        enqueued
    }

    /// Enqueue a synthetic test delivery for one webhook.
    pub fn test(&self, id: &str) -> Result<String, DaemonError> {
        let webhook = self.get(id)?;
        let payload = json!({
            "event": "webhook.test",
            "timestamp": self.clock.epoch_ms(),
            "data": { "webhook_id": webhook.id },
        });
        let delivery_id = self
            .insert_delivery(&webhook.id, "webhook.test", &payload.to_string())
            .ok_or_else(|| DaemonError::Internal("failed to record test delivery".into()))?;
        if self.queue_tx.try_send(delivery_id.clone()).is_err() {
            self.overflow.fetch_add(1, Ordering::Relaxed);
        }
        Ok(delivery_id)
    }

    /// Re-enqueue unfinished deliveries after a restart.
    pub fn requeue_unfinished(&self) -> Result<usize, DaemonError> {
        let ids: Vec<String> = self
            .store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id FROM webhook_deliveries
                     WHERE status IN ('pending', 'retrying') AND attempts < ?1",
                )?;
                let rows = stmt.query_map(params![MAX_ATTEMPTS], |row| row.get(0))?;
                rows.collect()
            })
            .map_err(internal)?;
        let mut requeued = 0;
        for id in ids {
            if self.queue_tx.try_send(id).is_ok() {
                requeued += 1;
            } else {
                self.overflow.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(requeued)
    }

    /// Times the bounded queue rejected an enqueue since startup.
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Registered webhook / backlog counts (metrics).
    pub fn counts(&self) -> Result<(usize, usize), DaemonError> {
        self.store
            .with(|conn| {
                let webhooks: i64 =
                    conn.query_row("SELECT COUNT(*) FROM webhooks", [], |row| row.get(0))?;
                let backlog: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM webhook_deliveries WHERE status IN ('pending', 'retrying')",
                    [],
                    |row| row.get(0),
                )?;
                Ok((webhooks as usize, backlog as usize))
            })
            .map_err(internal)
    }

    fn enqueue(&self, webhook_id: &str, event: &str, payload: &str) -> bool {
        let Some(delivery_id) = self.insert_delivery(webhook_id, event, payload) else {
            return false;
        };
        match self.queue_tx.try_send(delivery_id) {
            Ok(()) => true,
            Err(_) => {
                self.overflow.fetch_add(1, Ordering::Relaxed);
                debug!(webhook_id, "delivery queue full, left pending for startup scan");
                false
            }
        }
    }

    fn insert_delivery(&self, webhook_id: &str, event: &str, payload: &str) -> Option<String> {
        let id = pd_core::delivery_id();
        let now = self.clock.epoch_ms();
        let result = self.store.with(|conn| {
            conn.execute(
                "INSERT INTO webhook_deliveries (id, webhook_id, event, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, webhook_id, event, payload, now],
            )
        });
        match result {
            Ok(_) => Some(id),
            Err(err) => {
                warn!(error = %err, webhook_id, "failed to record delivery");
                None
            }
        }
    }

    fn validate_spec(&self, spec: &WebhookSpec) -> Result<(), DaemonError> {
        let url = reqwest::Url::parse(&spec.url)
            .map_err(|e| DaemonError::Validation(format!("invalid webhook url: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(DaemonError::Validation(format!(
                "webhook url must be http or https, got '{}'",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| DaemonError::Validation("webhook url has no host".into()))?;
        if !self.allow_private && ssrf::host_is_blocked(host) {
            return Err(DaemonError::Forbidden(format!(
                "webhook host '{host}' is on the private-network blocklist"
            )));
        }
        if let Some(ref filter) = spec.filter {
            pd_core::validate_filter_pattern(filter)?;
        }
        if let Some(ref events) = spec.events {
            if events.is_empty() {
                return Err(DaemonError::Validation("event set is empty".into()));
            }
        }
        Ok(())
    }
}

/// The delivery worker. One per daemon.
pub struct Dispatcher<C: Clock> {
    store: Store,
    clock: C,
    queue_rx: mpsc::Receiver<String>,
    queue_tx: mpsc::Sender<String>,
    client: reqwest::Client,
}

impl<C: Clock> Dispatcher<C> {
    /// Drain the queue until shutdown, sweeping old deliveries daily.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut sweep = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sweep.tick() => {
                    if let Err(err) = self.sweep_old() {
                        warn!(error = %err, "delivery sweep failed");
                    }
                }
                id = self.queue_rx.recv() => {
                    match id {
                        Some(id) => self.deliver(&id).await,
                        None => break,
                    }
                }
            }
        }
    }

    /// Attempt one delivery and record the outcome.
    async fn deliver(&self, delivery_id: &str) {
        let loaded = self.load(delivery_id);
        let (delivery, webhook) = match loaded {
            Ok(Some(pair)) => pair,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, delivery_id, "failed to load delivery");
                return;
            }
        };
        if !webhook.active {
            let _ = self.mark(&delivery.id, "failed", delivery.attempts, None, None);
            return;
        }

        let attempts = delivery.attempts + 1;
        let now = self.clock.epoch_ms();
        let body = delivery.payload.clone().into_bytes();

        let mut request = self
            .client
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header("X-PortDaddy-Event", &delivery.event)
            .header("X-PortDaddy-Delivery", &delivery.id)
            .header("X-PortDaddy-Timestamp", now.to_string());
        if let Some(ref secret) = webhook.secret {
            match sign_payload(secret, &body) {
                Ok(signature) => {
                    request = request.header("X-PortDaddy-Signature", signature);
                }
                Err(err) => {
                    warn!(error = %err, delivery_id, "failed to sign payload");
                }
            }
        }

        let outcome = request.body(body).send().await;
        match outcome {
            Ok(response) if response.status().is_success() => {
                let status = response.status().as_u16() as i64;
                let body = truncated_body(response).await;
                let _ = self.mark(&delivery.id, "delivered", attempts, Some(status), body);
                let _ = self.bump_counter(&webhook.id, "success_count");
                debug!(delivery_id, webhook_id = %webhook.id, "delivered");
            }
            Ok(response) => {
                let status = response.status().as_u16() as i64;
                let body = truncated_body(response).await;
                self.handle_failure(&delivery, &webhook, attempts, Some(status), body)
                    .await;
            }
            Err(err) => {
                self.handle_failure(
                    &delivery,
                    &webhook,
                    attempts,
                    None,
                    Some(err.to_string().chars().take(BODY_CAP).collect()),
                )
                .await;
            }
        }
    }

    async fn handle_failure(
        &self,
        delivery: &Delivery,
        webhook: &Webhook,
        attempts: i64,
        status: Option<i64>,
        body: Option<String>,
    ) {
        if attempts < MAX_ATTEMPTS {
            let _ = self.mark(&delivery.id, "retrying", attempts, status, body);
            let delay = Duration::from_secs(1u64 << (attempts - 1));
            let tx = self.queue_tx.clone();
            let id = delivery.id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(id).await;
            });
            debug!(
                delivery_id = %delivery.id,
                attempts,
                delay_s = delay.as_secs(),
                "delivery failed, retry scheduled"
            );
        } else {
            let _ = self.mark(&delivery.id, "failed", attempts, status, body);
            let _ = self.bump_counter(&webhook.id, "failure_count");
            warn!(delivery_id = %delivery.id, webhook_id = %webhook.id, "delivery failed permanently");
        }
    }

    fn load(
        &self,
        delivery_id: &str,
    ) -> Result<Option<(Delivery, Webhook)>, pd_storage::StoreError> {
        self.store.with(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE id = ?1"
            ))?;
            let delivery = stmt
                .query_row(params![delivery_id], row_to_delivery)
                .optional()?;
            let Some(delivery) = delivery else {
                return Ok(None);
            };
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = ?1"
            ))?;
            let webhook = stmt
                .query_row(params![delivery.webhook_id], row_to_webhook)
                .optional()?;
            Ok(webhook.map(|w| (delivery, w)))
        })
    }

    fn mark(
        &self,
        delivery_id: &str,
        status: &str,
        attempts: i64,
        response_status: Option<i64>,
        response_body: Option<String>,
    ) -> Result<(), pd_storage::StoreError> {
        let now = self.clock.epoch_ms();
        self.store.with(|conn| {
            conn.execute(
                "UPDATE webhook_deliveries
                 SET status = ?2, attempts = ?3, last_attempt_at = ?4,
                     response_status = ?5, response_body = ?6
                 WHERE id = ?1",
                params![delivery_id, status, attempts, now, response_status, response_body],
            )?;
            Ok(())
        })
    }

    fn bump_counter(&self, webhook_id: &str, column: &str) -> Result<(), pd_storage::StoreError> {
        // column is one of two compile-time literals, never user input
        self.store.with(|conn| {
            conn.execute(
                &format!("UPDATE webhooks SET {column} = {column} + 1 WHERE id = ?1"),
                params![webhook_id],
            )?;
            Ok(())
        })
    }

    fn sweep_old(&self) -> Result<usize, pd_storage::StoreError> {
        let cutoff = self.clock.epoch_ms().saturating_sub(DELIVERY_RETENTION_MS);
        self.store.with(|conn| {
            conn.execute(
                "DELETE FROM webhook_deliveries WHERE created_at <= ?1",
                params![cutoff],
            )
        })
    }
}

async fn truncated_body(response: reqwest::Response) -> Option<String> {
    let text = response.text().await.ok()?;
    Some(text.chars().take(BODY_CAP).collect())
}

const WEBHOOK_COLUMNS: &str = "id, url, secret, events, filter, active, success_count,
                               failure_count, metadata, created_at";

fn row_to_webhook(row: &Row<'_>) -> rusqlite::Result<Webhook> {
    let events: String = row.get(3)?;
    let metadata: Option<String> = row.get(8)?;
    Ok(Webhook {
        id: row.get(0)?,
        url: row.get(1)?,
        secret: row.get(2)?,
        events: serde_json::from_str(&events).unwrap_or_else(|_| vec!["*".to_string()]),
        filter: row.get(4)?,
        active: row.get::<_, i64>(5)? != 0,
        success_count: row.get(6)?,
        failure_count: row.get(7)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: row.get(9)?,
    })
}

const DELIVERY_COLUMNS: &str = "id, webhook_id, event, payload, status, attempts,
                                last_attempt_at, response_status, response_body, created_at";

fn row_to_delivery(row: &Row<'_>) -> rusqlite::Result<Delivery> {
    Ok(Delivery {
        id: row.get(0)?,
        webhook_id: row.get(1)?,
        event: row.get(2)?,
        payload: row.get(3)?,
        status: row.get(4)?,
        attempts: row.get(5)?,
        last_attempt_at: row.get(6)?,
        response_status: row.get(7)?,
        response_body: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn internal(err: pd_storage::StoreError) -> DaemonError {
    DaemonError::Internal(err.to_string())
}

#[cfg(test)]
#[path = "webhooks_tests.rs"]
mod tests;
