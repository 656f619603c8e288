// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory fan-out hub for channel messages.
//!
//! Subscribers are addressable handles backed by bounded mpsc senders;
//! dropping a [`Subscription`] unsubscribes it. The hub also keeps one
//! `Notify` per channel so long-pollers wake on publish instead of
//! busy-waiting. Fan-out is best-effort: a full or closed subscriber
//! never blocks the publisher or its siblings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use pd_core::DaemonError;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

/// Cap on distinct channels with live subscribers.
pub const MAX_CHANNELS: usize = 1000;

/// Cap on subscribers per channel.
pub const MAX_SUBSCRIBERS_PER_CHANNEL: usize = 100;

/// Per-subscriber buffer; a consumer this far behind starts losing frames.
const SUBSCRIBER_BUFFER: usize = 64;

/// Reserved channel that receives every message with its source attached.
pub const WILDCARD_CHANNEL: &str = "*";

/// A message as seen by subscribers and pollers.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelMessage {
    pub id: i64,
    pub channel: String,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub created_at: u64,
}

#[derive(Debug)]
struct SubscriberHandle {
    id: u64,
    tx: mpsc::Sender<ChannelMessage>,
}

#[derive(Default, Debug)]
struct Topic {
    subscribers: Vec<SubscriberHandle>,
    notify: Option<Arc<Notify>>,
}

/// The hub. One per daemon, shared behind an `Arc`.
#[derive(Default, Debug)]
pub struct FanoutHub {
    topics: Mutex<HashMap<String, Topic>>,
    next_id: AtomicU64,
}

/// A live subscription; receive with `rx`, drop to unsubscribe.
#[derive(Debug)]
pub struct Subscription {
    pub channel: String,
    pub rx: mpsc::Receiver<ChannelMessage>,
    id: u64,
    hub: Arc<FanoutHub>,
}

impl FanoutHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe to a channel (or [`WILDCARD_CHANNEL`] for everything).
    ///
    /// Takes the `Arc` so the returned handle can unsubscribe on drop.
    pub fn subscribe(hub: &Arc<Self>, channel: &str) -> Result<Subscription, DaemonError> {
        let mut topics = hub.topics.lock();

        let occupied = topics.values().filter(|t| !t.subscribers.is_empty()).count();
        let topic_exists = topics
            .get(channel)
            .is_some_and(|t| !t.subscribers.is_empty());
        if !topic_exists && occupied >= MAX_CHANNELS {
            return Err(DaemonError::SubscribeRejected(format!(
                "too many subscribed channels (max {MAX_CHANNELS})"
            )));
        }

        let topic = topics.entry(channel.to_string()).or_default();
        if topic.subscribers.len() >= MAX_SUBSCRIBERS_PER_CHANNEL {
            return Err(DaemonError::SubscribeRejected(format!(
                "too many subscribers on '{channel}' (max {MAX_SUBSCRIBERS_PER_CHANNEL})"
            )));
        }

        let id = hub.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        topic.subscribers.push(SubscriberHandle { id, tx });

        Ok(Subscription {
            channel: channel.to_string(),
            rx,
            id,
            hub: Arc::clone(hub),
        })
    }

    /// Fan a message out to its channel's subscribers and the wildcard
    /// channel, then wake long-pollers.
    pub fn publish(&self, message: &ChannelMessage) {
        let mut topics = self.topics.lock();

        for key in [message.channel.as_str(), WILDCARD_CHANNEL] {
            if let Some(topic) = topics.get_mut(key) {
                topic.subscribers.retain(|sub| {
                    match sub.tx.try_send(message.clone()) {
                        Ok(()) => true,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            // Slow consumer: drop this frame, keep the subscriber
                            debug!(channel = %message.channel, subscriber = sub.id, "dropping frame for slow subscriber");
                            true
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => false,
                    }
                });
            }
        }

        if let Some(topic) = topics.get(message.channel.as_str()) {
            if let Some(ref notify) = topic.notify {
                notify.notify_waiters();
            }
        }
    }

    /// The `Notify` long-pollers wait on for this channel.
    pub fn poll_signal(&self, channel: &str) -> Arc<Notify> {
        let mut topics = self.topics.lock();
        let topic = topics.entry(channel.to_string()).or_default();
        Arc::clone(topic.notify.get_or_insert_with(|| Arc::new(Notify::new())))
    }

    /// Number of channels with at least one live subscriber.
    pub fn subscribed_channels(&self) -> usize {
        self.topics
            .lock()
            .values()
            .filter(|t| !t.subscribers.is_empty())
            .count()
    }

    fn unsubscribe(&self, channel: &str, id: u64) {
        let mut topics = self.topics.lock();
        if let Some(topic) = topics.get_mut(channel) {
            topic.subscribers.retain(|sub| sub.id != id);
            if topic.subscribers.is_empty() && topic.notify.is_none() {
                topics.remove(channel);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.channel, self.id);
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
