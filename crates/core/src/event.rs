// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon event types.
//!
//! Every state-changing operation emits one of these. Events feed the
//! activity log and the webhook dispatcher; `name()` is the dotted event
//! name webhook subscriptions match against, `target_id()` the value their
//! filter pattern is applied to.

use serde::Serialize;
use serde_json::Value;

/// A state change observed by the daemon.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Event {
    ServiceClaim {
        identity: String,
        port: u16,
        existing: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },
    ServiceRelease {
        identity: String,
        port: u16,
    },
    ServiceStatus {
        identity: String,
        status: String,
    },
    LockAcquire {
        name: String,
        owner: String,
    },
    LockRelease {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
    },
    LockExpire {
        name: String,
    },
    MessagePublish {
        channel: String,
        id: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    AgentRegister {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        project: Option<String>,
    },
    AgentUnregister {
        id: String,
    },
    AgentStale {
        id: String,
    },
    AgentDead {
        id: String,
    },
    SessionStart {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },
    SessionEnd {
        id: String,
        status: String,
    },
    ResurrectionClaim {
        agent_id: String,
        new_agent_id: String,
    },
    ResurrectionComplete {
        agent_id: String,
    },
    DaemonStart {
        pid: u32,
    },
    DaemonStop {
        pid: u32,
    },
}

impl Event {
    /// Dotted event name, matched by webhook event subscriptions.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ServiceClaim { .. } => "service.claim",
            Self::ServiceRelease { .. } => "service.release",
            Self::ServiceStatus { .. } => "service.status",
            Self::LockAcquire { .. } => "lock.acquire",
            Self::LockRelease { .. } => "lock.release",
            Self::LockExpire { .. } => "lock.expire",
            Self::MessagePublish { .. } => "message.publish",
            Self::AgentRegister { .. } => "agent.register",
            Self::AgentUnregister { .. } => "agent.unregister",
            Self::AgentStale { .. } => "agent.stale",
            Self::AgentDead { .. } => "agent.dead",
            Self::SessionStart { .. } => "session.start",
            Self::SessionEnd { .. } => "session.end",
            Self::ResurrectionClaim { .. } => "resurrection.claim",
            Self::ResurrectionComplete { .. } => "resurrection.complete",
            Self::DaemonStart { .. } => "daemon.start",
            Self::DaemonStop { .. } => "daemon.stop",
        }
    }

    /// The entity the event is about, if any. Webhook filter patterns
    /// glob-match against this value.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            Self::ServiceClaim { identity, .. }
            | Self::ServiceRelease { identity, .. }
            | Self::ServiceStatus { identity, .. } => Some(identity),
            Self::LockAcquire { name, .. }
            | Self::LockRelease { name, .. }
            | Self::LockExpire { name } => Some(name),
            Self::MessagePublish { channel, .. } => Some(channel),
            Self::AgentRegister { id, .. }
            | Self::AgentUnregister { id }
            | Self::AgentStale { id }
            | Self::AgentDead { id } => Some(id),
            Self::SessionStart { id, .. } | Self::SessionEnd { id, .. } => Some(id),
            Self::ResurrectionClaim { agent_id, .. }
            | Self::ResurrectionComplete { agent_id } => Some(agent_id),
            Self::DaemonStart { .. } | Self::DaemonStop { .. } => None,
        }
    }

    /// Agent attribution for the activity log, when the event has one.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::ServiceClaim { agent, .. } => agent.as_deref(),
            Self::AgentRegister { id, .. }
            | Self::AgentUnregister { id }
            | Self::AgentStale { id }
            | Self::AgentDead { id } => Some(id),
            Self::SessionStart { agent, .. } => agent.as_deref(),
            Self::ResurrectionClaim { new_agent_id, .. } => Some(new_agent_id),
            _ => None,
        }
    }

    /// Event payload as JSON, used for webhook bodies and activity metadata.
    pub fn data(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
