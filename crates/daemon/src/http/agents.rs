// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent registry and inbox routes.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use pd_core::Clock;
use pd_engine::agents::RegisterAgent;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{caller, ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(default, rename = "type")]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub worktree: Option<String>,
    #[serde(default)]
    pub max_services: Option<i64>,
    #[serde(default)]
    pub max_locks: Option<i64>,
}

/// `POST /agents`
pub async fn register<C: Clock>(
    State(state): State<AppState<C>>,
    headers: HeaderMap,
    Json(body): Json<RegisterBody>,
) -> Result<Json<Value>, ApiError> {
    let pid = body.pid.or_else(|| caller(&headers).pid);
    let (agent, hint) = state.engine.agents.register(&RegisterAgent {
        id: body.id,
        name: body.name,
        pid,
        agent_type: body.agent_type,
        identity: body.identity,
        purpose: body.purpose,
        worktree: body.worktree,
        max_services: body.max_services,
        max_locks: body.max_locks,
    })?;
    Ok(Json(json!({
        "success": true,
        "agent": agent,
        "salvageHint": {
            "staleCount": hint.stale_count,
            "pendingCount": hint.pending_count,
        },
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// `GET /agents`
pub async fn list<C: Clock>(
    State(state): State<AppState<C>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let agents = state
        .engine
        .agents
        .list(query.project.as_deref(), query.active.unwrap_or(false))?;
    Ok(Json(json!({ "agents": agents })))
}

/// `GET /agents/{id}`
pub async fn detail<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let agent = state.engine.agents.get(&id)?;
    Ok(Json(serde_json::to_value(agent).unwrap_or_default()))
}

/// `DELETE /agents/{id}`
pub async fn unregister<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.agents.unregister(&id)?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Default, Deserialize)]
pub struct HeartbeatBody {
    #[serde(default)]
    pub pid: Option<i64>,
}

/// `POST /agents/{id}/heartbeat`
pub async fn heartbeat<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<HeartbeatBody>>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.unwrap_or_default();
    let pid = body.pid.or_else(|| caller(&headers).pid);
    let agent = state.engine.agents.heartbeat(&id, pid)?;
    Ok(Json(json!({
        "success": true,
        "lastHeartbeat": agent.last_heartbeat,
        "active": agent.active,
    })))
}

/// `GET /agents/{id}/caps`
pub async fn caps<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let services = state.engine.agents.can_claim_service(&id)?;
    let locks = state.engine.agents.can_acquire_lock(&id)?;
    Ok(Json(json!({ "services": services, "locks": locks })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxSendBody {
    pub content: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default, rename = "type")]
    pub msg_type: Option<String>,
}

/// `POST /agents/{id}/inbox`
pub async fn inbox_send<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<InboxSendBody>,
) -> Result<Json<Value>, ApiError> {
    let sender = body.sender.or_else(|| caller(&headers).agent_id);
    let message_id = state.engine.inbox.send(
        &id,
        sender.as_deref(),
        &body.content,
        body.msg_type.as_deref(),
    )?;
    Ok(Json(json!({ "success": true, "id": message_id })))
}

#[derive(Debug, Default, Deserialize)]
pub struct InboxListQuery {
    #[serde(default)]
    pub unread: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /agents/{id}/inbox`
pub async fn inbox_list<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Query(query): Query<InboxListQuery>,
) -> Result<Json<Value>, ApiError> {
    let messages = state
        .engine
        .inbox
        .list(&id, query.unread.unwrap_or(false), query.limit)?;
    let unread = state.engine.inbox.unread_count(&id)?;
    Ok(Json(json!({ "messages": messages, "unread": unread })))
}

/// `PUT /agents/{id}/inbox/read`
pub async fn inbox_mark_read<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let marked = state.engine.inbox.mark_read(&id)?;
    Ok(Json(json!({ "success": true, "marked": marked })))
}
