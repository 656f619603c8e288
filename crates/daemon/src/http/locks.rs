// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock manager routes.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use pd_core::{Clock, DaemonError};
use pd_engine::locks::AcquireOptions;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{caller, ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquireBody {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(default, alias = "ttl")]
    pub ttl_ms: Option<f64>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// `POST /locks/{name}`
pub async fn acquire<C: Clock>(
    State(state): State<AppState<C>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Option<Json<AcquireBody>>,
) -> Result<Json<Value>, ApiError> {
    let caller = caller(&headers);
    let Json(body) = body.unwrap_or_default();

    // Default the owner to the calling agent; enforce its lock cap when
    // it is registered.
    let owner = body.owner.clone().or_else(|| caller.agent_id.clone());
    if let Some(ref agent_id) = caller.agent_id {
        if owner.as_deref() == Some(agent_id.as_str()) {
            match state.engine.agents.can_acquire_lock(agent_id) {
                Ok(check) if !check.allowed => {
                    return Err(DaemonError::ResourceLimit(format!(
                        "agent '{agent_id}' is at its lock cap ({}/{})",
                        check.current, check.max
                    ))
                    .into());
                }
                _ => {}
            }
        }
    }

    let lock = state.engine.locks.acquire(
        &name,
        &AcquireOptions {
            owner,
            pid: body.pid.or(caller.pid),
            ttl_ms: body.ttl_ms,
            metadata: body.metadata,
        },
    )?;
    Ok(Json(json!({
        "success": true,
        "name": lock.name,
        "owner": lock.owner,
        "acquiredAt": lock.acquired_at,
        "expiresAt": lock.expires_at,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReleaseBody {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub force: bool,
}

/// `DELETE /locks/{name}`
pub async fn release<C: Clock>(
    State(state): State<AppState<C>>,
    Path(name): Path<String>,
    body: Option<Json<ReleaseBody>>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.unwrap_or_default();
    let outcome = state
        .engine
        .locks
        .release(&name, body.owner.as_deref(), body.force)?;
    Ok(Json(json!({ "success": true, "released": outcome.released })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendBody {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default, alias = "ttl")]
    pub ttl_ms: Option<f64>,
}

/// `PUT /locks/{name}`
pub async fn extend<C: Clock>(
    State(state): State<AppState<C>>,
    Path(name): Path<String>,
    body: Option<Json<ExtendBody>>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.unwrap_or_default();
    let lock = state
        .engine
        .locks
        .extend(&name, body.owner.as_deref(), body.ttl_ms)?;
    Ok(Json(json!({
        "success": true,
        "name": lock.name,
        "owner": lock.owner,
        "expiresAt": lock.expires_at,
    })))
}

/// `GET /locks/{name}`
pub async fn check<C: Clock>(
    State(state): State<AppState<C>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.engine.locks.check(&name)? {
        Some(lock) => Ok(Json(json!({ "held": true, "lock": lock }))),
        None => Ok(Json(json!({ "held": false }))),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub owner: Option<String>,
}

/// `GET /locks`
pub async fn list<C: Clock>(
    State(state): State<AppState<C>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let locks = state.engine.locks.list(query.owner.as_deref())?;
    Ok(Json(json!({ "locks": locks })))
}
