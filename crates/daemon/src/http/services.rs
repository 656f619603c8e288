// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service / port allocator routes.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use pd_core::{Clock, DaemonError};
use pd_engine::ports::{ClaimOptions, FindFilters};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{caller, ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimBody {
    pub id: String,
    #[serde(default, alias = "port")]
    pub preferred_port: Option<u16>,
    #[serde(default)]
    pub range: Option<[u16; 2]>,
    /// Relative TTL in milliseconds.
    #[serde(default, alias = "expiresAfter")]
    pub expires: Option<u64>,
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub restart: Option<String>,
    #[serde(default)]
    pub health_url: Option<String>,
    #[serde(default)]
    pub pair: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub system_ports: Vec<u16>,
}

/// `POST /claim`
pub async fn claim<C: Clock>(
    State(state): State<AppState<C>>,
    headers: HeaderMap,
    Json(body): Json<ClaimBody>,
) -> Result<Json<Value>, ApiError> {
    let caller = caller(&headers);

    // Enforce the agent's service cap when the caller identifies itself
    // and is registered.
    if let Some(ref agent_id) = caller.agent_id {
        match state.engine.agents.can_claim_service(agent_id) {
            Ok(check) if !check.allowed => {
                return Err(DaemonError::ResourceLimit(format!(
                    "agent '{agent_id}' is at its service cap ({}/{})",
                    check.current, check.max
                ))
                .into());
            }
            _ => {}
        }
    }

    let opts = ClaimOptions {
        preferred_port: body.preferred_port,
        range: body.range.map(|[min, max]| (min, max)),
        expires_after_ms: body.expires,
        pid: body.pid.or(caller.pid),
        cmd: body.cmd,
        cwd: body.cwd,
        restart: body.restart,
        health_url: body.health_url,
        pair: body.pair,
        metadata: body.metadata,
        system_ports: body.system_ports,
        agent: caller.agent_id,
    };
    let claim = state.engine.ports.claim(&body.id, &opts)?;
    Ok(Json(json!({
        "success": true,
        "id": claim.service.identity,
        "port": claim.service.port,
        "status": claim.service.status,
        "existing": claim.existing,
        "message": if claim.existing {
            format!("refreshed existing claim on port {}", claim.service.port)
        } else {
            format!("assigned port {}", claim.service.port)
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct ReleaseBody {
    pub id: String,
}

/// `DELETE /release`. The id may be a wildcard pattern.
pub async fn release<C: Clock>(
    State(state): State<AppState<C>>,
    Json(body): Json<ReleaseBody>,
) -> Result<Json<Value>, ApiError> {
    let released = state.engine.ports.release(&body.id)?;
    Ok(Json(json!({
        "success": true,
        "released": released.released,
        "port": released.port,
        "message": format!("released {} service(s)", released.released),
    })))
}

/// `POST /ports/cleanup`: drop expired claims, returning what was freed.
pub async fn cleanup<C: Clock>(
    State(state): State<AppState<C>>,
) -> Result<Json<Value>, ApiError> {
    let freed = state.engine.ports.release_expired()?;
    let freed: Vec<Value> = freed
        .into_iter()
        .map(|(identity, port)| json!({ "id": identity, "port": port }))
        .collect();
    Ok(Json(json!({ "success": true, "freed": freed })))
}

#[derive(Debug, Default, Deserialize)]
pub struct FindQuery {
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub expired: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /services`
pub async fn list<C: Clock>(
    State(state): State<AppState<C>>,
    Query(query): Query<FindQuery>,
) -> Result<Json<Value>, ApiError> {
    let filters = FindFilters {
        status: query.status,
        port: query.port,
        expired: query.expired,
        limit: query.limit,
    };
    let services = state
        .engine
        .ports
        .find(query.pattern.as_deref().unwrap_or("*"), &filters)?;
    Ok(Json(json!({ "services": services })))
}

/// `GET /services/{id}`
pub async fn detail<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let service = state.engine.ports.get(&id)?;
    Ok(Json(serde_json::to_value(service).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

/// `PUT /services/{id}/status`
pub async fn set_status<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> Result<Json<Value>, ApiError> {
    state.engine.ports.set_status(&id, &body.status)?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct EndpointBody {
    pub url: String,
}

/// `PUT /services/{id}/endpoints/{env}`
pub async fn set_endpoint<C: Clock>(
    State(state): State<AppState<C>>,
    Path((id, env)): Path<(String, String)>,
    Json(body): Json<EndpointBody>,
) -> Result<Json<Value>, ApiError> {
    state.engine.ports.set_endpoint(&id, &env, &body.url)?;
    Ok(Json(json!({ "success": true })))
}

/// `GET /projects`
pub async fn projects<C: Clock>(
    State(state): State<AppState<C>>,
) -> Result<Json<Value>, ApiError> {
    let projects: Vec<Value> = state
        .engine
        .ports
        .projects()?
        .into_iter()
        .map(|(name, last_seen)| json!({ "name": name, "lastSeen": last_seen }))
        .collect();
    Ok(Json(json!({ "projects": projects })))
}
