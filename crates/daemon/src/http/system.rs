// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health, version, metrics, and activity routes.

use axum::extract::{Query, State};
use axum::Json;
use pd_core::{Clock, DaemonError};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, AppState};

/// `GET /health`
pub async fn health<C: Clock>(State(state): State<AppState<C>>) -> Result<Json<Value>, ApiError> {
    let active_ports = state.engine.ports.count()?;
    Ok(Json(json!({
        "status": "ok",
        "version": state.version,
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "active_ports": active_ports,
        "pid": std::process::id(),
    })))
}

/// `GET /version`
pub async fn version<C: Clock>(State(state): State<AppState<C>>) -> Json<Value> {
    Json(json!({
        "name": "port-daddy",
        "version": state.version,
        "pid": std::process::id(),
    }))
}

/// `GET /metrics`
pub async fn metrics<C: Clock>(State(state): State<AppState<C>>) -> Result<Json<Value>, ApiError> {
    let engine = &state.engine;
    let (webhooks, delivery_backlog) = engine.webhooks.counts()?;
    Ok(Json(json!({
        "services": engine.ports.count()?,
        "locks": engine.locks.count()?,
        "agents": engine.agents.count()?,
        "messages": engine.broker.count()?,
        "subscribed_channels": engine.hub.subscribed_channels(),
        "webhooks": webhooks,
        "delivery_backlog": delivery_backlog,
        "delivery_overflows": engine.webhooks.overflow_count(),
        "activity_entries": engine.activity.count()?,
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
}

/// `GET /activity`
pub async fn activity_recent<C: Clock>(
    State(state): State<AppState<C>>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Value>, ApiError> {
    let entries = state
        .engine
        .activity
        .get_recent(query.limit, query.event_type.as_deref())?;
    Ok(Json(json!({ "entries": entries })))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: u64,
    pub to: u64,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /activity/range`
pub async fn activity_range<C: Clock>(
    State(state): State<AppState<C>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Value>, ApiError> {
    if query.from > query.to {
        return Err(DaemonError::InvalidArgument("from is after to".into()).into());
    }
    let entries = state
        .engine
        .activity
        .get_by_time_range(query.from, query.to, query.limit)?;
    Ok(Json(json!({ "entries": entries })))
}

/// `GET /activity/summary`
pub async fn activity_summary<C: Clock>(
    State(state): State<AppState<C>>,
) -> Result<Json<Value>, ApiError> {
    let summary = state.engine.activity.get_summary()?;
    Ok(Json(serde_json::to_value(summary).unwrap_or_default()))
}
