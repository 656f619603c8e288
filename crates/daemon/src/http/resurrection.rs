// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resurrection queue routes.

use axum::extract::{Path, Query, State};
use axum::Json;
use pd_core::{Clock, DaemonError};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /resurrection`
pub async fn list<C: Clock>(
    State(state): State<AppState<C>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let entries = state.engine.resurrection.list(
        query.project.as_deref(),
        query.stack.as_deref(),
        query.status.as_deref(),
        query.limit,
    )?;
    Ok(Json(json!({ "entries": entries })))
}

/// `GET /resurrection/pending`
pub async fn pending<C: Clock>(
    State(state): State<AppState<C>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let entries = state.engine.resurrection.list(
        query.project.as_deref(),
        query.stack.as_deref(),
        Some("pending"),
        query.limit,
    )?;
    Ok(Json(json!({ "entries": entries })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimBody {
    pub new_agent_id: String,
}

/// `POST /resurrection/claim/{id}`
pub async fn claim<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Json(body): Json<ClaimBody>,
) -> Result<Json<Value>, ApiError> {
    let context = state.engine.resurrection.claim(&id, &body.new_agent_id)?;
    Ok(Json(json!({ "success": true, "context": context })))
}

/// `POST /resurrection/complete/{id}`
pub async fn complete<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    body: Option<Json<ClaimBody>>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.ok_or_else(|| {
        ApiError(DaemonError::InvalidArgument("newAgentId is required".into()))
    })?;
    state.engine.resurrection.complete(&id, &body.new_agent_id)?;
    Ok(Json(json!({ "success": true })))
}

/// `POST /resurrection/abandon/{id}`
pub async fn abandon<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.resurrection.abandon(&id)?;
    Ok(Json(json!({ "success": true })))
}

/// `DELETE /resurrection/{id}`
pub async fn dismiss<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.resurrection.dismiss(&id)?;
    Ok(Json(json!({ "success": true })))
}
