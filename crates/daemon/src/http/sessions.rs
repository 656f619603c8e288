// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session, note, and file-claim routes.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use pd_core::Clock;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{caller, ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBody {
    pub purpose: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// `POST /sessions`
pub async fn start<C: Clock>(
    State(state): State<AppState<C>>,
    headers: HeaderMap,
    Json(body): Json<StartBody>,
) -> Result<Json<Value>, ApiError> {
    let agent_id = body.agent_id.or_else(|| caller(&headers).agent_id);
    let (session, conflicts) = state.engine.sessions.start(
        &body.purpose,
        agent_id.as_deref(),
        &body.files,
        body.metadata,
    )?;
    Ok(Json(json!({
        "success": true,
        "session": session,
        "conflicts": conflicts,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /sessions`
pub async fn list<C: Clock>(
    State(state): State<AppState<C>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let sessions = state.engine.sessions.list(
        query.agent.as_deref(),
        query.status.as_deref(),
        query.limit,
    )?;
    Ok(Json(json!({ "sessions": sessions })))
}

/// `GET /sessions/{id}`
pub async fn detail<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let detail = state.engine.sessions.get(&id)?;
    Ok(Json(serde_json::to_value(detail).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndBody {
    pub status: String,
    #[serde(default)]
    pub handoff_note: Option<String>,
}

/// `PUT /sessions/{id}`: end the session.
pub async fn end<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Json(body): Json<EndBody>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .engine
        .sessions
        .end(&id, &body.status, body.handoff_note.as_deref())?;
    Ok(Json(json!({ "success": true, "session": session })))
}

/// `DELETE /sessions/{id}`
pub async fn delete<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.sessions.delete(&id)?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteBody {
    pub content: String,
    #[serde(default, rename = "type")]
    pub note_type: Option<String>,
}

/// `POST /sessions/{id}/notes`
pub async fn add_note<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Json(body): Json<NoteBody>,
) -> Result<Json<Value>, ApiError> {
    let note = state
        .engine
        .sessions
        .add_note(&id, &body.content, body.note_type.as_deref())?;
    Ok(Json(json!({ "success": true, "note": note })))
}

#[derive(Debug, Default, Deserialize)]
pub struct FilesBody {
    #[serde(default)]
    pub paths: Vec<String>,
}

/// `POST /sessions/{id}/files`
pub async fn claim_files<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Json(body): Json<FilesBody>,
) -> Result<Json<Value>, ApiError> {
    let conflicts = state.engine.sessions.claim_files(&id, &body.paths)?;
    Ok(Json(json!({ "success": true, "conflicts": conflicts })))
}

/// `DELETE /sessions/{id}/files`. An empty `paths` releases everything.
pub async fn release_files<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    body: Option<Json<FilesBody>>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.unwrap_or_default();
    let released = state.engine.sessions.release_files(&id, &body.paths)?;
    Ok(Json(json!({ "success": true, "released": released })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickNoteBody {
    pub content: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default, rename = "type")]
    pub note_type: Option<String>,
}

/// `POST /sessions/quick-note`
pub async fn quick_note<C: Clock>(
    State(state): State<AppState<C>>,
    headers: HeaderMap,
    Json(body): Json<QuickNoteBody>,
) -> Result<Json<Value>, ApiError> {
    let agent_id = body.agent_id.or_else(|| caller(&headers).agent_id);
    let (session_id, note, created) = state.engine.sessions.quick_note(
        agent_id.as_deref(),
        &body.content,
        body.note_type.as_deref(),
    )?;
    Ok(Json(json!({
        "success": true,
        "sessionId": session_id,
        "note": note,
        "createdSession": created,
    })))
}
