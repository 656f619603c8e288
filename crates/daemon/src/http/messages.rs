// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pub/sub routes: publish, history, long-poll, SSE.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::{self, Stream, StreamExt};
use pd_core::Clock;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{caller, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct PublishBody {
    pub payload: Value,
    #[serde(default)]
    pub sender: Option<String>,
    /// Relative TTL in milliseconds.
    #[serde(default)]
    pub expires: Option<u64>,
}

/// `POST /msg/{channel}`
pub async fn publish<C: Clock>(
    State(state): State<AppState<C>>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PublishBody>,
) -> Result<Json<Value>, ApiError> {
    let sender = body.sender.or_else(|| caller(&headers).agent_id);
    let id = state
        .engine
        .broker
        .publish(&channel, body.payload, sender, body.expires)?;
    Ok(Json(json!({ "success": true, "id": id })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub after: Option<i64>,
}

/// `GET /msg/{channel}`
pub async fn list<C: Clock>(
    State(state): State<AppState<C>>,
    Path(channel): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let messages = state
        .engine
        .broker
        .get_messages(&channel, query.limit, query.after)?;
    Ok(Json(json!({ "messages": messages })))
}

/// `DELETE /msg/{channel}`
pub async fn clear<C: Clock>(
    State(state): State<AppState<C>>,
    Path(channel): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let cleared = state.engine.broker.clear(&channel)?;
    Ok(Json(json!({ "success": true, "cleared": cleared })))
}

/// `GET /channels`
pub async fn channels<C: Clock>(
    State(state): State<AppState<C>>,
) -> Result<Json<Value>, ApiError> {
    let channels = state.engine.broker.list_channels()?;
    Ok(Json(json!({ "channels": channels })))
}

#[derive(Debug, Default, Deserialize)]
pub struct PollQuery {
    #[serde(default)]
    pub after: Option<i64>,
    /// Milliseconds to wait; capped at 30 s.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// `GET /msg/{channel}/poll`: long-poll for the first message after `after`.
pub async fn poll<C: Clock>(
    State(state): State<AppState<C>>,
    Path(channel): Path<String>,
    Query(query): Query<PollQuery>,
) -> Result<Json<Value>, ApiError> {
    let message = state
        .engine
        .broker
        .long_poll(
            &channel,
            query.after.unwrap_or(0),
            query.timeout.unwrap_or(5000),
        )
        .await?;
    Ok(Json(json!({ "message": message })))
}

/// `GET /msg/{channel}/subscribe`: the SSE feed.
///
/// Emits `event: connected` on open, then one `data:` frame per message.
pub async fn subscribe<C: Clock>(
    State(state): State<AppState<C>>,
    Path(channel): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let subscription = state.engine.broker.subscribe(&channel)?;

    let connected = stream::once(async {
        Ok(SseEvent::default().event("connected").data("{}"))
    });
    let messages = stream::unfold(subscription, |mut subscription| async move {
        let message = subscription.rx.recv().await?;
        let event = SseEvent::default()
            .json_data(&message)
            .unwrap_or_else(|_| SseEvent::default().data("null"));
        Some((Ok(event), subscription))
    });

    Ok(Sse::new(connected.chain(messages)).keep_alive(KeepAlive::default()))
}
