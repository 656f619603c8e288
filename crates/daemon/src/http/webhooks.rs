// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Webhook registry routes.

use axum::extract::{Path, Query, State};
use axum::Json;
use pd_core::Clock;
use pd_engine::webhooks::WebhookSpec;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct WebhookBody {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub events: Option<Vec<String>>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl WebhookBody {
    fn spec(&self) -> WebhookSpec {
        WebhookSpec {
            url: self.url.clone(),
            secret: self.secret.clone(),
            events: self.events.clone(),
            filter: self.filter.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// `POST /webhooks`
pub async fn register<C: Clock>(
    State(state): State<AppState<C>>,
    Json(body): Json<WebhookBody>,
) -> Result<Json<Value>, ApiError> {
    let webhook = state.engine.webhooks.register(&body.spec())?;
    Ok(Json(json!({ "success": true, "webhook": webhook })))
}

/// `GET /webhooks`
pub async fn list<C: Clock>(State(state): State<AppState<C>>) -> Result<Json<Value>, ApiError> {
    let webhooks = state.engine.webhooks.list()?;
    Ok(Json(json!({ "webhooks": webhooks })))
}

/// `GET /webhooks/{id}`
pub async fn detail<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let webhook = state.engine.webhooks.get(&id)?;
    Ok(Json(serde_json::to_value(webhook).unwrap_or_default()))
}

/// `PUT /webhooks/{id}`
pub async fn update<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Json(body): Json<WebhookBody>,
) -> Result<Json<Value>, ApiError> {
    let webhook = state.engine.webhooks.update(&id, &body.spec(), body.active)?;
    Ok(Json(json!({ "success": true, "webhook": webhook })))
}

/// `DELETE /webhooks/{id}`
pub async fn remove<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.webhooks.delete(&id)?;
    Ok(Json(json!({ "success": true })))
}

/// `POST /webhooks/{id}/test`
pub async fn test<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let delivery_id = state.engine.webhooks.test(&id)?;
    Ok(Json(json!({ "success": true, "deliveryId": delivery_id })))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeliveriesQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /webhooks/{id}/deliveries`
pub async fn deliveries<C: Clock>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Query(query): Query<DeliveriesQuery>,
) -> Result<Json<Value>, ApiError> {
    let deliveries = state.engine.webhooks.deliveries(&id, query.limit)?;
    Ok(Json(json!({ "deliveries": deliveries })))
}
