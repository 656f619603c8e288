// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport: one axum router served on both the Unix socket and
//! the loopback TCP listener.
//!
//! Handlers are stateless dispatchers over the engine. Non-streaming
//! routes sit behind a 5 s timeout layer; long-poll and SSE manage their
//! own deadlines. Local-only policy: no CORS layer, no auth; the socket
//! permissions and loopback bind are the boundary.

mod agents;
mod locks;
mod messages;
mod resurrection;
mod services;
mod sessions;
mod system;
mod webhooks;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use pd_core::{Clock, DaemonError};
use pd_engine::Engine;
use serde_json::json;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Per-request timeout for plain JSON routes.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state for all handlers.
pub struct AppState<C: Clock> {
    pub engine: Arc<Engine<C>>,
    pub start_time: Instant,
    pub version: &'static str,
}

impl<C: Clock> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            start_time: self.start_time,
            version: self.version,
        }
    }
}

/// Caller identity hints carried in headers.
#[derive(Debug, Default, Clone)]
pub struct Caller {
    pub agent_id: Option<String>,
    pub pid: Option<i64>,
}

/// Extract `X-Agent-Id` / `X-Pid` hints.
pub fn caller(headers: &HeaderMap) -> Caller {
    Caller {
        agent_id: headers
            .get("x-agent-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        pid: headers
            .get("x-pid")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()),
    }
}

/// Error wrapper mapping the domain taxonomy to `{error, code}` JSON.
pub struct ApiError(pub DaemonError);

impl From<DaemonError> for ApiError {
    fn from(err: DaemonError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        (status, Json(body)).into_response()
    }
}

/// Build the full router.
pub fn build_router<C: Clock>(state: AppState<C>) -> Router {
    let api = Router::new()
        // services / ports
        .route("/claim", post(services::claim))
        .route("/release", delete(services::release))
        .route("/ports/cleanup", post(services::cleanup))
        .route("/services", get(services::list))
        .route("/services/{id}", get(services::detail))
        .route("/services/{id}/status", put(services::set_status))
        .route("/services/{id}/endpoints/{env}", put(services::set_endpoint))
        .route("/projects", get(services::projects))
        // locks
        .route("/locks", get(locks::list))
        .route(
            "/locks/{name}",
            post(locks::acquire)
                .get(locks::check)
                .put(locks::extend)
                .delete(locks::release),
        )
        // messages (non-streaming)
        .route("/msg/{channel}", post(messages::publish).get(messages::list).delete(messages::clear))
        .route("/channels", get(messages::channels))
        // agents
        .route("/agents", post(agents::register).get(agents::list))
        .route("/agents/{id}", get(agents::detail).delete(agents::unregister))
        .route("/agents/{id}/heartbeat", post(agents::heartbeat))
        .route("/agents/{id}/caps", get(agents::caps))
        .route("/agents/{id}/inbox", post(agents::inbox_send).get(agents::inbox_list))
        .route("/agents/{id}/inbox/read", put(agents::inbox_mark_read))
        // sessions
        .route("/sessions", post(sessions::start).get(sessions::list))
        .route("/sessions/quick-note", post(sessions::quick_note))
        .route(
            "/sessions/{id}",
            get(sessions::detail).put(sessions::end).delete(sessions::delete),
        )
        .route("/sessions/{id}/notes", post(sessions::add_note))
        .route(
            "/sessions/{id}/files",
            post(sessions::claim_files).delete(sessions::release_files),
        )
        // resurrection
        .route("/resurrection", get(resurrection::list))
        .route("/resurrection/pending", get(resurrection::pending))
        .route("/resurrection/claim/{id}", post(resurrection::claim))
        .route("/resurrection/complete/{id}", post(resurrection::complete))
        .route("/resurrection/abandon/{id}", post(resurrection::abandon))
        .route("/resurrection/{id}", delete(resurrection::dismiss))
        // webhooks
        .route("/webhooks", post(webhooks::register).get(webhooks::list))
        .route(
            "/webhooks/{id}",
            get(webhooks::detail).put(webhooks::update).delete(webhooks::remove),
        )
        .route("/webhooks/{id}/test", post(webhooks::test))
        .route("/webhooks/{id}/deliveries", get(webhooks::deliveries))
        // activity + system
        .route("/activity", get(system::activity_recent))
        .route("/activity/range", get(system::activity_range))
        .route("/activity/summary", get(system::activity_summary))
        .route("/health", get(system::health))
        .route("/version", get(system::version))
        .route("/metrics", get(system::metrics))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    // Long-poll and SSE hold the connection past the request timeout.
    let streaming = Router::new()
        .route("/msg/{channel}/poll", get(messages::poll))
        .route("/msg/{channel}/subscribe", get(messages::subscribe));

    api.merge(streaming)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState<pd_core::FakeClock> {
    use pd_engine::EngineConfig;
    #[allow(clippy::unwrap_used)]
    let store = pd_storage::Store::open_in_memory().unwrap();
    let (engine, _dispatcher) = Engine::new(
        store,
        EngineConfig {
            allow_private_webhooks: true,
            ..EngineConfig::default()
        },
        pd_core::FakeClock::new(),
    );
    AppState {
        engine: Arc::new(engine),
        start_time: Instant::now(),
        version: crate::VERSION,
    }
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
