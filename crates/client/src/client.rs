// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON client over TCP (reqwest) or the Unix socket (hyper http1).

use std::path::Path;
use std::time::{Duration, Instant};

use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::UnixStream;

use crate::endpoint::Endpoint;

/// Timeout for one request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(35);

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("connection error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request timed out")]
    Timeout,

    #[error("daemon error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
}

impl ClientError {
    /// The daemon's error code, when this is an API error.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// The client.
pub struct PdClient {
    endpoint: Endpoint,
    http: reqwest::Client,
    agent_id: Option<String>,
}

impl PdClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            agent_id: None,
        }
    }

    /// Attach an `X-Agent-Id` identity hint to every request.
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub async fn get(&self, path: &str) -> Result<Value, ClientError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str, body: Option<Value>) -> Result<Value, ClientError> {
        self.request(Method::DELETE, path, body).await
    }

    /// One JSON request; non-2xx responses become [`ClientError::Api`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let (status, value) = match &self.endpoint {
            Endpoint::Http(base) => self.request_tcp(base, method, path, body).await?,
            Endpoint::Socket(socket) => {
                let fut = self.request_socket(socket, method, path, body);
                tokio::time::timeout(REQUEST_TIMEOUT, fut)
                    .await
                    .map_err(|_| ClientError::Timeout)??
            }
        };

        if (200..300).contains(&status) {
            Ok(value)
        } else {
            Err(ClientError::Api {
                status,
                code: value
                    .get("code")
                    .and_then(|c| c.as_str())
                    .map(String::from),
                message: value
                    .get("error")
                    .and_then(|e| e.as_str())
                    .unwrap_or("unknown error")
                    .to_string(),
            })
        }
    }

    async fn request_tcp(
        &self,
        base: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<(u16, Value), ClientError> {
        let mut builder = self.http.request(method, format!("{base}{path}"));
        if let Some(ref agent_id) = self.agent_id {
            builder = builder.header("X-Agent-Id", agent_id);
        }
        builder = builder.header("X-Pid", std::process::id().to_string());
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        Ok((status, parse_body(&bytes)?))
    }

    async fn request_socket(
        &self,
        socket: &Path,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<(u16, Value), ClientError> {
        let stream = UnixStream::connect(socket).await?;
        let io = TokioIo::new(stream);
        let (mut sender, connection) = hyper::client::conn::http1::handshake(io).await?;
        tokio::spawn(async move {
            // Connection task ends when the request completes
            let _ = connection.await;
        });

        let payload = match body {
            Some(body) => Bytes::from(body.to_string()),
            None => Bytes::new(),
        };
        let mut request = Request::builder()
            .method(method)
            .uri(path)
            .header(http::header::HOST, "localhost")
            .header(http::header::CONTENT_TYPE, "application/json")
            .header("X-Pid", std::process::id().to_string());
        if let Some(ref agent_id) = self.agent_id {
            request = request.header("X-Agent-Id", agent_id);
        }
        let request = request.body(Full::new(payload))?;

        let response = sender.send_request(request).await?;
        let status = response.status().as_u16();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?
            .to_bytes();
        Ok((status, parse_body(&bytes)?))
    }

    /// Acquire a lock, retrying on `LockHeld` every `interval` until
    /// `deadline` has elapsed. Exhaustion becomes [`ClientError::Timeout`].
    pub async fn lock_with_retry(
        &self,
        name: &str,
        body: Value,
        interval: Duration,
        deadline: Duration,
    ) -> Result<Value, ClientError> {
        let started = Instant::now();
        loop {
            match self.post(&format!("/locks/{name}"), body.clone()).await {
                Err(ClientError::Api { ref code, .. }) if code.as_deref() == Some("LockHeld") => {
                    if started.elapsed() + interval > deadline {
                        return Err(ClientError::Timeout);
                    }
                    tokio::time::sleep(interval).await;
                }
                other => return other,
            }
        }
    }
}

fn parse_body(bytes: &[u8]) -> Result<Value, ClientError> {
    if bytes.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_slice(bytes)
        .map_err(|e| ClientError::InvalidResponse(format!("invalid JSON from daemon: {e}")))
}
