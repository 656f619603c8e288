// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// Store file: `PORT_DADDY_DB` > `./port-registry.db`.
pub fn db_path() -> PathBuf {
    match std::env::var("PORT_DADDY_DB") {
        Ok(path) => PathBuf::from(path),
        Err(_) => PathBuf::from("./port-registry.db"),
    }
}

/// Unix socket: `PORT_DADDY_SOCKET` > `/tmp/port-daddy.sock`.
pub fn socket_path() -> PathBuf {
    match std::env::var("PORT_DADDY_SOCKET") {
        Ok(path) => PathBuf::from(path),
        Err(_) => PathBuf::from("/tmp/port-daddy.sock"),
    }
}

/// Loopback HTTP port: `PORT_DADDY_PORT` > 9876.
pub fn http_port() -> u16 {
    std::env::var("PORT_DADDY_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9876)
}

/// State directory (pid file, daemon log):
/// `PORT_DADDY_STATE_DIR` > `$XDG_STATE_HOME/port-daddy` > `~/.local/state/port-daddy`.
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("PORT_DADDY_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("port-daddy"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/port-daddy"))
}

/// Janitor tick override (`PORT_DADDY_SWEEP_MS`, default 5 s).
pub fn sweep_interval() -> Duration {
    ms_var("PORT_DADDY_SWEEP_MS").unwrap_or(Duration::from_secs(5))
}

/// Active-agent cutoff override (`PORT_DADDY_AGENT_TTL_MS`).
pub fn agent_ttl_ms() -> Option<u64> {
    u64_var("PORT_DADDY_AGENT_TTL_MS")
}

/// Stale threshold override (`PORT_DADDY_STALE_AFTER_MS`).
pub fn stale_after_ms() -> Option<u64> {
    u64_var("PORT_DADDY_STALE_AFTER_MS")
}

/// Dead threshold override (`PORT_DADDY_DEAD_AFTER_MS`).
pub fn dead_after_ms() -> Option<u64> {
    u64_var("PORT_DADDY_DEAD_AFTER_MS")
}

/// Disable the webhook SSRF guard (`PORT_DADDY_ALLOW_PRIVATE_WEBHOOKS=1`).
/// For local integration testing only.
pub fn allow_private_webhooks() -> bool {
    std::env::var("PORT_DADDY_ALLOW_PRIVATE_WEBHOOKS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn u64_var(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn ms_var(name: &str) -> Option<Duration> {
    u64_var(name).map(Duration::from_millis)
}
