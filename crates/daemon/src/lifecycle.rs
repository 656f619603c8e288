// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, single-instance lock.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use pd_core::{Event, SystemClock};
use pd_engine::{Dispatcher, Engine, EngineConfig};
use pd_storage::Store;
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tracing::{info, warn};

use crate::env;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (pid file, daemon log)
    pub state_dir: PathBuf,
    /// Path to the store file
    pub db_path: PathBuf,
    /// Path to Unix socket
    pub socket_path: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    /// Loopback HTTP port
    pub http_port: u16,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = env::state_dir()?;
        Ok(Self {
            db_path: env::db_path(),
            socket_path: env::socket_path(),
            lock_path: state_dir.join("daemon.pid"),
            log_path: state_dir.join("daemon.log"),
            http_port: env::http_port(),
            state_dir,
        })
    }

    /// Engine tunables derived from the environment. The daemon's own
    /// HTTP port joins the reserved set so it is never handed out.
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            reserved_ports: vec![self.http_port],
            agent_ttl_ms: env::agent_ttl_ms().unwrap_or(defaults.agent_ttl_ms),
            stale_after_ms: env::stale_after_ms().unwrap_or(defaults.stale_after_ms),
            dead_after_ms: env::dead_after_ms().unwrap_or(defaults.dead_after_ms),
            allow_private_webhooks: env::allow_private_webhooks(),
            ..defaults
        }
    }
}

/// Daemon state during operation.
pub struct DaemonState {
    /// Configuration
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    /// The coordination engine (shared with all request handlers)
    pub engine: Arc<Engine<SystemClock>>,
    /// When daemon started
    pub start_time: Instant,
}

/// Result of daemon startup. Listeners are returned separately so the
/// binary can spawn the serve loops.
pub struct StartupResult {
    pub daemon: DaemonState,
    pub unix_listener: UnixListener,
    pub tcp_listener: TcpListener,
    pub dispatcher: Dispatcher<SystemClock>,
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("Failed to bind 127.0.0.1:{0}: {1}")]
    TcpBindFailed(u16, std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] pd_storage::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the daemon
pub async fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    match startup_inner(config).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // Don't clean up if we failed to acquire the lock —
            // those files belong to the already-running daemon.
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

async fn startup_inner(config: &Config) -> Result<StartupResult, LifecycleError> {
    // 1. Create state directory (needed for lock file and log)
    std::fs::create_dir_all(&config.state_dir)?;

    // 2. Acquire lock file FIRST - prevents races
    // Use OpenOptions to avoid truncating the file before we hold the lock,
    // which would wipe the running daemon's PID.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;

    // Write PID to lock file (truncate now that we hold the lock)
    use std::io::Write;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file; // Drop mutability

    // 3. Open the store and build the engine
    let store = Store::open(&config.db_path)?;
    let (engine, dispatcher) = Engine::new(store, config.engine_config(), SystemClock);
    info!(db = %config.db_path.display(), "engine ready");

    // 4. Remove stale socket and bind (LAST - only after validation passes)
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let unix_listener = UnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;

    let tcp_listener = TcpListener::bind(("127.0.0.1", config.http_port))
        .await
        .map_err(|e| LifecycleError::TcpBindFailed(config.http_port, e))?;

    info!(
        socket = %config.socket_path.display(),
        port = config.http_port,
        "daemon started"
    );

    Ok(StartupResult {
        daemon: DaemonState {
            config: config.clone(),
            lock_file,
            engine: Arc::new(engine),
            start_time: Instant::now(),
        },
        unix_listener,
        tcp_listener,
        dispatcher,
    })
}

impl DaemonState {
    /// Shutdown the daemon gracefully: emit the stop event and remove the
    /// socket and pid files. The store needs no teardown beyond drop.
    pub fn shutdown(&mut self) {
        info!("Shutting down daemon...");
        self.engine.events.emit(&Event::DaemonStop {
            pid: std::process::id(),
        });

        if self.config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
                warn!("Failed to remove socket file: {}", e);
            }
        }
        if self.config.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.lock_path) {
                warn!("Failed to remove PID file: {}", e);
            }
        }
        // Lock file is released automatically when self.lock_file is dropped

        info!("Daemon shutdown complete");
    }
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config) {
    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
