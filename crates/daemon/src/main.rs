// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Port Daddy Daemon (pdd)
//!
//! Background process coordinating ports, locks, pub/sub, agents, and
//! webhooks for every local agent.
//!
//! Architecture:
//! - One axum router served on the Unix socket and on loopback TCP
//! - Janitor task sweeping TTLs every few seconds
//! - Webhook dispatcher task draining the bounded delivery queue

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::time::Instant;

use pd_core::Event;
use pd_daemon::http::{build_router, AppState};
use pd_daemon::lifecycle::{self, Config, LifecycleError, StartupResult};
use pd_daemon::{env, VERSION};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before any config/lock acquisition
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("pdd {VERSION}");
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("pdd {VERSION}");
                println!("Port Daddy Daemon - local coordination for multi-agent development");
                println!();
                println!("USAGE:");
                println!("    pdd");
                println!();
                println!("Listens on a Unix socket (default /tmp/port-daddy.sock) and");
                println!("loopback HTTP (default 127.0.0.1:9876). Configuration is taken");
                println!("from PORT_DADDY_* environment variables.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: pdd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    // Load configuration
    let config = Config::load()?;

    // Rotate log file if it has grown too large
    rotate_log_if_needed(&config.log_path);

    // Set up logging
    let log_guard = setup_logging(&config)?;

    info!("Starting port-daddy daemon");

    // Start daemon
    let StartupResult {
        mut daemon,
        unix_listener,
        tcp_listener,
        dispatcher,
    } = match lifecycle::startup(&config).await {
        Ok(result) => result,
        Err(LifecycleError::LockFailed(_)) => {
            // Another daemon is already running — print a human-readable
            // message instead of a raw debug error.
            let pid = std::fs::read_to_string(&config.lock_path)
                .unwrap_or_default()
                .trim()
                .to_string();
            eprintln!("pdd is already running");
            if !pid.is_empty() {
                eprintln!("  pid: {pid}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            error!("Failed to start daemon: {}", e);
            drop(log_guard);
            return Err(e.into());
        }
    };

    let cancel = CancellationToken::new();

    // Spawn the webhook dispatcher and requeue unfinished deliveries
    match daemon.engine.webhooks.requeue_unfinished() {
        Ok(0) => {}
        Ok(n) => info!("requeued {} unfinished webhook deliveries", n),
        Err(e) => error!("failed to requeue deliveries: {}", e),
    }
    tokio::spawn(dispatcher.run(cancel.clone()));

    // Spawn the janitor
    daemon
        .engine
        .janitor
        .clone()
        .spawn(env::sweep_interval(), cancel.clone());

    // Serve the same router on both listeners
    let state = AppState {
        engine: daemon.engine.clone(),
        start_time: Instant::now(),
        version: VERSION,
    };
    let router = build_router(state);

    let unix_cancel = cancel.clone();
    let unix_router = router.clone();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(unix_listener, unix_router)
            .with_graceful_shutdown(unix_cancel.cancelled_owned())
            .await
        {
            error!("socket serve error: {}", e);
        }
    });
    let tcp_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(tcp_cancel.cancelled_owned())
            .await
        {
            error!("http serve error: {}", e);
        }
    });

    daemon.engine.events.emit(&Event::DaemonStart {
        pid: std::process::id(),
    });

    info!(
        socket = %config.socket_path.display(),
        port = config.http_port,
        "Daemon ready"
    );

    // Signal ready for parent process (CLI waiting for startup)
    println!("READY");

    // Wait for a shutdown signal
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        _ = sigint.recv() => info!("Received SIGINT, shutting down..."),
    }

    cancel.cancel();
    daemon.shutdown();
    info!("Daemon stopped");
    Ok(())
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep (daemon.log.1, .2, .3).
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `daemon.log` → `daemon.log.1` → `daemon.log.2` → `daemon.log.3`,
/// deleting the oldest. Best-effort: rotation failures are silently ignored
/// so the daemon still starts.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };

    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();

    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Create log directory if needed
    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_appender = tracing_appender::rolling::never(
        config.log_path.parent().ok_or(LifecycleError::NoStateDir)?,
        config
            .log_path
            .file_name()
            .ok_or(LifecycleError::NoStateDir)?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
