// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tempfile::tempdir;

use super::{startup, Config, LifecycleError};

fn test_config(dir: &std::path::Path) -> Config {
    Config {
        state_dir: dir.to_path_buf(),
        db_path: dir.join("port-registry.db"),
        socket_path: dir.join("daemon.sock"),
        lock_path: dir.join("daemon.pid"),
        log_path: dir.join("daemon.log"),
        // Port 0 lets the OS pick a free port for the test
        http_port: 0,
    }
}

#[tokio::test]
async fn startup_creates_state_and_binds() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());

    let result = startup(&config).await.unwrap();
    assert!(config.lock_path.exists());
    assert!(config.socket_path.exists());
    assert!(config.db_path.exists());

    let pid: u32 = std::fs::read_to_string(&config.lock_path)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(pid, std::process::id());

    drop(result);
}

#[tokio::test]
async fn second_startup_fails_on_lock() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());

    let _first = startup(&config).await.unwrap();
    let second = startup(&config).await;
    assert!(matches!(second, Err(LifecycleError::LockFailed(_))));

    // The running daemon's files were not cleaned up by the failure
    assert!(config.lock_path.exists());
}

#[tokio::test]
async fn stale_socket_is_replaced() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::write(&config.socket_path, b"stale").unwrap();

    let result = startup(&config).await.unwrap();
    // Bound as a socket now, not the stale regular file
    let metadata = std::fs::metadata(&config.socket_path).unwrap();
    assert!(!metadata.is_file() || metadata.len() != 5);
    drop(result);
}

#[tokio::test]
async fn shutdown_removes_runtime_files() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());

    let mut result = startup(&config).await.unwrap();
    result.daemon.shutdown();

    assert!(!config.socket_path.exists());
    assert!(!config.lock_path.exists());
    // The store survives restarts
    assert!(config.db_path.exists());
}
