//! Shared harness: spawn an isolated daemon and a client for it.

use std::io::BufRead;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use pd_client::{resolve, PdClient};
use tempfile::TempDir;

/// A running daemon with isolated state; killed on drop.
pub struct Daemon {
    pub socket: PathBuf,
    pub http_url: String,
    child: Child,
    _dir: TempDir,
}

impl Daemon {
    /// Spawn with fast sweep/threshold defaults for tests.
    pub fn spawn() -> Self {
        Self::spawn_with(|_| {})
    }

    /// Spawn, letting the caller adjust env before launch.
    pub fn spawn_with(tune: impl FnOnce(&mut Command)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("daemon.sock");
        let port = free_port();

        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin("pdd"));
        cmd.env("PORT_DADDY_DB", dir.path().join("port-registry.db"))
            .env("PORT_DADDY_SOCKET", &socket)
            .env("PORT_DADDY_STATE_DIR", dir.path().join("state"))
            .env("PORT_DADDY_PORT", port.to_string())
            .env("PORT_DADDY_SWEEP_MS", "100")
            .env("PORT_DADDY_ALLOW_PRIVATE_WEBHOOKS", "1")
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        tune(&mut cmd);

        let mut child = cmd.spawn().expect("spawn pdd");
        wait_for_ready(&mut child);

        Self {
            socket,
            http_url: format!("http://127.0.0.1:{port}"),
            child,
            _dir: dir,
        }
    }

    /// Client over the Unix socket.
    pub fn client(&self) -> PdClient {
        PdClient::new(resolve(None, Some(&self.socket)))
    }

    /// Client over loopback TCP.
    pub fn tcp_client(&self) -> PdClient {
        PdClient::new(resolve(Some(&self.http_url), None))
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Block until the daemon prints READY (or fail after 10 s).
fn wait_for_ready(child: &mut Child) {
    let stdout = child.stdout.take().expect("child stdout");
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let reader = std::io::BufReader::new(stdout);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if line.trim() == "READY" {
                let _ = tx.send(());
                break;
            }
        }
    });
    rx.recv_timeout(Duration::from_secs(10))
        .expect("daemon did not become ready in 10s");
}

/// Ask the OS for a free loopback port.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local_addr").port()
}
