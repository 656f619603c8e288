// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Endpoint discovery.

use std::path::{Path, PathBuf};

/// Socket the daemon binds by default.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/port-daddy.sock";

/// Loopback fallback when no socket exists.
pub const DEFAULT_HTTP_URL: &str = "http://127.0.0.1:9876";

/// Where the client should talk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// HTTP over TCP, base URL without trailing slash.
    Http(String),
    /// HTTP over a Unix domain socket.
    Socket(PathBuf),
}

/// Resolve the endpoint: explicit URL > explicit socket > default socket
/// if present > default TCP.
pub fn resolve(url: Option<&str>, socket: Option<&Path>) -> Endpoint {
    if let Some(url) = url {
        return Endpoint::Http(url.trim_end_matches('/').to_string());
    }
    if let Some(socket) = socket {
        return Endpoint::Socket(socket.to_path_buf());
    }
    let default_socket = Path::new(DEFAULT_SOCKET_PATH);
    if default_socket.exists() {
        return Endpoint::Socket(default_socket.to_path_buf());
    }
    Endpoint::Http(DEFAULT_HTTP_URL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_url_wins() {
        let endpoint = resolve(Some("http://127.0.0.1:4000/"), Some(Path::new("/tmp/x.sock")));
        assert_eq!(endpoint, Endpoint::Http("http://127.0.0.1:4000".into()));
    }

    #[test]
    fn explicit_socket_beats_defaults() {
        let endpoint = resolve(None, Some(Path::new("/tmp/custom.sock")));
        assert_eq!(endpoint, Endpoint::Socket(PathBuf::from("/tmp/custom.sock")));
    }

    #[test]
    fn falls_back_to_tcp_without_a_socket() {
        // The default socket may exist on a dev machine; only assert the
        // TCP fallback when it does not.
        if !Path::new(DEFAULT_SOCKET_PATH).exists() {
            assert_eq!(resolve(None, None), Endpoint::Http(DEFAULT_HTTP_URL.into()));
        }
    }
}
