//! Behavioral specifications for the port-daddy daemon.
//!
//! These tests are black-box: they spawn the real `pdd` binary with an
//! isolated state directory and drive it through `pd-client` over the
//! Unix socket (and loopback TCP where noted).

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

#[path = "specs/prelude.rs"]
mod prelude;

#[path = "specs/services.rs"]
mod services;

#[path = "specs/locks.rs"]
mod locks;

#[path = "specs/messages.rs"]
mod messages;

#[path = "specs/agents.rs"]
mod agents;

#[path = "specs/resurrection.rs"]
mod resurrection;

#[path = "specs/webhooks.rs"]
mod webhooks;
