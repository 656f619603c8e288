// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Port Daddy daemon library.
//!
//! Exposes the router and lifecycle pieces so the binary and the
//! integration tests share one implementation.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod env;
pub mod http;
pub mod lifecycle;

pub use http::{build_router, AppState};
pub use lifecycle::{startup, Config, DaemonState, LifecycleError, StartupResult};

/// Daemon version, baked in at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
