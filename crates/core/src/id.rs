// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier generation.
//!
//! All ids come from v4 UUIDs so handles handed to untrusted local
//! clients are unguessable.

use uuid::Uuid;

/// Session id: `session-<hex8>`.
pub fn session_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("session-{}", &hex[..8])
}

/// Webhook id: `wh-<hex12>`.
pub fn webhook_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("wh-{}", &hex[..12])
}

/// Delivery id: full hyphenated UUID.
pub fn delivery_id() -> String {
    Uuid::new_v4().to_string()
}
