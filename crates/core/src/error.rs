// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared by every subsystem.
//!
//! Each variant carries a stable string `code` surfaced to clients next to
//! the HTTP status, so error handling stays machine-checkable across
//! daemon versions.

use thiserror::Error;

use crate::identity::IdentityError;

/// Domain errors surfaced to clients as `{error, code}` JSON.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DaemonError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("lock '{name}' is held by '{holder}'")]
    LockHeld { name: String, holder: String },

    #[error("lock '{name}' is held by another owner ('{holder}')")]
    LockHeldByOther { name: String, holder: String },

    #[error("lock '{0}' is not held")]
    LockNotHeld(String),

    #[error("port {0} is already in use")]
    PortInUse(u16),

    #[error("resource limit reached: {0}")]
    ResourceLimit(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("no port available in the requested range")]
    NoPortAvailable,

    #[error("subscription rejected: {0}")]
    SubscribeRejected(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DaemonError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidIdentity(_) => "InvalidIdentity",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::Validation(_) => "ValidationError",
            Self::NotFound(_) => "NotFound",
            Self::LockHeld { .. } => "LockHeld",
            Self::LockHeldByOther { .. } => "LockHeldByOther",
            Self::LockNotHeld(_) => "LockNotHeld",
            Self::PortInUse(_) => "PortInUse",
            Self::ResourceLimit(_) => "ResourceLimit",
            Self::Timeout(_) => "Timeout",
            Self::NoPortAvailable => "NoPortAvailable",
            Self::SubscribeRejected(_) => "SubscribeRejected",
            Self::Forbidden(_) => "Forbidden",
            Self::Internal(_) => "Internal",
        }
    }

    /// HTTP status for the transport layer.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidIdentity(_) | Self::InvalidArgument(_) | Self::Validation(_) => 400,
            // SSRF-blocked targets are a 400-class rejection, not auth
            Self::Forbidden(_) => 400,
            Self::NotFound(_) => 404,
            Self::LockHeld { .. }
            | Self::LockHeldByOther { .. }
            | Self::LockNotHeld(_)
            | Self::PortInUse(_)
            | Self::ResourceLimit(_) => 409,
            Self::Timeout(_) => 408,
            Self::SubscribeRejected(_) => 429,
            Self::NoPortAvailable => 503,
            Self::Internal(_) => 500,
        }
    }
}

impl From<IdentityError> for DaemonError {
    fn from(err: IdentityError) -> Self {
        Self::InvalidIdentity(err.to_string())
    }
}
