// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Field validators for client-supplied strings.

use crate::error::DaemonError;

/// Agent ids: `[A-Za-z0-9:_-]{1,100}`.
pub fn validate_agent_id(id: &str) -> Result<(), DaemonError> {
    if id.is_empty() || id.len() > 100 {
        return Err(DaemonError::Validation(format!(
            "agent id must be 1-100 characters, got {}",
            id.len()
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-'))
    {
        return Err(DaemonError::Validation(format!(
            "agent id '{id}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Webhook filter patterns: `[A-Za-z0-9:_*-]{1,100}`.
pub fn validate_filter_pattern(pattern: &str) -> Result<(), DaemonError> {
    if pattern.is_empty() || pattern.len() > 100 {
        return Err(DaemonError::Validation(format!(
            "filter pattern must be 1-100 characters, got {}",
            pattern.len()
        )));
    }
    if !pattern
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '*' | '-'))
    {
        return Err(DaemonError::Validation(format!(
            "filter pattern '{pattern}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Channel names: 1-100 printable ASCII characters, no whitespace.
/// `*` alone is the reserved wildcard channel and is legal.
pub fn validate_channel(channel: &str) -> Result<(), DaemonError> {
    if channel.is_empty() || channel.len() > 100 {
        return Err(DaemonError::Validation(format!(
            "channel name must be 1-100 characters, got {}",
            channel.len()
        )));
    }
    if !channel
        .chars()
        .all(|c| c.is_ascii_graphic())
    {
        return Err(DaemonError::Validation(format!(
            "channel name '{channel}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Service status strings: 1-32 characters of `[A-Za-z0-9_-]`.
pub fn validate_status(status: &str) -> Result<(), DaemonError> {
    if status.is_empty() || status.len() > 32 {
        return Err(DaemonError::Validation(format!(
            "status must be 1-32 characters, got {}",
            status.len()
        )));
    }
    if !status
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
    {
        return Err(DaemonError::Validation(format!(
            "status '{status}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Owner strings are free-form but bounded.
pub fn validate_owner(owner: &str) -> Result<(), DaemonError> {
    if owner.is_empty() || owner.len() > 200 {
        return Err(DaemonError::Validation(format!(
            "owner must be 1-200 characters, got {}",
            owner.len()
        )));
    }
    Ok(())
}
