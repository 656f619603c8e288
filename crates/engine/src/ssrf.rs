// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSRF guard for webhook targets.
//!
//! The daemon must not be usable as a proxy into private networks: any
//! hostname that resolves lexically to loopback, RFC1918, CGN, link-local,
//! ULA, a v4-mapped variant of those, a cloud metadata endpoint, or an
//! internal-only suffix is rejected at registration time.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// DNS names that always point at infrastructure metadata.
const BLOCKED_HOSTS: [&str; 3] = [
    "localhost",
    "metadata.google.internal",
    "metadata.goog",
];

/// Suffixes reserved for non-public resolution.
const BLOCKED_SUFFIXES: [&str; 3] = [".localhost", ".local", ".internal"];

/// Whether `host` (a hostname or IP literal, no port) is on the blocklist.
pub fn host_is_blocked(host: &str) -> bool {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return true;
    }
    let lower = host.to_ascii_lowercase();

    if BLOCKED_HOSTS.contains(&lower.as_str()) {
        return true;
    }
    if BLOCKED_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return true;
    }

    match lower.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ipv4_is_blocked(ip),
        Ok(IpAddr::V6(ip)) => ipv6_is_blocked(ip),
        Err(_) => false,
    }
}

fn ipv4_is_blocked(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // CGN 100.64.0.0/10
        || (octets[0] == 100 && (64..=127).contains(&octets[1]))
        // 0.0.0.0/8
        || octets[0] == 0
}

fn ipv6_is_blocked(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return ipv4_is_blocked(mapped);
    }
    let segments = ip.segments();
    ip.is_loopback()
        || ip.is_unspecified()
        // ULA fc00::/7
        || (segments[0] & 0xfe00) == 0xfc00
        // link-local fe80::/10
        || (segments[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
#[path = "ssrf_tests.rs"]
mod tests;
