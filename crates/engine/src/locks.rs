// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock manager: named advisory mutexes with TTL.
//!
//! Acquire is compare-and-set: one transaction deletes any expired holder
//! and inserts the new row; the primary-key constraint decides races.
//! A lock past its expiry is observably free from the next operation on.

use pd_core::{Clock, DaemonError, Event, Identity};
use pd_storage::{unique_violation, Store};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use crate::events::EventSink;

/// Default TTL when none (or a nonsense value) is supplied.
pub const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;

/// Hard cap on TTL.
pub const MAX_TTL_MS: u64 = 60 * 60 * 1000;

/// Owner recorded when the caller does not supply one.
const ANONYMOUS_OWNER: &str = "anonymous";

/// A held lock.
#[derive(Debug, Clone, Serialize)]
pub struct LockInfo {
    pub name: String,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,
    pub acquired_at: u64,
    pub expires_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Options for [`Locks::acquire`].
#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    pub owner: Option<String>,
    pub pid: Option<i64>,
    pub ttl_ms: Option<f64>,
    pub metadata: Option<serde_json::Value>,
}

/// Outcome of a release.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseOutcome {
    pub released: bool,
}

/// Normalize a requested TTL: default 5 min, cap 1 h, junk coerced to default.
pub fn normalize_ttl(ttl_ms: Option<f64>) -> u64 {
    match ttl_ms {
        None => DEFAULT_TTL_MS,
        Some(v) if !v.is_finite() || v <= 0.0 => DEFAULT_TTL_MS,
        Some(v) => (v as u64).min(MAX_TTL_MS),
    }
}

/// The manager.
#[derive(Clone)]
pub struct Locks<C: Clock> {
    store: Store,
    events: EventSink<C>,
    clock: C,
}

impl<C: Clock> Locks<C> {
    pub fn new(store: Store, events: EventSink<C>, clock: C) -> Self {
        Self {
            store,
            events,
            clock,
        }
    }

    /// Acquire a lock. Fails with `LockHeld` when a live holder exists.
    pub fn acquire(&self, name: &str, opts: &AcquireOptions) -> Result<LockInfo, DaemonError> {
        validate_lock_name(name)?;
        if let Some(ref owner) = opts.owner {
            pd_core::validate_owner(owner)?;
        }
        let now = self.clock.epoch_ms();
        let ttl = normalize_ttl(opts.ttl_ms);
        let owner = opts.owner.clone().unwrap_or_else(|| ANONYMOUS_OWNER.to_string());
        let expires_at = now + ttl;

        let result = self.store.with_tx(|tx| {
            tx.execute(
                "DELETE FROM locks WHERE name = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
                params![name, now],
            )?;
            tx.execute(
                "INSERT INTO locks (name, owner, pid, acquired_at, expires_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    name,
                    owner,
                    opts.pid,
                    now,
                    expires_at,
                    opts.metadata.as_ref().map(|m| m.to_string()),
                ],
            )?;
            Ok(())
        });

        match result {
            Ok(()) => {
                self.events.emit(&Event::LockAcquire {
                    name: name.to_string(),
                    owner: owner.clone(),
                });
                Ok(LockInfo {
                    name: name.to_string(),
                    owner,
                    pid: opts.pid,
                    acquired_at: now,
                    expires_at,
                    metadata: opts.metadata.clone(),
                })
            }
            Err(err) if unique_violation(&err).is_some() => {
                let holder = self.holder(name)?.unwrap_or_else(|| "unknown".to_string());
                Err(DaemonError::LockHeld {
                    name: name.to_string(),
                    holder,
                })
            }
            Err(err) => Err(internal(err)),
        }
    }

    /// Release a lock. Owner-checked unless `force` or no owner supplied.
    /// A missing lock is a soft success.
    pub fn release(
        &self,
        name: &str,
        owner: Option<&str>,
        force: bool,
    ) -> Result<ReleaseOutcome, DaemonError> {
        validate_lock_name(name)?;
        let now = self.clock.epoch_ms();
        self.sweep_name(name, now)?;

        if force || owner.is_none() {
            let deleted = self
                .store
                .with(|conn| conn.execute("DELETE FROM locks WHERE name = ?1", params![name]))
                .map_err(internal)?;
            if deleted > 0 {
                self.events.emit(&Event::LockRelease {
                    name: name.to_string(),
                    owner: owner.map(String::from),
                });
            }
            return Ok(ReleaseOutcome {
                released: deleted > 0,
            });
        }

        let owner = owner.unwrap_or_default();
        let current = self.current(name)?;
        match current {
            None => Ok(ReleaseOutcome { released: false }),
            Some(info) if info.owner != owner => Err(DaemonError::LockHeldByOther {
                name: name.to_string(),
                holder: info.owner,
            }),
            Some(_) => {
                self.store
                    .with(|conn| {
                        conn.execute(
                            "DELETE FROM locks WHERE name = ?1 AND owner = ?2",
                            params![name, owner],
                        )
                    })
                    .map_err(internal)?;
                self.events.emit(&Event::LockRelease {
                    name: name.to_string(),
                    owner: Some(owner.to_string()),
                });
                Ok(ReleaseOutcome { released: true })
            }
        }
    }

    /// Extend a held lock's expiry to `now + ttl`.
    pub fn extend(
        &self,
        name: &str,
        owner: Option<&str>,
        ttl_ms: Option<f64>,
    ) -> Result<LockInfo, DaemonError> {
        validate_lock_name(name)?;
        let now = self.clock.epoch_ms();
        self.sweep_name(name, now)?;

        let current = self
            .current(name)?
            .ok_or_else(|| DaemonError::LockNotHeld(name.to_string()))?;
        if let Some(owner) = owner {
            if current.owner != owner {
                return Err(DaemonError::LockHeldByOther {
                    name: name.to_string(),
                    holder: current.owner,
                });
            }
        }

        let expires_at = now + normalize_ttl(ttl_ms);
        self.store
            .with(|conn| {
                conn.execute(
                    "UPDATE locks SET expires_at = ?2 WHERE name = ?1",
                    params![name, expires_at],
                )
            })
            .map_err(internal)?;
        Ok(LockInfo {
            expires_at,
            ..current
        })
    }

    /// Report the lock's state, sweeping an expired holder first.
    pub fn check(&self, name: &str) -> Result<Option<LockInfo>, DaemonError> {
        validate_lock_name(name)?;
        let now = self.clock.epoch_ms();
        self.sweep_name(name, now)?;
        self.current(name)
    }

    /// List held locks, optionally by owner. Sweeps expired rows first.
    pub fn list(&self, owner: Option<&str>) -> Result<Vec<LockInfo>, DaemonError> {
        let now = self.clock.epoch_ms();
        self.sweep_expired(now)?;
        self.store
            .with(|conn| {
                let mut locks = Vec::new();
                match owner {
                    Some(owner) => {
                        let mut stmt = conn.prepare_cached(&format!(
                            "SELECT {LOCK_COLUMNS} FROM locks WHERE owner = ?1 ORDER BY name ASC"
                        ))?;
                        let rows = stmt.query_map(params![owner], row_to_lock)?;
                        for row in rows {
                            locks.push(row?);
                        }
                    }
                    None => {
                        let mut stmt = conn.prepare_cached(&format!(
                            "SELECT {LOCK_COLUMNS} FROM locks ORDER BY name ASC"
                        ))?;
                        let rows = stmt.query_map([], row_to_lock)?;
                        for row in rows {
                            locks.push(row?);
                        }
                    }
                }
                Ok(locks)
            })
            .map_err(internal)
    }

    /// Delete all expired locks, emitting `lock.expire` per row.
    /// Returns the expired names. Used by the janitor and sweep-first reads.
    pub fn sweep_expired(&self, now: u64) -> Result<Vec<String>, DaemonError> {
        let names: Vec<String> = self
            .store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT name FROM locks WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                )?;
                let rows = stmt.query_map(params![now], |row| row.get(0))?;
                rows.collect()
            })
            .map_err(internal)?;
        for name in &names {
            let deleted = self
                .store
                .with(|conn| {
                    conn.execute(
                        "DELETE FROM locks WHERE name = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
                        params![name, now],
                    )
                })
                .map_err(internal)?;
            if deleted > 0 {
                self.events.emit(&Event::LockExpire { name: name.clone() });
            }
        }
        Ok(names)
    }

    /// Force-release every lock held by `owner` (dead-agent salvage).
    pub fn release_owned_by(&self, owner: &str) -> Result<usize, DaemonError> {
        let names: Vec<String> = self
            .store
            .with(|conn| {
                let mut stmt = conn.prepare_cached("SELECT name FROM locks WHERE owner = ?1")?;
                let rows = stmt.query_map(params![owner], |row| row.get(0))?;
                rows.collect()
            })
            .map_err(internal)?;
        for name in &names {
            self.store
                .with(|conn| conn.execute("DELETE FROM locks WHERE name = ?1", params![name]))
                .map_err(internal)?;
            self.events.emit(&Event::LockRelease {
                name: name.clone(),
                owner: Some(owner.to_string()),
            });
        }
        Ok(names.len())
    }

    /// Locks currently held by `owner`.
    pub fn count_for_owner(&self, owner: &str) -> Result<usize, DaemonError> {
        let now = self.clock.epoch_ms();
        self.store
            .with(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM locks
                     WHERE owner = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                    params![owner, now],
                    |row| row.get::<_, i64>(0),
                )
            })
            .map(|n| n as usize)
            .map_err(internal)
    }

    /// Total held locks (metrics).
    pub fn count(&self) -> Result<usize, DaemonError> {
        self.store
            .with(|conn| {
                conn.query_row("SELECT COUNT(*) FROM locks", [], |row| row.get::<_, i64>(0))
            })
            .map(|n| n as usize)
            .map_err(internal)
    }

    fn sweep_name(&self, name: &str, now: u64) -> Result<(), DaemonError> {
        let deleted = self
            .store
            .with(|conn| {
                conn.execute(
                    "DELETE FROM locks WHERE name = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
                    params![name, now],
                )
            })
            .map_err(internal)?;
        if deleted > 0 {
            self.events.emit(&Event::LockExpire {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn current(&self, name: &str) -> Result<Option<LockInfo>, DaemonError> {
        self.store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {LOCK_COLUMNS} FROM locks WHERE name = ?1"
                ))?;
                stmt.query_row(params![name], row_to_lock).optional()
            })
            .map_err(internal)
    }

    fn holder(&self, name: &str) -> Result<Option<String>, DaemonError> {
        self.store
            .with(|conn| {
                conn.query_row(
                    "SELECT owner FROM locks WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()
            })
            .map_err(internal)
    }
}

const LOCK_COLUMNS: &str = "name, owner, pid, acquired_at, expires_at, metadata";

fn row_to_lock(row: &Row<'_>) -> rusqlite::Result<LockInfo> {
    let metadata: Option<String> = row.get(5)?;
    Ok(LockInfo {
        name: row.get(0)?,
        owner: row.get(1)?,
        pid: row.get(2)?,
        acquired_at: row.get(3)?,
        expires_at: row.get(4)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
    })
}

/// Lock names use the identity charset; wildcards are rejected.
fn validate_lock_name(name: &str) -> Result<(), DaemonError> {
    Identity::parse(name)?;
    Ok(())
}

fn internal(err: pd_storage::StoreError) -> DaemonError {
    DaemonError::Internal(err.to_string())
}

#[cfg(test)]
#[path = "locks_tests.rs"]
mod tests;
