// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Port allocator: services keyed by semantic identity.
//!
//! A claim either refreshes the existing row for the identity or assigns
//! the lowest free port in range, inserting the service and its `local`
//! endpoint alias in one transaction. Ports are unique across live rows;
//! the store constraint is the arbiter under concurrency.

use std::collections::{HashMap, HashSet};

use pd_core::{Clock, DaemonError, Event, Identity, IdentityPattern};
use pd_storage::{unique_violation, Store, StoreError};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::events::EventSink;

/// Default scan range for assigned ports.
pub const DEFAULT_RANGE: (u16, u16) = (3100, 9999);

/// Ports never assigned regardless of range.
pub const RESERVED_PORTS: [u16; 2] = [8000, 8080];

/// Restart policies accepted on claim.
const RESTART_POLICIES: [&str; 3] = ["never", "on-failure", "always"];

/// A service row enriched with its endpoint aliases.
#[derive(Debug, Clone, Serialize)]
pub struct Service {
    pub identity: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub status: String,
    pub restart: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: u64,
    pub last_seen: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    pub endpoints: HashMap<String, String>,
}

/// Options for [`Ports::claim`].
#[derive(Debug, Clone, Default)]
pub struct ClaimOptions {
    pub preferred_port: Option<u16>,
    pub range: Option<(u16, u16)>,
    /// Relative TTL in ms; translated to an absolute expiry.
    pub expires_after_ms: Option<u64>,
    pub pid: Option<i64>,
    pub cmd: Option<String>,
    pub cwd: Option<String>,
    pub restart: Option<String>,
    pub health_url: Option<String>,
    pub pair: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Ports the caller observed as occupied by other processes.
    pub system_ports: Vec<u16>,
    /// Claiming agent (from `X-Agent-Id`), stamped into metadata.
    pub agent: Option<String>,
}

/// Result of a claim.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimResult {
    #[serde(flatten)]
    pub service: Service,
    pub existing: bool,
}

/// Filters for [`Ports::find`], applied in memory after the pattern scan.
#[derive(Debug, Clone, Default)]
pub struct FindFilters {
    pub status: Option<String>,
    pub port: Option<u16>,
    pub expired: Option<bool>,
    pub limit: Option<usize>,
}

/// Outcome of a release call.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseResult {
    pub released: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// The allocator.
#[derive(Clone)]
pub struct Ports<C: Clock> {
    store: Store,
    events: EventSink<C>,
    clock: C,
    range: (u16, u16),
    reserved: Vec<u16>,
}

impl<C: Clock> Ports<C> {
    pub fn new(
        store: Store,
        events: EventSink<C>,
        clock: C,
        range: (u16, u16),
        reserved: Vec<u16>,
    ) -> Self {
        Self {
            store,
            events,
            clock,
            range,
            reserved,
        }
    }

    /// Claim a port for `raw` identity, or refresh the existing claim.
    pub fn claim(&self, raw: &str, opts: &ClaimOptions) -> Result<ClaimResult, DaemonError> {
        let identity = Identity::parse(raw)?;
        if let Some(ref restart) = opts.restart {
            if !RESTART_POLICIES.contains(&restart.as_str()) {
                return Err(DaemonError::InvalidArgument(format!(
                    "restart must be one of {RESTART_POLICIES:?}, got '{restart}'"
                )));
            }
        }
        let now = self.clock.epoch_ms();

        // First attempt; a port-uniqueness race gets one retry with a
        // fresh view of the used set.
        match self.claim_once(&identity, opts, now) {
            Err(DaemonError::PortInUse(_)) => {}
            other => return self.finish_claim(other),
        }
        self.finish_claim(self.claim_once(&identity, opts, now))
    }

    fn finish_claim(
        &self,
        result: Result<ClaimResult, DaemonError>,
    ) -> Result<ClaimResult, DaemonError> {
        if let Ok(ref claim) = result {
            self.events.emit(&Event::ServiceClaim {
                identity: claim.service.identity.clone(),
                port: claim.service.port,
                existing: claim.existing,
                agent: claim
                    .service
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("agent_id"))
                    .and_then(|v| v.as_str())
                    .map(String::from),
            });
        }
        result
    }

    fn claim_once(
        &self,
        identity: &Identity,
        opts: &ClaimOptions,
        now: u64,
    ) -> Result<ClaimResult, DaemonError> {
        let key = identity.canonical();
        let expires_at = opts.expires_after_ms.map(|ttl| now + ttl);
        let metadata = stamped_metadata(opts);
        let mut picked: Option<u16> = None;
        let picked_ref = &mut picked;

        let result = self.store.with_tx(|tx| {
            if let Some(service) = load_service(tx, &key)? {
                refresh_service(tx, &key, opts, &metadata, expires_at, now)?;
                let service = load_service(tx, &key)?.unwrap_or(service);
                return Ok(Ok(ClaimResult {
                    service,
                    existing: true,
                }));
            }

            let port = match self.pick_port(tx, opts)? {
                Some(port) => port,
                None => return Ok(Err(DaemonError::NoPortAvailable)),
            };
            *picked_ref = Some(port);

            tx.execute(
                "INSERT INTO services (identity, project, stack, context, port, pid, cmd, cwd,
                                       status, restart, health_url, pair, metadata,
                                       created_at, last_seen, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'assigned', ?9, ?10, ?11, ?12, ?13, ?13, ?14)",
                params![
                    key,
                    identity.project,
                    identity.stack,
                    identity.context,
                    port,
                    opts.pid,
                    opts.cmd,
                    opts.cwd,
                    opts.restart.as_deref().unwrap_or("never"),
                    opts.health_url,
                    opts.pair,
                    metadata.as_ref().map(|m| m.to_string()),
                    now,
                    expires_at,
                ],
            )?;
            let service_id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO endpoints (service_id, environment, url)
                 VALUES (?1, 'local', ?2)",
                params![service_id, format!("http://localhost:{port}")],
            )?;
            tx.execute(
                "INSERT INTO projects (name, last_seen) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET last_seen = excluded.last_seen",
                params![identity.project, now],
            )?;

            let service = load_service(tx, &key)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            Ok(Ok(ClaimResult {
                service,
                existing: false,
            }))
        });

        match result {
            Ok(inner) => inner,
            Err(err) => Err(translate_claim_error(err, picked.unwrap_or(0))),
        }
    }

    /// Pick the claimable port: preferred if usable, else lowest in range.
    fn pick_port(
        &self,
        conn: &Connection,
        opts: &ClaimOptions,
    ) -> rusqlite::Result<Option<u16>> {
        let mut used: HashSet<u16> = HashSet::new();
        let mut stmt = conn.prepare_cached("SELECT port FROM services")?;
        let rows = stmt.query_map([], |row| row.get::<_, u16>(0))?;
        for row in rows {
            used.insert(row?);
        }
        for port in &opts.system_ports {
            used.insert(*port);
        }
        for port in &self.reserved {
            used.insert(*port);
        }

        if let Some(preferred) = opts.preferred_port {
            if !used.contains(&preferred) {
                return Ok(Some(preferred));
            }
        }

        let (min, max) = opts.range.unwrap_or(self.range);
        Ok((min..=max).find(|port| !used.contains(port)))
    }

    /// Release one identity or every service matching a wildcard pattern.
    pub fn release(&self, raw: &str) -> Result<ReleaseResult, DaemonError> {
        if raw.contains('*') {
            let pattern = IdentityPattern::parse(raw)?;
            let victims = self.matching_identities(&pattern)?;
            let mut released = 0;
            for (identity, port) in victims {
                released += self.delete_service(&identity, port)?;
            }
            Ok(ReleaseResult {
                released,
                port: None,
            })
        } else {
            let identity = Identity::parse(raw)?;
            let key = identity.canonical();
            let port = self
                .store
                .with(|conn| {
                    conn.query_row(
                        "SELECT port FROM services WHERE identity = ?1",
                        params![key],
                        |row| row.get::<_, u16>(0),
                    )
                    .optional()
                })
                .map_err(internal)?;
            match port {
                None => Ok(ReleaseResult {
                    released: 0,
                    port: None,
                }),
                Some(port) => {
                    let released = self.delete_service(&key, port)?;
                    Ok(ReleaseResult {
                        released,
                        port: Some(port),
                    })
                }
            }
        }
    }

    /// Delete every service whose expiry has passed, returning what was freed.
    pub fn release_expired(&self) -> Result<Vec<(String, u16)>, DaemonError> {
        let now = self.clock.epoch_ms();
        let victims: Vec<(String, u16)> = self
            .store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT identity, port FROM services
                     WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                )?;
                let rows = stmt.query_map(params![now], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, u16>(1)?))
                })?;
                rows.collect()
            })
            .map_err(internal)?;

        for (identity, port) in &victims {
            self.delete_service(identity, *port)?;
        }
        Ok(victims)
    }

    fn delete_service(&self, identity: &str, port: u16) -> Result<usize, DaemonError> {
        let deleted = self
            .store
            .with(|conn| {
                conn.execute(
                    "DELETE FROM services WHERE identity = ?1",
                    params![identity],
                )
            })
            .map_err(internal)?;
        if deleted > 0 {
            self.events.emit(&Event::ServiceRelease {
                identity: identity.to_string(),
                port,
            });
        }
        Ok(deleted)
    }

    fn matching_identities(
        &self,
        pattern: &IdentityPattern,
    ) -> Result<Vec<(String, u16)>, DaemonError> {
        let like = pattern.sql_like_prefix();
        let rows: Vec<(String, u16)> = self
            .store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT identity, port FROM services
                     WHERE identity LIKE ?1 ESCAPE '\\' ORDER BY identity ASC",
                )?;
                let rows = stmt.query_map(params![like], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, u16>(1)?))
                })?;
                rows.collect()
            })
            .map_err(internal)?;

        Ok(rows
            .into_iter()
            .filter(|(identity, _)| {
                Identity::parse(identity)
                    .map(|id| pattern.matches(&id))
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Find services matching a pattern, filters applied in memory,
    /// ordered by identity ascending.
    pub fn find(&self, raw: &str, filters: &FindFilters) -> Result<Vec<Service>, DaemonError> {
        let pattern = IdentityPattern::parse(raw)?;
        let like = pattern.sql_like_prefix();
        let now = self.clock.epoch_ms();
        let limit = filters.limit.unwrap_or(100).min(1000);

        let services: Vec<Service> = self
            .store
            .with(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {SERVICE_COLUMNS} FROM services
                     WHERE identity LIKE ?1 ESCAPE '\\' ORDER BY identity ASC"
                ))?;
                let rows = stmt.query_map(params![like], row_to_service)?;
                let mut services = Vec::new();
                for row in rows {
                    let mut service = row?;
                    service.endpoints = load_endpoints(conn, &service.identity)?;
                    services.push(service);
                }
                Ok(services)
            })
            .map_err(internal)?;

        Ok(services
            .into_iter()
            .filter(|s| {
                Identity::parse(&s.identity)
                    .map(|id| pattern.matches(&id))
                    .unwrap_or(false)
            })
            .filter(|s| filters.status.as_ref().is_none_or(|want| s.status == *want))
            .filter(|s| filters.port.is_none_or(|want| s.port == want))
            .filter(|s| {
                filters.expired.is_none_or(|want| {
                    let expired = s.expires_at.is_some_and(|at| at <= now);
                    expired == want
                })
            })
            .take(limit)
            .collect())
    }

    /// One service with its endpoint map.
    pub fn get(&self, raw: &str) -> Result<Service, DaemonError> {
        let identity = Identity::parse(raw)?;
        let key = identity.canonical();
        self.store
            .with(|conn| {
                let service = load_service(conn, &key)?;
                Ok(service)
            })
            .map_err(internal)?
            .ok_or_else(|| DaemonError::NotFound(format!("service '{key}'")))
    }

    /// Upsert one endpoint alias.
    pub fn set_endpoint(&self, raw: &str, environment: &str, url: &str) -> Result<(), DaemonError> {
        let identity = Identity::parse(raw)?;
        let key = identity.canonical();
        if environment.is_empty() || environment.len() > 64 {
            return Err(DaemonError::Validation(
                "environment must be 1-64 characters".into(),
            ));
        }
        let updated = self
            .store
            .with(|conn| {
                conn.execute(
                    "INSERT INTO endpoints (service_id, environment, url)
                     SELECT id, ?2, ?3 FROM services WHERE identity = ?1
                     ON CONFLICT(service_id, environment) DO UPDATE SET url = excluded.url",
                    params![key, environment, url],
                )
            })
            .map_err(internal)?;
        if updated == 0 {
            return Err(DaemonError::NotFound(format!("service '{key}'")));
        }
        Ok(())
    }

    /// Transition the service status field.
    pub fn set_status(&self, raw: &str, status: &str) -> Result<(), DaemonError> {
        pd_core::validate_status(status)?;
        let identity = Identity::parse(raw)?;
        let key = identity.canonical();
        let now = self.clock.epoch_ms();
        let updated = self
            .store
            .with(|conn| {
                conn.execute(
                    "UPDATE services SET status = ?2, last_seen = ?3 WHERE identity = ?1",
                    params![key, status, now],
                )
            })
            .map_err(internal)?;
        if updated == 0 {
            return Err(DaemonError::NotFound(format!("service '{key}'")));
        }
        self.events.emit(&Event::ServiceStatus {
            identity: key,
            status: status.to_string(),
        });
        Ok(())
    }

    /// Live service count for health/metrics.
    pub fn count(&self) -> Result<usize, DaemonError> {
        self.store
            .with(|conn| {
                conn.query_row("SELECT COUNT(*) FROM services", [], |row| {
                    row.get::<_, i64>(0)
                })
            })
            .map(|n| n as usize)
            .map_err(internal)
    }

    /// Services attributed to an agent via stamped metadata.
    pub fn count_for_agent(&self, agent_id: &str) -> Result<usize, DaemonError> {
        let needle = format!("%\"agent_id\":\"{agent_id}\"%");
        self.store
            .with(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM services WHERE metadata LIKE ?1",
                    params![needle],
                    |row| row.get::<_, i64>(0),
                )
            })
            .map(|n| n as usize)
            .map_err(internal)
    }

    /// Known projects, most recently seen first.
    pub fn projects(&self) -> Result<Vec<(String, u64)>, DaemonError> {
        self.store
            .with(|conn| {
                let mut stmt = conn
                    .prepare_cached("SELECT name, last_seen FROM projects ORDER BY last_seen DESC")?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect()
            })
            .map_err(internal)
    }
}

const SERVICE_COLUMNS: &str = "identity, port, pid, cmd, cwd, status, restart, health_url, pair,
                               metadata, created_at, last_seen, expires_at";

fn row_to_service(row: &Row<'_>) -> rusqlite::Result<Service> {
    let metadata: Option<String> = row.get(9)?;
    Ok(Service {
        identity: row.get(0)?,
        port: row.get(1)?,
        pid: row.get(2)?,
        cmd: row.get(3)?,
        cwd: row.get(4)?,
        status: row.get(5)?,
        restart: row.get(6)?,
        health_url: row.get(7)?,
        pair: row.get(8)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: row.get(10)?,
        last_seen: row.get(11)?,
        expires_at: row.get(12)?,
        endpoints: HashMap::new(),
    })
}

fn load_service(conn: &Connection, key: &str) -> rusqlite::Result<Option<Service>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SERVICE_COLUMNS} FROM services WHERE identity = ?1"
    ))?;
    let service = stmt.query_row(params![key], row_to_service).optional()?;
    match service {
        Some(mut service) => {
            service.endpoints = load_endpoints(conn, key)?;
            Ok(Some(service))
        }
        None => Ok(None),
    }
}

fn load_endpoints(conn: &Connection, key: &str) -> rusqlite::Result<HashMap<String, String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT e.environment, e.url FROM endpoints e
         JOIN services s ON s.id = e.service_id WHERE s.identity = ?1",
    )?;
    let rows = stmt.query_map(params![key], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    rows.collect()
}

fn refresh_service(
    conn: &Connection,
    key: &str,
    opts: &ClaimOptions,
    metadata: &Option<serde_json::Value>,
    expires_at: Option<u64>,
    now: u64,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE services SET
            last_seen = ?2,
            pid = COALESCE(?3, pid),
            cmd = COALESCE(?4, cmd),
            cwd = COALESCE(?5, cwd),
            health_url = COALESCE(?6, health_url),
            pair = COALESCE(?7, pair),
            metadata = COALESCE(?8, metadata),
            expires_at = COALESCE(?9, expires_at)
         WHERE identity = ?1",
        params![
            key,
            now,
            opts.pid,
            opts.cmd,
            opts.cwd,
            opts.health_url,
            opts.pair,
            metadata.as_ref().map(|m| m.to_string()),
            expires_at,
        ],
    )?;
    Ok(())
}

/// Merge the claiming agent into the metadata blob so resource caps can
/// attribute the service without a dedicated column.
fn stamped_metadata(opts: &ClaimOptions) -> Option<serde_json::Value> {
    match (&opts.metadata, &opts.agent) {
        (None, None) => None,
        (metadata, agent) => {
            let mut value = metadata
                .clone()
                .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
            if let (Some(agent), Some(obj)) = (agent, value.as_object_mut()) {
                obj.insert(
                    "agent_id".to_string(),
                    serde_json::Value::String(agent.clone()),
                );
            }
            Some(value)
        }
    }
}

fn translate_claim_error(err: StoreError, port: u16) -> DaemonError {
    if let Some(constraint) = unique_violation(&err) {
        if constraint == "services.port" {
            // Pick raced with another writer; caller retries once
            return DaemonError::PortInUse(port);
        }
    }
    internal(err)
}

fn internal(err: StoreError) -> DaemonError {
    DaemonError::Internal(err.to_string())
}

#[cfg(test)]
#[path = "ports_tests.rs"]
mod tests;
