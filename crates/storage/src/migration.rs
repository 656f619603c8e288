// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schema migrations, applied under `PRAGMA user_version`.
//!
//! Each entry is one SQL batch; the index + 1 is the schema version it
//! produces. Migrations only ever append.

use rusqlite::Connection;
use tracing::info;

use crate::store::StoreError;

const MIGRATIONS: &[&str] = &[
    // v1: initial schema
    r#"
    CREATE TABLE services (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        identity TEXT NOT NULL UNIQUE,
        project TEXT NOT NULL,
        stack TEXT,
        context TEXT,
        port INTEGER NOT NULL UNIQUE,
        pid INTEGER,
        cmd TEXT,
        cwd TEXT,
        status TEXT NOT NULL DEFAULT 'assigned',
        restart TEXT NOT NULL DEFAULT 'never',
        health_url TEXT,
        pair TEXT,
        metadata TEXT,
        created_at INTEGER NOT NULL,
        last_seen INTEGER NOT NULL,
        expires_at INTEGER
    );
    CREATE INDEX idx_services_project ON services(project);
    CREATE INDEX idx_services_expires ON services(expires_at) WHERE expires_at IS NOT NULL;

    CREATE TABLE endpoints (
        service_id INTEGER NOT NULL REFERENCES services(id) ON DELETE CASCADE,
        environment TEXT NOT NULL,
        url TEXT NOT NULL,
        PRIMARY KEY (service_id, environment)
    );

    CREATE TABLE locks (
        name TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        pid INTEGER,
        acquired_at INTEGER NOT NULL,
        expires_at INTEGER,
        metadata TEXT
    );

    CREATE TABLE agents (
        id TEXT PRIMARY KEY,
        name TEXT,
        pid INTEGER,
        agent_type TEXT,
        project TEXT,
        stack TEXT,
        context TEXT,
        purpose TEXT,
        worktree TEXT,
        max_services INTEGER NOT NULL DEFAULT 50,
        max_locks INTEGER NOT NULL DEFAULT 20,
        registered_at INTEGER NOT NULL,
        last_heartbeat INTEGER NOT NULL
    );
    CREATE INDEX idx_agents_heartbeat ON agents(last_heartbeat);
    CREATE INDEX idx_agents_project ON agents(project);

    CREATE TABLE inbox_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recipient TEXT NOT NULL,
        sender TEXT,
        content TEXT NOT NULL,
        msg_type TEXT NOT NULL DEFAULT 'info',
        read INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX idx_inbox_recipient ON inbox_messages(recipient, read);

    CREATE TABLE sessions (
        id TEXT PRIMARY KEY,
        purpose TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        agent_id TEXT,
        metadata TEXT,
        started_at INTEGER NOT NULL,
        ended_at INTEGER
    );
    CREATE INDEX idx_sessions_agent ON sessions(agent_id, status);

    CREATE TABLE session_notes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        content TEXT NOT NULL,
        note_type TEXT NOT NULL DEFAULT 'note',
        created_at INTEGER NOT NULL
    );
    CREATE INDEX idx_notes_session ON session_notes(session_id);

    CREATE TABLE file_claims (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        path TEXT NOT NULL,
        claimed_at INTEGER NOT NULL,
        released_at INTEGER
    );
    CREATE INDEX idx_claims_active ON file_claims(path) WHERE released_at IS NULL;

    CREATE TABLE channel_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        channel TEXT NOT NULL,
        payload TEXT NOT NULL,
        sender TEXT,
        created_at INTEGER NOT NULL,
        expires_at INTEGER
    );
    CREATE INDEX idx_messages_channel ON channel_messages(channel, id);
    CREATE INDEX idx_messages_expires ON channel_messages(expires_at) WHERE expires_at IS NOT NULL;

    CREATE TABLE resurrection_queue (
        agent_id TEXT PRIMARY KEY,
        name TEXT,
        session_id TEXT,
        purpose TEXT,
        project TEXT,
        stack TEXT,
        context TEXT,
        status TEXT NOT NULL DEFAULT 'stale',
        attempts INTEGER NOT NULL DEFAULT 0,
        new_agent_id TEXT,
        metadata TEXT,
        detected_at INTEGER NOT NULL,
        last_attempt_at INTEGER
    );
    CREATE INDEX idx_resurrection_project ON resurrection_queue(project, status);

    CREATE TABLE webhooks (
        id TEXT PRIMARY KEY,
        url TEXT NOT NULL,
        secret TEXT,
        events TEXT NOT NULL DEFAULT '["*"]',
        filter TEXT,
        active INTEGER NOT NULL DEFAULT 1,
        success_count INTEGER NOT NULL DEFAULT 0,
        failure_count INTEGER NOT NULL DEFAULT 0,
        metadata TEXT,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE webhook_deliveries (
        id TEXT PRIMARY KEY,
        webhook_id TEXT NOT NULL REFERENCES webhooks(id) ON DELETE CASCADE,
        event TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        last_attempt_at INTEGER,
        response_status INTEGER,
        response_body TEXT,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX idx_deliveries_webhook ON webhook_deliveries(webhook_id, created_at);
    CREATE INDEX idx_deliveries_status ON webhook_deliveries(status);

    CREATE TABLE activity_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        event_type TEXT NOT NULL,
        agent_id TEXT,
        target TEXT,
        detail TEXT,
        metadata TEXT
    );
    CREATE INDEX idx_activity_ts ON activity_log(ts);
    CREATE INDEX idx_activity_type ON activity_log(event_type);
    CREATE INDEX idx_activity_agent ON activity_log(agent_id);

    CREATE TABLE projects (
        name TEXT PRIMARY KEY,
        last_seen INTEGER NOT NULL
    );
    "#,
];

/// Current schema version produced by [`run_migrations`].
pub const SCHEMA_VERSION: usize = MIGRATIONS.len();

/// Bring the database up to the current schema version.
pub fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (index, batch) in MIGRATIONS.iter().enumerate().skip(version as usize) {
        let target = (index + 1) as i64;
        let tx = conn.transaction()?;
        tx.execute_batch(batch)?;
        tx.pragma_update(None, "user_version", target)?;
        tx.commit()?;
        info!(version = target, "applied schema migration");
    }

    Ok(())
}

#[cfg(test)]
#[path = "migration_tests.rs"]
mod tests;
