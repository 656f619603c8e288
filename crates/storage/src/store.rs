// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store handle: open, configure, and serialize access to the database.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};
use thiserror::Error;
use tracing::info;

use crate::migration::run_migrations;

/// Storage errors. Subsystems translate these to domain errors; a raw
/// store error never reaches a client.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// If `err` is a UNIQUE constraint violation, return the `table.column`
/// text SQLite reports, e.g. `services.port`.
pub fn unique_violation(err: &StoreError) -> Option<&str> {
    const PREFIX: &str = "UNIQUE constraint failed: ";
    match err {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(failure, Some(message)))
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
                && message.starts_with(PREFIX) =>
        {
            Some(&message[PREFIX.len()..])
        }
        _ => None,
    }
}

/// Handle to the embedded store.
///
/// Cheap to clone; all clones share one connection guarded by a mutex, so
/// the busy-timeout only matters for other processes opening the file.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut conn = Connection::open(path)?;
        configure(&conn)?;
        run_migrations(&mut conn)?;
        info!(path = %path.display(), "store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        configure(&conn)?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a read or single-statement write against the connection.
    pub fn with<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock();
        Ok(f(&conn)?)
    }

    /// Run a multi-statement write in one transaction.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Connection pragmas: WAL journaling, 5 s busy wait for cross-process
/// access, foreign keys on.
fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
