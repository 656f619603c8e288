// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use rusqlite::Connection;

use super::{run_migrations, SCHEMA_VERSION};

fn user_version(conn: &Connection) -> i64 {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn fresh_database_reaches_current_version() {
    let mut conn = Connection::open_in_memory().unwrap();
    run_migrations(&mut conn).unwrap();
    assert_eq!(user_version(&conn), SCHEMA_VERSION as i64);
}

#[test]
fn rerun_is_a_no_op() {
    let mut conn = Connection::open_in_memory().unwrap();
    run_migrations(&mut conn).unwrap();
    run_migrations(&mut conn).unwrap();
    assert_eq!(user_version(&conn), SCHEMA_VERSION as i64);
}

#[test]
fn all_tables_exist() {
    let mut conn = Connection::open_in_memory().unwrap();
    run_migrations(&mut conn).unwrap();

    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .unwrap();
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .map(|r| r.unwrap())
        .collect();

    for expected in [
        "activity_log",
        "agents",
        "channel_messages",
        "endpoints",
        "file_claims",
        "inbox_messages",
        "locks",
        "projects",
        "resurrection_queue",
        "services",
        "session_notes",
        "sessions",
        "webhook_deliveries",
        "webhooks",
    ] {
        assert!(tables.iter().any(|t| t == expected), "missing {expected}");
    }
}

#[test]
fn channel_message_ids_are_monotonic() {
    let mut conn = Connection::open_in_memory().unwrap();
    run_migrations(&mut conn).unwrap();

    for i in 0..3 {
        conn.execute(
            "INSERT INTO channel_messages (channel, payload, created_at) VALUES ('c', ?1, ?2)",
            rusqlite::params![format!("{i}"), i],
        )
        .unwrap();
    }
    // Delete the latest row; the next id must not be reused
    conn.execute("DELETE FROM channel_messages WHERE id = 3", [])
        .unwrap();
    conn.execute(
        "INSERT INTO channel_messages (channel, payload, created_at) VALUES ('c', 'x', 9)",
        [],
    )
    .unwrap();

    let max: i64 = conn
        .query_row("SELECT MAX(id) FROM channel_messages", [], |row| row.get(0))
        .unwrap();
    assert_eq!(max, 4, "AUTOINCREMENT must not reuse ids");
}
