//! Embedded SQL migrations.
//!
//! Schema changes ship as SQL files compiled into the binary and are
//! applied in order at startup. The `_voicebridge_migrations` table records
//! what has already run, so restarting against an existing database is a
//! no-op.

use rusqlite::Connection;
use std::collections::HashSet;
use thiserror::Error;

/// Migration names and their SQL, in application order. Append only.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "000_call_sessions",
        include_str!("migrations/000_call_sessions.sql"),
    ),
    (
        "001_session_entries",
        include_str!("migrations/001_session_entries.sql"),
    ),
];

/// Errors from the migration runner.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A migration's SQL (or its bookkeeping) failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },

    /// The applied-migration ledger could not be read.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

impl MigrationError {
    fn during(name: &str) -> impl Fn(rusqlite::Error) -> MigrationError + '_ {
        move |source| MigrationError::ExecutionFailed {
            name: name.to_string(),
            source,
        }
    }
}

fn applied_names(conn: &Connection) -> Result<HashSet<String>, MigrationError> {
    let mut stmt = conn
        .prepare("SELECT name FROM _voicebridge_migrations")
        .map_err(MigrationError::StateQuery)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(MigrationError::StateQuery)?
        .collect::<Result<HashSet<_>, _>>()
        .map_err(MigrationError::StateQuery)?;
    Ok(names)
}

/// Applies every pending migration, each in its own transaction, and
/// returns how many ran.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _voicebridge_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(MigrationError::during("_voicebridge_migrations_bootstrap"))?;

    let applied = applied_names(conn)?;
    let mut count = 0;

    for (name, sql) in MIGRATIONS {
        if applied.contains(*name) {
            tracing::debug!(migration = name, "already applied, skipping");
            continue;
        }
        tracing::info!(migration = name, "applying migration");

        let fail = MigrationError::during(name);
        let tx = conn.unchecked_transaction().map_err(&fail)?;
        tx.execute_batch(sql).map_err(&fail)?;
        tx.execute(
            "INSERT INTO _voicebridge_migrations (name) VALUES (?1)",
            [name],
        )
        .map_err(&fail)?;
        tx.commit().map_err(&fail)?;

        count += 1;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn fresh_database_applies_everything_once() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");

        let first = run_migrations(&conn).expect("first run should succeed");
        assert_eq!(first, MIGRATIONS.len());

        let second = run_migrations(&conn).expect("second run should succeed");
        assert_eq!(second, 0, "no new migrations to apply");

        let recorded: i64 = conn
            .query_row("SELECT COUNT(*) FROM _voicebridge_migrations", [], |row| {
                row.get(0)
            })
            .expect("should query migration count");
        assert_eq!(recorded as usize, MIGRATIONS.len());
    }

    #[test]
    fn migrations_create_session_tables() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        run_migrations(&conn).expect("migrations should succeed");

        for table in ["call_sessions", "session_messages", "session_function_calls"] {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                    [table],
                    |row| row.get(0),
                )
                .expect("should query sqlite_master");
            assert!(exists, "{table} table should exist");
        }

        let unique_enforced = conn.execute(
            "INSERT INTO call_sessions
                (session_id, phone_number, username, passcode_hash, created_at, updated_at)
             VALUES ('S1', '+1', 'u', 'h', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(unique_enforced.is_ok());
        let duplicate = conn.execute(
            "INSERT INTO call_sessions
                (session_id, phone_number, username, passcode_hash, created_at, updated_at)
             VALUES ('S1', '+1', 'u', 'h', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(duplicate.is_err(), "session_id must be unique");
    }
}
