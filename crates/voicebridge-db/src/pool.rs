//! SQLite connection pooling.
//!
//! Relay loops never touch the database directly; every write is a short
//! `spawn_blocking` job that checks a connection out of this pool, and
//! companion history queries read concurrently from it. WAL mode keeps
//! those readers off the writers' path.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use thiserror::Error;

/// The pooled SQLite handle shared across the server.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pool and per-connection tunables, sourced from the `[database]` config
/// section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// How long a connection waits on a locked database before giving up,
    /// in milliseconds.
    pub busy_timeout_ms: u64,

    /// Upper bound on checked-out connections.
    pub pool_max_size: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

/// Errors from pool construction.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Pragmas applied to every connection the pool hands out. Journal mode is
/// handled separately because its pragma returns the resulting mode.
fn init_connection(
    conn: &rusqlite::Connection,
    busy_timeout_ms: u64,
) -> Result<(), rusqlite::Error> {
    let journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    // ":memory:" databases report "memory"; anything else means WAL was
    // refused.
    if !matches!(journal_mode.as_str(), "wal" | "memory") {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("WAL journal mode refused, got: {journal_mode}")),
        ));
    }

    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", busy_timeout_ms)?;
    Ok(())
}

/// Opens (creating if absent) the database at `path` and builds the pool
/// around it. Use `:memory:` for a throwaway test database.
pub fn open_pool(path: &str, settings: PoolSettings) -> Result<DbPool, PoolError> {
    let busy_timeout_ms = settings.busy_timeout_ms;
    let manager = SqliteConnectionManager::file(path)
        .with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .with_init(move |conn| init_connection(conn, busy_timeout_ms));

    Ok(Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?)
}
