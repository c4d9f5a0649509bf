//! Database layer for Voicebridge.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode
//! initialization, and embedded SQL migrations. Every table used by the
//! session store is created through versioned migrations managed here.
//!
//! SQLite is a deliberate fit for this system: each session update is one
//! statement (or one small transaction) keyed by `session_id`, so the
//! per-connection serialization SQLite provides is all the locking the
//! store needs. WAL mode keeps concurrent readers (history queries from
//! companion clients) off the writer's path.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{open_pool, DbPool, PoolError, PoolSettings};
