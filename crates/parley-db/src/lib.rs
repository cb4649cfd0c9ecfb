//! Database layer for Parley.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization
//! and embedded SQL migrations. Every table the voice session subsystem
//! reads or writes is created through versioned migrations in this crate.
//!
//! SQLite serialises writers, so a single conditional `UPDATE ... RETURNING`
//! is an atomic compare-and-swap on one row. The voice-claim logic in
//! `parley-conversations` relies on exactly that property.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
