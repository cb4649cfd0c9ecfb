//! The SQLite pool shared by request handlers and the claim sweeper.
//!
//! Every pooled connection runs in WAL mode with foreign keys on, so the
//! conditional claim `UPDATE` and the transcript batch insert can run from
//! several blocking threads at once.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_POOL_MAX_SIZE: u32 = 8;

/// Pool size and lock-wait settings, taken from `[database]` in the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a writer waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            pool_max_size: DEFAULT_POOL_MAX_SIZE,
        }
    }
}

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Applies the per-connection pragmas. Refuses a file database that will
/// not switch to WAL; `:memory:` reports `memory` and is accepted.
fn configure_connection(conn: &mut Connection, busy_timeout_ms: u64) -> rusqlite::Result<()> {
    let journal_mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !journal_mode.eq_ignore_ascii_case("wal") && journal_mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("journal_mode stayed {journal_mode}, expected wal")),
        ));
    }
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
}

/// Opens (creating if needed) the database at `db_path` behind a pool.
///
/// With `:memory:` each pooled connection gets its own private database.
/// Anything that needs several connections to share rows, such as the
/// concurrent claim tests, must use a file path.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| configure_connection(conn, settings.busy_timeout_ms));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?;

    tracing::debug!(
        path = db_path,
        pool_max_size = settings.pool_max_size,
        busy_timeout_ms = settings.busy_timeout_ms,
        "database pool ready"
    );

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pragma<T: rusqlite::types::FromSql>(conn: &Connection, name: &str) -> T {
        conn.query_row(&format!("PRAGMA {name};"), [], |row| row.get(0))
            .unwrap_or_else(|e| panic!("PRAGMA {name} failed: {e}"))
    }

    #[test]
    fn memory_pool_applies_settings() {
        let pool = create_pool(
            ":memory:",
            DbRuntimeSettings {
                busy_timeout_ms: 2_500,
                pool_max_size: 3,
            },
        )
        .expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");

        assert_eq!(pragma::<String>(&conn, "journal_mode"), "memory");
        assert_eq!(pragma::<i32>(&conn, "foreign_keys"), 1);
        assert_eq!(pragma::<i32>(&conn, "busy_timeout"), 2_500);
        assert_eq!(pool.max_size(), 3);
    }

    #[test]
    fn file_pool_is_wal_and_shared_across_connections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shared.db");
        let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default())
            .expect("pool creation should succeed");

        let writer = pool.get().unwrap();
        writer
            .execute_batch("CREATE TABLE turns (n INTEGER); INSERT INTO turns VALUES (7);")
            .unwrap();

        let reader = pool.get().unwrap();
        let n: i64 = reader
            .query_row("SELECT n FROM turns", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 7);
        assert_eq!(pragma::<String>(&reader, "journal_mode"), "wal");
        assert_eq!(
            pragma::<i64>(&reader, "busy_timeout"),
            DEFAULT_BUSY_TIMEOUT_MS as i64
        );
    }
}
