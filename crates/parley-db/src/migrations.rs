//! Embedded SQL migrations.
//!
//! Schema files are compiled into the binary and applied in order on
//! startup. Applied names are recorded in `_parley_migrations`, so a
//! migration never runs twice against the same database.

use rusqlite::Connection;
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// Ordered schema history. Append only.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_init",
        sql: include_str!("migrations/000_init.sql"),
    },
    Migration {
        name: "001_organisations",
        sql: include_str!("migrations/001_organisations.sql"),
    },
    Migration {
        name: "002_personas",
        sql: include_str!("migrations/002_personas.sql"),
    },
    Migration {
        name: "003_scenarios",
        sql: include_str!("migrations/003_scenarios.sql"),
    },
    Migration {
        name: "004_system_prompts",
        sql: include_str!("migrations/004_system_prompts.sql"),
    },
    Migration {
        name: "005_conversations",
        sql: include_str!("migrations/005_conversations.sql"),
    },
    Migration {
        name: "006_messages",
        sql: include_str!("migrations/006_messages.sql"),
    },
    Migration {
        name: "007_voice_claim_generation",
        sql: include_str!("migrations/007_voice_claim_generation.sql"),
    },
];

/// Errors raised while bringing the schema up to date.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A statement inside a migration (or its bookkeeping) failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// Name of the failing migration.
        name: String,
        /// Underlying SQLite error.
        source: rusqlite::Error,
    },

    /// The tracking table could not be read.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

fn failed(name: &str) -> impl FnOnce(rusqlite::Error) -> MigrationError + '_ {
    move |source| MigrationError::ExecutionFailed {
        name: name.to_string(),
        source,
    }
}

/// Applies every pending migration and returns how many ran.
///
/// # Errors
///
/// Returns `MigrationError` if a migration fails or the tracking table
/// cannot be queried. A failing migration leaves no partial schema behind.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply(conn, MIGRATIONS)
}

fn apply(conn: &Connection, migrations: &[Migration]) -> Result<usize, MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _parley_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(failed("_parley_migrations_bootstrap"))?;

    let mut applied = 0;

    for migration in migrations {
        let done: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM _parley_migrations WHERE name = ?1)",
                [migration.name],
                |row| row.get(0),
            )
            .map_err(MigrationError::StateQuery)?;

        if done {
            tracing::trace!(migration = migration.name, "already applied");
            continue;
        }

        tracing::info!(migration = migration.name, "applying migration");

        let tx = conn
            .unchecked_transaction()
            .map_err(failed(migration.name))?;
        tx.execute_batch(migration.sql)
            .map_err(failed(migration.name))?;
        tx.execute(
            "INSERT INTO _parley_migrations (name) VALUES (?1)",
            [migration.name],
        )
        .map_err(failed(migration.name))?;
        tx.commit().map_err(failed(migration.name))?;

        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, table: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table],
            |row| row.get(0),
        )
        .expect("should query sqlite_master")
    }

    #[test]
    fn fresh_database_gets_full_schema() {
        let conn = Connection::open_in_memory().unwrap();
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, MIGRATIONS.len());

        for table in [
            "organisations",
            "personas",
            "scenarios",
            "system_prompts",
            "conversations",
            "messages",
        ] {
            assert!(table_exists(&conn, table), "{table} should exist");
        }
    }

    #[test]
    fn rerun_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), 0);

        let recorded: i64 = conn
            .query_row("SELECT COUNT(*) FROM _parley_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(recorded as usize, MIGRATIONS.len());
    }

    #[test]
    fn new_conversations_start_without_voice() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO conversations (conversation_id) VALUES ('c1')",
            [],
        )
        .unwrap();

        let (flag, metadata): (bool, String) = conn
            .query_row(
                "SELECT is_voice_conversation, voice_metadata FROM conversations WHERE conversation_id = 'c1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(!flag);
        assert_eq!(metadata, r#"{"status":"EMPTY"}"#);
    }

    #[test]
    fn failed_migration_leaves_no_partial_schema() {
        let conn = Connection::open_in_memory().unwrap();
        let migrations = [Migration {
            name: "001_broken",
            sql: "
                CREATE TABLE half_done (id INTEGER PRIMARY KEY);
                INSERT INTO table_that_does_not_exist VALUES (1);
            ",
        }];

        let err = apply(&conn, &migrations).expect_err("broken migration should fail");
        match err {
            MigrationError::ExecutionFailed { name, .. } => assert_eq!(name, "001_broken"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!table_exists(&conn, "half_done"));
    }
}
