//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The SQLite
//! `user_version` pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS identities (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            login               TEXT    NOT NULL UNIQUE,
            email               TEXT,
            disabled_email      TEXT,
            object_guid         TEXT    UNIQUE,
            sam_account_name    TEXT,
            user_principal_name TEXT,
            domain_sid          TEXT,
            disabled            INTEGER NOT NULL DEFAULT 0,
            disabled_reason     TEXT,
            attributes          TEXT    NOT NULL DEFAULT '{}',
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_identities_sam ON identities (sam_account_name);
        CREATE INDEX IF NOT EXISTS idx_identities_upn ON identities (user_principal_name);
        CREATE INDEX IF NOT EXISTS idx_identities_email ON identities (email);

        CREATE TABLE IF NOT EXISTS audit_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            action      TEXT    NOT NULL,
            profile     TEXT,
            identity    TEXT,
            details     TEXT,
            success     INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
        CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log (action);

        CREATE TABLE IF NOT EXISTS kv_state (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        "#,
    ),
    (
        2,
        "sync run history",
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            run_id       TEXT PRIMARY KEY,
            profile      TEXT    NOT NULL,
            direction    TEXT    NOT NULL CHECK (direction IN ('to_local', 'to_directory', 'login')),
            status       TEXT    NOT NULL,
            started_at   TEXT    NOT NULL,
            completed_at TEXT,
            created      INTEGER NOT NULL DEFAULT 0,
            updated      INTEGER NOT NULL DEFAULT 0,
            enabled      INTEGER NOT NULL DEFAULT 0,
            disabled     INTEGER NOT NULL DEFAULT 0,
            skipped      INTEGER NOT NULL DEFAULT 0,
            errors       INTEGER NOT NULL DEFAULT 0,
            details      TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sync_runs_profile ON sync_runs (profile, started_at);
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let applied = current_version(conn)?;
    info!(
        current_version = applied,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > applied {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Highest migration applied to `conn`.
pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };

        for table in ["identities", "audit_log", "kv_state", "sync_runs"] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }
}
