//! Typed query helpers for run bookkeeping: audit log, key-value state and
//! sync run history. Identity rows live in [`super::store`].

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{SyncResult, SyncRunStatus};

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// A row from the `audit_log` table.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub profile: Option<String>,
    pub identity: Option<String>,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

/// A row from the `sync_runs` table.
#[derive(Debug, Clone)]
pub struct SyncRunEntry {
    pub run_id: String,
    pub profile: String,
    pub direction: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created: i64,
    pub updated: i64,
    pub enabled: i64,
    pub disabled: i64,
    pub skipped: i64,
    pub errors: i64,
    pub details: Option<String>,
}

impl Database {
    // -- audit_log ----------------------------------------------------------

    pub fn insert_audit_log(
        &self,
        action: &str,
        profile: Option<&str>,
        identity: Option<&str>,
        details: Option<&str>,
        success: bool,
    ) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_log (action, profile, identity, details, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![action, profile, identity, details, success, now],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, action, "inserted audit_log entry");
        Ok(id)
    }

    /// Most recent entries first.
    pub fn list_audit_log(&self, limit: u32) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, profile, identity, details, success, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                let created_at: String = row.get(6)?;
                Ok(AuditLogEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    profile: row.get(2)?,
                    identity: row.get(3)?,
                    details: row.get(4)?,
                    success: row.get(5)?,
                    created_at: parse_datetime(&created_at),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn count_audit_log(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn count_errors(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM audit_log WHERE success = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // -- kv_state -----------------------------------------------------------

    pub fn get_state(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM kv_state WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Upsert.
    pub fn set_state(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        debug!(key, "set kv_state");
        Ok(())
    }

    // -- sync_runs ----------------------------------------------------------

    /// Persist a finished run. Fatal runs pass `SyncRunStatus::Failed` and
    /// the error text as `details`.
    pub fn record_sync_run(
        &self,
        result: &SyncResult,
        status: SyncRunStatus,
        details: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let errors_json = if result.errors.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&result.errors)?)
        };
        let details = details.map(str::to_string).or(errors_json);
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sync_runs (run_id, profile, direction, status, started_at, completed_at,
                                    created, updated, enabled, disabled, skipped, errors, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                result.run_id.to_string(),
                result.profile,
                result.direction.to_string(),
                status.to_string(),
                result.started_at.to_rfc3339(),
                result.completed_at.map(|t| t.to_rfc3339()),
                result.created as i64,
                result.updated as i64,
                result.enabled as i64,
                result.disabled as i64,
                result.skipped as i64,
                result.errors.len() as i64,
                details,
            ],
        )?;
        debug!(run_id = %result.run_id, profile = %result.profile, %status, "recorded sync run");
        Ok(())
    }

    /// Most recent runs of a profile first.
    pub fn list_sync_runs(&self, profile: &str, limit: u32) -> Result<Vec<SyncRunEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT run_id, profile, direction, status, started_at, completed_at,
                    created, updated, enabled, disabled, skipped, errors, details
             FROM sync_runs WHERE profile = ?1 ORDER BY started_at DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![profile, limit], |row| {
                let started_at: String = row.get(4)?;
                let completed_at: Option<String> = row.get(5)?;
                Ok(SyncRunEntry {
                    run_id: row.get(0)?,
                    profile: row.get(1)?,
                    direction: row.get(2)?,
                    status: row.get(3)?,
                    started_at: parse_datetime(&started_at),
                    completed_at: completed_at.as_deref().map(parse_datetime),
                    created: row.get(6)?,
                    updated: row.get(7)?,
                    enabled: row.get(8)?,
                    disabled: row.get(9)?,
                    skipped: row.get(10)?,
                    errors: row.get(11)?,
                    details: row.get(12)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

/// Parse an RFC 3339 timestamp, falling back to now.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SyncDirection, SyncOutcome};

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_audit_log() {
        let db = setup_db();
        db.insert_audit_log("sync_to_local", Some("corp"), None, Some("created: 1"), true)
            .unwrap();
        db.insert_audit_log("sync_failed", Some("corp"), None, Some("bind rejected"), false)
            .unwrap();

        let entries = db.list_audit_log(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "sync_failed");
        assert!(!entries[0].success);
        assert_eq!(db.count_audit_log().unwrap(), 2);
        assert_eq!(db.count_errors().unwrap(), 1);
    }

    #[test]
    fn test_kv_state() {
        let db = setup_db();
        assert!(db.get_state("foo").unwrap().is_none());
        db.set_state("foo", "bar").unwrap();
        assert_eq!(db.get_state("foo").unwrap().as_deref(), Some("bar"));
        db.set_state("foo", "baz").unwrap();
        assert_eq!(db.get_state("foo").unwrap().as_deref(), Some("baz"));
    }

    #[test]
    fn test_sync_runs() {
        let db = setup_db();
        let mut result = SyncResult::new("corp", SyncDirection::ToLocal);
        result.record(SyncOutcome::Created);
        result.record_failure("jdoe", "rejected");
        result.finish();
        db.record_sync_run(&result, result.status(), None).unwrap();

        let runs = db.list_sync_runs("corp", 5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, result.run_id.to_string());
        assert_eq!(runs[0].status, "completed_with_errors");
        assert_eq!(runs[0].created, 1);
        assert_eq!(runs[0].errors, 1);
        assert!(runs[0].details.as_deref().unwrap().contains("rejected"));
        assert!(db.list_sync_runs("other", 5).unwrap().is_empty());
    }
}
