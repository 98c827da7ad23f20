//! SQLite-backed [`IdentityStore`].
//!
//! Disabling an identity moves its email into `disabled_email` so that the
//! address is free while the account is disabled; enabling moves it back.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::Database;
use crate::errors::{DatabaseError, StoreError};
use crate::identity::attributes::AttributeValue;
use crate::identity::store::{IdentityDelta, IdentityStore, LocalIdentity, NewIdentity};

const IDENTITY_COLUMNS: &str = "id, login, email, object_guid, sam_account_name, \
     user_principal_name, domain_sid, disabled, disabled_reason, attributes";

pub struct SqliteIdentityStore {
    db: Arc<Database>,
}

impl SqliteIdentityStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    fn find_by_column(&self, column: &str, value: &str) -> Result<Option<LocalIdentity>, StoreError> {
        let conn = self.db.conn();
        Ok(select_one(&conn, column, value)?)
    }
}

fn row_to_identity(row: &Row<'_>) -> rusqlite::Result<(LocalIdentity, String)> {
    let attributes: String = row.get(9)?;
    Ok((
        LocalIdentity {
            id: row.get(0)?,
            login: row.get(1)?,
            email: row.get(2)?,
            object_guid: row.get(3)?,
            sam_account_name: row.get(4)?,
            user_principal_name: row.get(5)?,
            domain_sid: row.get(6)?,
            disabled: row.get(7)?,
            disabled_reason: row.get(8)?,
            attributes: BTreeMap::new(),
        },
        attributes,
    ))
}

fn with_attributes((mut identity, json): (LocalIdentity, String)) -> Result<LocalIdentity, DatabaseError> {
    identity.attributes = serde_json::from_str(&json)?;
    Ok(identity)
}

/// First row (lowest id) whose `column` equals `value`.
fn select_one(conn: &Connection, column: &str, value: &str) -> Result<Option<LocalIdentity>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM identities WHERE {} = ?1 ORDER BY id LIMIT 1",
        IDENTITY_COLUMNS, column
    );
    conn.query_row(&sql, params![value], row_to_identity)
        .optional()?
        .map(with_attributes)
        .transpose()
}

fn select_by_id(conn: &Connection, id: i64) -> Result<Option<LocalIdentity>, DatabaseError> {
    let sql = format!("SELECT {} FROM identities WHERE id = ?1", IDENTITY_COLUMNS);
    conn.query_row(&sql, params![id], row_to_identity)
        .optional()?
        .map(with_attributes)
        .transpose()
}

fn require(conn: &Connection, id: i64) -> Result<LocalIdentity, StoreError> {
    select_by_id(conn, id)?.ok_or(StoreError::NotFound(id))
}

fn apply_delta(identity: &mut LocalIdentity, delta: IdentityDelta) {
    if let Some(email) = delta.email {
        identity.email = email;
    }
    if let Some(guid) = delta.object_guid {
        identity.object_guid = Some(guid);
    }
    if let Some(sam) = delta.sam_account_name {
        identity.sam_account_name = Some(sam);
    }
    if let Some(upn) = delta.user_principal_name {
        identity.user_principal_name = Some(upn);
    }
    if let Some(sid) = delta.domain_sid {
        identity.domain_sid = Some(sid);
    }
    for (key, value) in delta.attributes {
        if value.is_empty() {
            identity.attributes.remove(&key);
        } else {
            identity.attributes.insert(key, value);
        }
    }
}

fn non_empty(attributes: BTreeMap<String, AttributeValue>) -> BTreeMap<String, AttributeValue> {
    attributes.into_iter().filter(|(_, v)| !v.is_empty()).collect()
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn create(&self, identity: NewIdentity) -> Result<i64, StoreError> {
        let attributes = serde_json::to_string(&non_empty(identity.attributes)).map_err(DatabaseError::from)?;
        let now = Utc::now().to_rfc3339();
        let conn = self.db.conn();

        let taken: Option<i64> = conn
            .query_row(
                "SELECT id FROM identities WHERE login = ?1",
                params![identity.login],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::from)?;
        if let Some(owner) = taken {
            return Err(StoreError::WriteRejected {
                login: identity.login,
                detail: format!("login already used by identity {}", owner),
            });
        }

        let disabled = identity.disabled_reason.is_some();
        let (email, disabled_email) = if disabled {
            (None, identity.email.as_deref())
        } else {
            (identity.email.as_deref(), None)
        };
        conn.execute(
            "INSERT INTO identities (login, email, object_guid, sam_account_name,
                 user_principal_name, domain_sid, attributes, disabled, disabled_reason,
                 disabled_email, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                identity.login,
                email,
                identity.object_guid,
                identity.sam_account_name,
                identity.user_principal_name,
                identity.domain_sid,
                attributes,
                disabled,
                identity.disabled_reason,
                disabled_email,
                now,
            ],
        )
        .map_err(|e| StoreError::WriteRejected {
            login: identity.login.clone(),
            detail: e.to_string(),
        })?;
        let id = conn.last_insert_rowid();
        info!(id, login = %identity.login, disabled, "created identity");
        Ok(id)
    }

    async fn update(&self, id: i64, delta: IdentityDelta) -> Result<(), StoreError> {
        let mut conn = self.db.conn();
        let tx = conn.transaction().map_err(DatabaseError::from)?;
        let mut identity = require(&tx, id)?;
        apply_delta(&mut identity, delta);

        let attributes = serde_json::to_string(&identity.attributes).map_err(DatabaseError::from)?;
        tx.execute(
            "UPDATE identities SET email = ?2, object_guid = ?3, sam_account_name = ?4,
                 user_principal_name = ?5, domain_sid = ?6, attributes = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                id,
                identity.email,
                identity.object_guid,
                identity.sam_account_name,
                identity.user_principal_name,
                identity.domain_sid,
                attributes,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| StoreError::WriteRejected {
            login: identity.login.clone(),
            detail: e.to_string(),
        })?;
        tx.commit().map_err(DatabaseError::from)?;
        debug!(id, "updated identity");
        Ok(())
    }

    async fn disable(&self, id: i64, reason: &str) -> Result<(), StoreError> {
        let conn = self.db.conn();
        let identity = require(&conn, id)?;
        if identity.disabled {
            conn.execute(
                "UPDATE identities SET disabled_reason = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, reason, Utc::now().to_rfc3339()],
            )
            .map_err(DatabaseError::from)?;
            return Ok(());
        }
        conn.execute(
            "UPDATE identities SET disabled = 1, disabled_reason = ?2,
                 disabled_email = email, email = NULL, updated_at = ?3
             WHERE id = ?1",
            params![id, reason, Utc::now().to_rfc3339()],
        )
        .map_err(DatabaseError::from)?;
        info!(id, login = %identity.login, reason, "disabled identity");
        Ok(())
    }

    async fn enable(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.db.conn();
        let identity = require(&conn, id)?;
        conn.execute(
            "UPDATE identities SET disabled = 0, disabled_reason = NULL,
                 email = COALESCE(disabled_email, email), disabled_email = NULL, updated_at = ?2
             WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )
        .map_err(DatabaseError::from)?;
        info!(id, login = %identity.login, "enabled identity");
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<LocalIdentity>, StoreError> {
        let conn = self.db.conn();
        Ok(select_by_id(&conn, id)?)
    }

    async fn find_by_guid(&self, guid: &str) -> Result<Option<LocalIdentity>, StoreError> {
        self.find_by_column("object_guid", guid)
    }

    async fn find_by_sam_account_name(&self, sam: &str) -> Result<Option<LocalIdentity>, StoreError> {
        self.find_by_column("sam_account_name", sam)
    }

    async fn find_by_user_principal_name(&self, upn: &str) -> Result<Option<LocalIdentity>, StoreError> {
        self.find_by_column("user_principal_name", upn)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<LocalIdentity>, StoreError> {
        self.find_by_column("email", email)
    }

    async fn list_synced(&self) -> Result<Vec<LocalIdentity>, StoreError> {
        let conn = self.db.conn();
        let sql = format!(
            "SELECT {} FROM identities WHERE object_guid IS NOT NULL ORDER BY id",
            IDENTITY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(DatabaseError::from)?;
        let rows = stmt
            .query_map([], row_to_identity)
            .map_err(DatabaseError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::from)?;
        Ok(rows
            .into_iter()
            .map(with_attributes)
            .collect::<Result<Vec<_>, _>>()?)
    }
}
