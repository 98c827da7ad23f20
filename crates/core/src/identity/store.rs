//! Contract of the local identity store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

use super::attributes::AttributeValue;

/// An identity as held by the local store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub id: i64,
    pub login: String,
    pub email: Option<String>,
    pub object_guid: Option<String>,
    pub sam_account_name: Option<String>,
    pub user_principal_name: Option<String>,
    pub domain_sid: Option<String>,
    pub disabled: bool,
    pub disabled_reason: Option<String>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

/// Fields of an identity about to be created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewIdentity {
    pub login: String,
    pub email: Option<String>,
    pub object_guid: Option<String>,
    pub sam_account_name: Option<String>,
    pub user_principal_name: Option<String>,
    pub domain_sid: Option<String>,
    pub attributes: BTreeMap<String, AttributeValue>,
    /// `Some` creates the identity already disabled, with its email parked.
    pub disabled_reason: Option<String>,
}

/// Changes to an existing identity. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityDelta {
    /// `Some(None)` clears the email.
    pub email: Option<Option<String>>,
    pub object_guid: Option<String>,
    pub sam_account_name: Option<String>,
    pub user_principal_name: Option<String>,
    pub domain_sid: Option<String>,
    /// Merged into the stored attributes; [`AttributeValue::Empty`] clears a key.
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl IdentityDelta {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.object_guid.is_none()
            && self.sam_account_name.is_none()
            && self.user_principal_name.is_none()
            && self.domain_sid.is_none()
            && self.attributes.is_empty()
    }
}

/// Local user-account storage.
///
/// Writes are last-write-wins; the engine never holds a lock across calls.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn create(&self, identity: NewIdentity) -> Result<i64, StoreError>;

    async fn update(&self, id: i64, delta: IdentityDelta) -> Result<(), StoreError>;

    /// Mark disabled. Stores keep the original email so [`enable`] can
    /// restore it.
    ///
    /// [`enable`]: IdentityStore::enable
    async fn disable(&self, id: i64, reason: &str) -> Result<(), StoreError>;

    async fn enable(&self, id: i64) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<LocalIdentity>, StoreError>;

    async fn find_by_guid(&self, guid: &str) -> Result<Option<LocalIdentity>, StoreError>;

    async fn find_by_sam_account_name(&self, sam: &str) -> Result<Option<LocalIdentity>, StoreError>;

    async fn find_by_user_principal_name(&self, upn: &str) -> Result<Option<LocalIdentity>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<LocalIdentity>, StoreError>;

    /// Every identity linked to a directory object (carries a GUID).
    async fn list_synced(&self) -> Result<Vec<LocalIdentity>, StoreError>;
}
