//! Finding the local identity that corresponds to a directory entry.

use tracing::debug;

use crate::directory::DirectoryEntry;
use crate::errors::StoreError;

use super::principal::Credentials;
use super::store::{IdentityStore, LocalIdentity};

/// Which identifier linked the entry to the local identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    ObjectGuid,
    SamAccountName,
    UserPrincipalName,
}

/// GUID first, then samAccountName, then UPN. First hit wins.
///
/// Values from the entry take precedence over the (possibly not yet
/// back-filled) credentials.
pub async fn match_local_identity(
    store: &dyn IdentityStore,
    credentials: &Credentials,
    entry: &DirectoryEntry,
) -> Result<Option<(LocalIdentity, MatchedBy)>, StoreError> {
    let guid = entry
        .object_guid()
        .ok()
        .flatten()
        .or_else(|| credentials.object_guid.clone());
    if let Some(guid) = guid {
        if let Some(found) = store.find_by_guid(&guid).await? {
            debug!(id = found.id, guid = %guid, "matched by objectGUID");
            return Ok(Some((found, MatchedBy::ObjectGuid)));
        }
    }

    let sam = entry
        .sam_account_name()
        .unwrap_or_else(|| credentials.sam_account_name.clone());
    if !sam.is_empty() {
        if let Some(found) = store.find_by_sam_account_name(&sam).await? {
            debug!(id = found.id, sam = %sam, "matched by samAccountName");
            return Ok(Some((found, MatchedBy::SamAccountName)));
        }
    }

    let upn = entry
        .user_principal_name()
        .or_else(|| credentials.user_principal_name.clone());
    if let Some(upn) = upn.filter(|u| !u.is_empty()) {
        if let Some(found) = store.find_by_user_principal_name(&upn).await? {
            debug!(id = found.id, upn = %upn, "matched by userPrincipalName");
            return Ok(Some((found, MatchedBy::UserPrincipalName)));
        }
    }

    Ok(None)
}
