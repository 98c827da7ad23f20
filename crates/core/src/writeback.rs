//! Store to directory synchronization.
//!
//! Pushes the local values of every `sync_to_directory` attribute back to
//! the directory object with the same GUID. Only differing attributes are
//! replaced; a rejected modify only fails that identity.

use tracing::{debug, info, instrument, warn};

use crate::directory::filter::guid_filter;
use crate::directory::{DirectoryClient, SearchRequest};
use crate::errors::{DirectoryError, SyncError};
use crate::identifier::guid_to_bytes;
use crate::identity::LocalIdentity;
use crate::models::{SyncDirection, SyncOutcome, SyncResult};
use crate::sync_engine::{close_quietly, SyncEngine};

impl SyncEngine {
    /// Full store to directory run.
    #[instrument(skip(self), fields(profile = %self.profile().name))]
    pub async fn sync_to_directory(&self) -> Result<SyncResult, SyncError> {
        self.ensure_enabled(SyncDirection::ToDirectory)?;
        let _guard = self.acquire()?;
        self.limit().extend(&self.profile().name);

        let mut result = SyncResult::new(&self.profile().name, SyncDirection::ToDirectory);
        if !self.mapper().has_writeback() {
            info!("no attribute is marked for directory sync, nothing to do");
            result.finish();
            return Ok(result);
        }

        let mut client = self.connect_service_account().await?;
        let body = self.run_to_directory(client.as_mut(), &mut result).await;
        close_quietly(client.as_mut()).await;
        body?;

        result.finish();
        info!(
            run_id = %result.run_id,
            summary = %result.summary(),
            "sync to directory completed"
        );
        Ok(result)
    }

    async fn run_to_directory(
        &self,
        client: &mut dyn DirectoryClient,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        let identities = self.store().list_synced().await?;
        info!(identities = identities.len(), "pushing local attributes");

        for identity in identities {
            if identity.disabled {
                debug!(identity = %identity.login, "disabled identity not written back");
                result.record(SyncOutcome::Skipped);
                continue;
            }
            match self.write_back(client, &identity).await {
                Ok(outcome) => result.record(outcome),
                Err(e) => {
                    warn!(identity = %identity.login, error = %e, "writeback failed");
                    result.record_failure(identity.login.clone(), e.to_string());
                }
            }
        }
        Ok(())
    }

    async fn write_back(
        &self,
        client: &mut dyn DirectoryClient,
        identity: &LocalIdentity,
    ) -> Result<SyncOutcome, SyncError> {
        let Some(guid) = identity.object_guid.as_deref() else {
            return Ok(SyncOutcome::Skipped);
        };

        let mut attributes = vec!["objectGUID".to_string()];
        attributes.extend(
            self.mapper()
                .definitions()
                .iter()
                .filter(|d| d.sync_to_directory)
                .map(|d| d.directory_attribute.clone()),
        );
        let request = SearchRequest::subtree(guid_filter(&guid_to_bytes(guid)?)).attributes(attributes);
        let Some(entry) = client.search(&request).await?.into_iter().next() else {
            debug!(identity = %identity.login, guid, "no directory object for identity");
            return Ok(SyncOutcome::Skipped);
        };

        let deltas = self.mapper().directory_deltas(&identity.attributes, &entry);
        if deltas.is_empty() {
            return Ok(SyncOutcome::Unchanged);
        }

        let names: Vec<&str> = deltas.iter().map(|d| d.name.as_str()).collect();
        if client.modify(entry.dn(), &deltas).await? {
            info!(identity = %identity.login, attributes = ?names, "directory attributes updated");
            Ok(SyncOutcome::Updated)
        } else {
            Err(DirectoryError::Modify {
                dn: entry.dn().to_string(),
                detail: format!("server rejected replace of {}", names.join(", ")),
            }
            .into())
        }
    }
}
