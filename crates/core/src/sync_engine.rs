//! Directory to identity store synchronization.
//!
//! The [`SyncEngine`] owns one profile. Each run connects with its own
//! directory client, binds, enumerates and closes the client again on every
//! exit path. Every identity goes through the same small state machine:
//!
//! 1. Check `userAccountControl` ([`crate::account_control`]).
//! 2. Match the entry against the store (GUID, samAccountName, UPN).
//! 3. [`plan`] decides between create, update, enable, disable or skip.
//! 4. Apply the plan; a failure is recorded and the batch moves on.
//!
//! Scheduled runs hold a lock so the same engine never runs two batches at
//! once. Login sync does not take the lock.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::account_control::{evaluate_entry, AccountDecision, RestrictionViolation};
use crate::config::{DuplicateEmailPolicy, ProfileConfig};
use crate::directory::entry::attr;
use crate::directory::filter::{guid_filter, users_filter};
use crate::directory::{DirectoryClient, DirectoryConnector, DirectoryEntry, SearchRequest};
use crate::errors::{StoreError, SyncError};
use crate::groups::GroupResolver;
use crate::identifier::guid_to_bytes;
use crate::identity::{
    match_local_identity, AttributeMapper, AttributeValue, Credentials, IdentityDelta,
    IdentityStore, LocalIdentity, NewIdentity, PrincipalResolver,
};
use crate::models::{SyncDirection, SyncOutcome, SyncResult};

/// Disable reason for synced identities whose directory object is gone.
pub const MISSING_IN_DIRECTORY_REASON: &str = "no longer found in directory";

/// Attributes every user search requests besides the mapped ones.
const IDENTITY_ATTRIBUTES: &[&str] = &[
    "objectGUID",
    "objectSid",
    "sAMAccountName",
    "userPrincipalName",
    "userAccountControl",
    "mail",
];

/// Extra attributes a login lookup needs for group resolution.
const MEMBERSHIP_ATTRIBUTES: &[&str] = &["memberOf", "primaryGroupID"];

/// Meta key whose value is written to the identity's email column.
const EMAIL_META_KEY: &str = "email";

// ---------------------------------------------------------------------------
// Host hooks
// ---------------------------------------------------------------------------

/// Called before a batch run so the host can lift its execution-time limit.
pub trait ExecutionLimit: Send + Sync {
    fn extend(&self, profile: &str);
}

/// Hosts without an execution-time limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

impl ExecutionLimit for Unlimited {
    fn extend(&self, profile: &str) {
        debug!(profile, "no execution limit to extend");
    }
}

// ---------------------------------------------------------------------------
// Identity state machine
// ---------------------------------------------------------------------------

/// What to do with one directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedAction {
    Create,
    Update,
    /// Re-enable a disabled identity, then refresh it.
    Enable,
    /// Disable without touching attributes.
    Disable(RestrictionViolation),
    /// Restricted but imported: create, then disable locally.
    CreateDisabled(RestrictionViolation),
    /// Restricted but imported: refresh, then disable locally.
    UpdateDisabled(RestrictionViolation),
    /// Restricted and unknown locally.
    Skip(RestrictionViolation),
}

/// Decide the transition for one identity.
pub fn plan(
    existing: Option<&LocalIdentity>,
    decision: AccountDecision,
    import_restricted: bool,
) -> PlannedAction {
    match (existing, decision) {
        (None, AccountDecision::Allowed) => PlannedAction::Create,
        (None, AccountDecision::Restricted(v)) if import_restricted => PlannedAction::CreateDisabled(v),
        (None, AccountDecision::Restricted(v)) => PlannedAction::Skip(v),
        (Some(local), AccountDecision::Allowed) if local.disabled => PlannedAction::Enable,
        (Some(_), AccountDecision::Allowed) => PlannedAction::Update,
        (Some(_), AccountDecision::Restricted(v)) if import_restricted => PlannedAction::UpdateDisabled(v),
        (Some(_), AccountDecision::Restricted(v)) => PlannedAction::Disable(v),
    }
}

/// Result of applying a plan to one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub outcome: SyncOutcome,
    /// Local identity, if one exists after the step.
    pub identity_id: Option<i64>,
    pub restriction: Option<RestrictionViolation>,
}

/// Result of [`SyncEngine::sync_on_login`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The identity was synchronized. `restriction` is set when it ended
    /// up disabled.
    Synced {
        id: i64,
        outcome: SyncOutcome,
        restriction: Option<RestrictionViolation>,
    },
    /// The directory refused the credentials.
    Denied,
    /// Bound, but no person entry matches the login.
    NotFound,
    /// The entry is not a member of any configured sync group.
    NotInSyncGroups,
    /// Restricted and unknown locally; nothing was created.
    Skipped(RestrictionViolation),
}

impl LoginOutcome {
    /// Whether the host should let the login through.
    pub fn is_allowed(&self) -> bool {
        matches!(self, LoginOutcome::Synced { restriction: None, .. })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Synchronization engine for one profile.
pub struct SyncEngine {
    profile: ProfileConfig,
    connector: Arc<dyn DirectoryConnector>,
    store: Arc<dyn IdentityStore>,
    mapper: AttributeMapper,
    resolver: PrincipalResolver,
    groups: GroupResolver,
    limit: Arc<dyn ExecutionLimit>,
    /// Atomic flag preventing concurrent batch runs.
    running: Arc<AtomicBool>,
    run_started_at: Mutex<Option<DateTime<Utc>>>,
}

impl SyncEngine {
    pub fn new(
        profile: ProfileConfig,
        connector: Arc<dyn DirectoryConnector>,
        store: Arc<dyn IdentityStore>,
    ) -> Self {
        info!(profile = %profile.name, "initializing sync engine");
        let mapper = AttributeMapper::new(profile.attributes.clone());
        let resolver = PrincipalResolver::new(profile.directory.allow_down_level_logon_name);
        let mut groups = GroupResolver::new();
        if let Some(dn) = &profile.directory.fallback_primary_group {
            groups = groups.with_fallback_primary_group(dn.clone());
        }
        Self {
            profile,
            connector,
            store,
            mapper,
            resolver,
            groups,
            limit: Arc::new(Unlimited),
            running: Arc::new(AtomicBool::new(false)),
            run_started_at: Mutex::new(None),
        }
    }

    pub fn with_execution_limit(mut self, limit: Arc<dyn ExecutionLimit>) -> Self {
        self.limit = limit;
        self
    }

    pub fn profile(&self) -> &ProfileConfig {
        &self.profile
    }

    pub fn mapper(&self) -> &AttributeMapper {
        &self.mapper
    }

    pub(crate) fn store(&self) -> &dyn IdentityStore {
        self.store.as_ref()
    }

    pub(crate) fn limit(&self) -> &dyn ExecutionLimit {
        self.limit.as_ref()
    }

    /// Check if a batch run is currently in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Run lifecycle helpers
    // -----------------------------------------------------------------------

    /// Take the batch lock. Released when the guard drops.
    pub(crate) fn acquire(&self) -> Result<SyncLockGuard<'_>, SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let started_at = self
                .started_at_slot()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".into());
            return Err(SyncError::AlreadyRunning { started_at });
        }
        *self.run_started_at_lock() = Some(Utc::now());
        Ok(SyncLockGuard { engine: self })
    }

    fn started_at_slot(&self) -> Option<DateTime<Utc>> {
        *self.run_started_at_lock()
    }

    fn run_started_at_lock(&self) -> std::sync::MutexGuard<'_, Option<DateTime<Utc>>> {
        self.run_started_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn ensure_enabled(&self, direction: SyncDirection) -> Result<(), SyncError> {
        let sync = &self.profile.sync;
        let enabled = match direction {
            SyncDirection::ToLocal => sync.to_local_enabled,
            SyncDirection::ToDirectory => sync.to_directory_enabled,
            SyncDirection::Login => sync.login_sync_enabled,
        };
        if enabled {
            Ok(())
        } else {
            Err(SyncError::DirectionDisabled {
                profile: self.profile.name.clone(),
                direction: direction.to_string(),
            })
        }
    }

    /// Connect and bind as the service account.
    ///
    /// The client is closed again before any error is returned.
    pub(crate) async fn connect_service_account(&self) -> Result<Box<dyn DirectoryClient>, SyncError> {
        let account = self
            .profile
            .service_account
            .as_ref()
            .filter(|sa| sa.password.is_some())
            .ok_or_else(|| SyncError::MissingServiceAccount {
                profile: self.profile.name.clone(),
            })?;
        let password = account.password.as_deref().unwrap_or_default();

        let mut client = self.connector.connect(&self.profile.connection()).await?;
        match client.bind(&account.username, password).await {
            Ok(true) => {
                debug!(server = client.server(), username = %account.username, "service account bound");
                Ok(client)
            }
            Ok(false) => {
                close_quietly(client.as_mut()).await;
                Err(SyncError::BindRejected {
                    username: account.username.clone(),
                })
            }
            Err(e) => {
                close_quietly(client.as_mut()).await;
                Err(e.into())
            }
        }
    }

    fn identity_attributes(&self, with_membership: bool) -> Vec<String> {
        let mut seen = HashSet::new();
        let extra = if with_membership { MEMBERSHIP_ATTRIBUTES } else { &[] };
        IDENTITY_ATTRIBUTES
            .iter()
            .chain(extra.iter())
            .map(|s| s.to_string())
            .chain(self.mapper.directory_attributes())
            .filter(|a| seen.insert(a.to_ascii_lowercase()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Connect, bind with the service account and read the base entry.
    /// Returns the base DN in use.
    #[instrument(skip(self), fields(profile = %self.profile.name))]
    pub async fn verify_connection(&self) -> Result<String, SyncError> {
        let mut client = self.connect_service_account().await?;
        let base_dn = client.base_dn().to_string();
        let result = client.search(&SearchRequest::base(base_dn.as_str())).await;
        close_quietly(client.as_mut()).await;

        let entries = result?;
        info!(base_dn = %base_dn, found = entries.len(), "directory connection verified");
        Ok(base_dn)
    }

    /// Full directory to store run.
    #[instrument(skip(self), fields(profile = %self.profile.name))]
    pub async fn sync_to_local(&self) -> Result<SyncResult, SyncError> {
        self.ensure_enabled(SyncDirection::ToLocal)?;
        let _guard = self.acquire()?;
        self.limit().extend(&self.profile.name);

        let mut result = SyncResult::new(&self.profile.name, SyncDirection::ToLocal);
        let mut client = self.connect_service_account().await?;
        let body = self.run_to_local(client.as_mut(), &mut result).await;
        close_quietly(client.as_mut()).await;
        body?;

        result.finish();
        info!(
            run_id = %result.run_id,
            summary = %result.summary(),
            "sync to local store completed"
        );
        Ok(result)
    }

    async fn run_to_local(
        &self,
        client: &mut dyn DirectoryClient,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        let sync = &self.profile.sync;
        let request = SearchRequest::subtree(users_filter(&sync.security_groups))
            .attributes(self.identity_attributes(false))
            .paged(self.profile.directory.page_size);
        let entries = client.search(&request).await?;
        info!(entries = entries.len(), "enumerated directory users");

        let mut seen_guids = HashSet::new();
        for entry in &entries {
            if let Ok(Some(guid)) = entry.object_guid() {
                seen_guids.insert(guid);
            }
            let label = entry_label(entry);
            match self.sync_entry(entry).await {
                Ok(applied) => {
                    debug!(identity = %label, outcome = %applied.outcome, "identity processed");
                    result.record(applied.outcome);
                }
                Err(e) => {
                    warn!(identity = %label, error = %e, "identity sync failed");
                    result.record_failure(label, e.to_string());
                }
            }
        }

        if sync.disable_missing {
            self.disable_missing(client, &seen_guids, result).await?;
        }
        Ok(())
    }

    /// Disable synced identities whose GUID was not enumerated and cannot
    /// be found in the directory either.
    async fn disable_missing(
        &self,
        client: &mut dyn DirectoryClient,
        seen_guids: &HashSet<String>,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        let candidates: Vec<LocalIdentity> = self
            .store
            .list_synced()
            .await?
            .into_iter()
            .filter(|identity| !identity.disabled)
            .filter(|identity| {
                identity
                    .object_guid
                    .as_ref()
                    .is_some_and(|guid| !seen_guids.contains(guid))
            })
            .collect();
        debug!(candidates = candidates.len(), "checking identities missing from enumeration");

        for identity in candidates {
            match self.confirm_missing(client, &identity).await {
                Ok(true) => {
                    if let Err(e) = self.store.disable(identity.id, MISSING_IN_DIRECTORY_REASON).await {
                        warn!(identity = %identity.login, error = %e, "failed to disable missing identity");
                        result.record_failure(identity.login.clone(), e.to_string());
                        continue;
                    }
                    info!(identity = %identity.login, "disabled identity missing from directory");
                    result.record(SyncOutcome::Disabled);
                }
                Ok(false) => {
                    debug!(identity = %identity.login, "identity still resolvable, outside sync scope");
                }
                Err(e) => {
                    warn!(identity = %identity.login, error = %e, "could not confirm missing identity");
                    result.record_failure(identity.login.clone(), e.to_string());
                }
            }
        }
        Ok(())
    }

    async fn confirm_missing(
        &self,
        client: &mut dyn DirectoryClient,
        identity: &LocalIdentity,
    ) -> Result<bool, SyncError> {
        let Some(guid) = identity.object_guid.as_deref() else {
            return Ok(false);
        };
        let request = SearchRequest::subtree(guid_filter(&guid_to_bytes(guid)?)).attributes(["objectGUID"]);
        Ok(client.search(&request).await?.is_empty())
    }

    /// Synchronize the identity behind a login.
    ///
    /// Binds as the user; invalid credentials give [`LoginOutcome::Denied`]
    /// and never touch the store.
    #[instrument(skip(self, password), fields(profile = %self.profile.name))]
    pub async fn sync_on_login(&self, raw_login: &str, password: &str) -> Result<LoginOutcome, SyncError> {
        self.ensure_enabled(SyncDirection::Login)?;
        let mut credentials = self.resolver.resolve(raw_login, Some(password));
        if password.is_empty() || credentials.sam_account_name.is_empty() {
            // An empty password is an unauthenticated bind, which succeeds.
            return Ok(LoginOutcome::Denied);
        }

        let mut client = self.connector.connect(&self.profile.connection()).await?;
        let body = self.run_login(client.as_mut(), &mut credentials, password).await;
        close_quietly(client.as_mut()).await;
        body
    }

    async fn run_login(
        &self,
        client: &mut dyn DirectoryClient,
        credentials: &mut Credentials,
        password: &str,
    ) -> Result<LoginOutcome, SyncError> {
        let bind_name = self.bind_name(credentials);
        if !client.bind(&bind_name, password).await? {
            info!(login = %credentials.raw_login, "directory refused login credentials");
            return Ok(LoginOutcome::Denied);
        }

        let attributes = self.identity_attributes(true);
        let Some(entry) = self
            .resolver
            .find_principal(client, credentials, &attributes)
            .await?
        else {
            return Ok(LoginOutcome::NotFound);
        };
        self.resolver.backfill(credentials, &entry)?;

        let sync_groups = &self.profile.sync.security_groups;
        if !sync_groups.is_empty() {
            let membership = self
                .groups
                .all_groups_of(client, &entry, self.profile.sync.recursive_groups)
                .await;
            if !sync_groups.iter().any(|g| membership.contains(g)) {
                info!(login = %credentials.raw_login, "login outside configured sync groups");
                return Ok(LoginOutcome::NotInSyncGroups);
            }
        }

        let applied = self.apply(&entry, credentials).await?;
        Ok(match (applied.identity_id, applied.restriction) {
            (Some(id), restriction) => LoginOutcome::Synced {
                id,
                outcome: applied.outcome,
                restriction,
            },
            (None, Some(violation)) => LoginOutcome::Skipped(violation),
            (None, None) => LoginOutcome::NotFound,
        })
    }

    /// Name used for the user bind: UPN, then `DOMAIN\sam`, then the bare
    /// login with the configured account suffix.
    fn bind_name(&self, credentials: &Credentials) -> String {
        if let Some(upn) = &credentials.user_principal_name {
            return upn.clone();
        }
        if let Some(domain) = &credentials.netbios_domain {
            return format!("{}\\{}", domain, credentials.sam_account_name);
        }
        match &self.profile.directory.account_suffix {
            Some(suffix) => format!("{}@{}", credentials.sam_account_name, suffix.trim_start_matches('@')),
            None => credentials.raw_login.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Single identity
    // -----------------------------------------------------------------------

    /// Process one enumerated entry.
    pub async fn sync_entry(&self, entry: &DirectoryEntry) -> Result<Applied, SyncError> {
        let sam = entry
            .sam_account_name()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SyncError::MissingAttribute {
                dn: entry.dn().to_string(),
                attribute: "sAMAccountName".into(),
            })?;
        let mut credentials = self.resolver.resolve(&sam, None);
        self.resolver.backfill(&mut credentials, entry)?;
        self.apply(entry, &credentials).await
    }

    async fn apply(&self, entry: &DirectoryEntry, credentials: &Credentials) -> Result<Applied, SyncError> {
        let decision = evaluate_entry(entry);
        let existing = match_local_identity(self.store.as_ref(), credentials, entry).await?;
        let import = self.profile.sync.import_disabled_accounts;
        let action = plan(existing.as_ref().map(|(local, _)| local), decision, import);
        debug!(dn = entry.dn(), ?action, matched_by = ?existing.as_ref().map(|(_, by)| *by), "planned identity");

        let mapped = self.mapper.map(entry);
        let applied = match (action, existing) {
            (PlannedAction::Create, _) => {
                let id = self.create(entry, credentials, mapped, None).await?;
                Applied::new(SyncOutcome::Created, Some(id), None)
            }
            (PlannedAction::CreateDisabled(v), _) => {
                let id = self.create(entry, credentials, mapped, Some(v)).await?;
                Applied::new(SyncOutcome::Disabled, Some(id), Some(v))
            }
            (PlannedAction::Skip(v), _) => {
                debug!(dn = entry.dn(), reason = v.reason(), "restricted account skipped");
                Applied::new(SyncOutcome::Skipped, None, Some(v))
            }
            (PlannedAction::Update, Some((local, _))) => {
                let changed = self.refresh(&local, credentials, &mapped).await?;
                let outcome = if changed { SyncOutcome::Updated } else { SyncOutcome::Unchanged };
                Applied::new(outcome, Some(local.id), None)
            }
            (PlannedAction::Enable, Some((local, _))) => {
                // Attributes first, so a failed refresh leaves the identity disabled.
                self.refresh(&local, credentials, &mapped).await?;
                self.store.enable(local.id).await?;
                info!(identity = %local.login, "re-enabled identity");
                // The restored email is only comparable once enabled.
                let reloaded = self
                    .store
                    .find_by_id(local.id)
                    .await?
                    .ok_or(StoreError::NotFound(local.id))?;
                if let Err(e) = self.refresh(&reloaded, credentials, &mapped).await {
                    warn!(identity = %local.login, error = %e, "email refresh after enable failed");
                }
                Applied::new(SyncOutcome::Enabled, Some(local.id), None)
            }
            (PlannedAction::UpdateDisabled(v), Some((local, _))) => {
                let changed = self.refresh(&local, credentials, &mapped).await?;
                let outcome = self.disable_for(&local, v).await?;
                let outcome = match (outcome, changed) {
                    (SyncOutcome::Unchanged, true) => SyncOutcome::Updated,
                    (outcome, _) => outcome,
                };
                Applied::new(outcome, Some(local.id), Some(v))
            }
            (PlannedAction::Disable(v), Some((local, _))) => {
                let outcome = self.disable_for(&local, v).await?;
                Applied::new(outcome, Some(local.id), Some(v))
            }
            (action, None) => {
                // plan() only yields these with an existing identity.
                warn!(?action, dn = entry.dn(), "planned action without local identity");
                Applied::new(SyncOutcome::Skipped, None, decision.violation())
            }
        };
        Ok(applied)
    }

    async fn disable_for(&self, local: &LocalIdentity, violation: RestrictionViolation) -> Result<SyncOutcome, SyncError> {
        if local.disabled && local.disabled_reason.as_deref() == Some(violation.reason()) {
            return Ok(SyncOutcome::Unchanged);
        }
        self.store.disable(local.id, violation.reason()).await?;
        info!(identity = %local.login, reason = violation.reason(), "disabled identity");
        Ok(SyncOutcome::Disabled)
    }

    async fn create(
        &self,
        entry: &DirectoryEntry,
        credentials: &Credentials,
        mapped: BTreeMap<String, AttributeValue>,
        restriction: Option<RestrictionViolation>,
    ) -> Result<i64, SyncError> {
        let email = mapped
            .get(EMAIL_META_KEY)
            .and_then(AttributeValue::as_text)
            .map(str::to_string);
        if let (Some(email), DuplicateEmailPolicy::Prevent) = (&email, self.profile.sync.duplicate_email) {
            if let Some(owner) = self.store.find_by_email(email).await? {
                return Err(StoreError::DuplicateEmail {
                    email: email.clone(),
                    owner: owner.id,
                }
                .into());
            }
        }

        let identity = NewIdentity {
            login: self.new_login(credentials),
            email,
            object_guid: entry.object_guid()?.or_else(|| credentials.object_guid.clone()),
            sam_account_name: Some(credentials.sam_account_name.clone()),
            user_principal_name: credentials.user_principal_name.clone(),
            domain_sid: credentials.domain_sid.clone(),
            attributes: mapped.into_iter().filter(|(_, v)| !v.is_empty()).collect(),
            disabled_reason: restriction.map(|v| v.reason().to_string()),
        };
        let login = identity.login.clone();
        let id = self.store.create(identity).await?;
        match restriction {
            Some(v) => info!(id, login = %login, reason = v.reason(), "created disabled identity"),
            None => info!(id, login = %login, "created identity"),
        }
        Ok(id)
    }

    fn new_login(&self, credentials: &Credentials) -> String {
        match (&credentials.upn_suffix, self.profile.sync.append_suffix_to_new_users) {
            (Some(suffix), true) => format!("{}@{}", credentials.sam_account_name, suffix),
            _ => credentials.sam_account_name.clone(),
        }
    }

    /// Write the changed fields. Returns whether anything changed.
    async fn refresh(
        &self,
        local: &LocalIdentity,
        credentials: &Credentials,
        mapped: &BTreeMap<String, AttributeValue>,
    ) -> Result<bool, SyncError> {
        let delta = identity_delta(local, credentials, mapped);
        if delta.is_empty() {
            return Ok(false);
        }
        self.store.update(local.id, delta).await?;
        debug!(identity = %local.login, "updated identity");
        Ok(true)
    }
}

impl Applied {
    fn new(outcome: SyncOutcome, identity_id: Option<i64>, restriction: Option<RestrictionViolation>) -> Self {
        Self {
            outcome,
            identity_id,
            restriction,
        }
    }
}

/// Fields of `local` that differ from the directory state.
fn identity_delta(
    local: &LocalIdentity,
    credentials: &Credentials,
    mapped: &BTreeMap<String, AttributeValue>,
) -> IdentityDelta {
    fn changed(current: &Option<String>, fresh: &Option<String>) -> Option<String> {
        match fresh {
            Some(value) if current.as_ref() != Some(value) => Some(value.clone()),
            _ => None,
        }
    }

    let mut delta = IdentityDelta {
        object_guid: changed(&local.object_guid, &credentials.object_guid),
        sam_account_name: changed(
            &local.sam_account_name,
            &Some(credentials.sam_account_name.clone()).filter(|s| !s.is_empty()),
        ),
        user_principal_name: changed(&local.user_principal_name, &credentials.user_principal_name),
        domain_sid: changed(&local.domain_sid, &credentials.domain_sid),
        ..IdentityDelta::default()
    };

    // The email of a disabled identity is parked by the store.
    if !local.disabled {
        delta.email = match mapped.get(EMAIL_META_KEY) {
            Some(AttributeValue::Text(email)) if local.email.as_ref() != Some(email) => Some(Some(email.clone())),
            Some(AttributeValue::Empty) if local.email.is_some() => Some(None),
            _ => None,
        };
    }

    for (key, value) in mapped {
        let current = local.attributes.get(key);
        let differs = match value {
            AttributeValue::Empty => current.is_some(),
            value => current != Some(value),
        };
        if differs {
            delta.attributes.insert(key.clone(), value.clone());
        }
    }
    delta
}

fn entry_label(entry: &DirectoryEntry) -> String {
    entry
        .sam_account_name()
        .unwrap_or_else(|| entry.dn().to_string())
}

/// Close a client, logging instead of failing.
pub(crate) async fn close_quietly(client: &mut dyn DirectoryClient) {
    if let Err(e) = client.close().await {
        warn!(server = client.server(), error = %e, "failed to close directory client");
    }
}

/// RAII guard that clears the running flag on drop (even on panic).
pub(crate) struct SyncLockGuard<'a> {
    engine: &'a SyncEngine,
}

impl Drop for SyncLockGuard<'_> {
    fn drop(&mut self) {
        *self.engine.run_started_at_lock() = None;
        self.engine.running.store(false, Ordering::SeqCst);
        debug!("sync lock released");
    }
}
