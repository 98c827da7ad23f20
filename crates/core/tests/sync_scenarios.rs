//! End-to-end sync scenarios.
//!
//! These tests run the real `SyncEngine` against:
//! - a scripted in-memory directory implementing `DirectoryConnector`
//! - the SQLite identity store on an in-memory database
//!
//! No network I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use adsync_core::account_control::RestrictionViolation;
use adsync_core::config::{DuplicateEmailPolicy, ProfileConfig};
use adsync_core::db::{Database, SqliteIdentityStore};
use adsync_core::directory::{
    AttributeDelta, DirectoryClient, DirectoryConnection, DirectoryConnector, DirectoryEntry,
    SearchRequest, SearchScope,
};
use adsync_core::errors::{DirectoryError, StoreError, SyncError};
use adsync_core::identifier::{guid_to_bytes, string_to_sid};
use adsync_core::identity::{
    match_local_identity, AttributeValue, IdentityDelta, IdentityStore, LocalIdentity, MatchedBy,
    NewIdentity, PrincipalResolver,
};
use adsync_core::models::SyncOutcome;
use adsync_core::sync_engine::{ExecutionLimit, LoginOutcome, SyncEngine};

// ===========================================================================
// Scripted directory
// ===========================================================================

const BASE_DN: &str = "DC=example,DC=com";
const SERVICE_USER: &str = "svc-sync";
const SERVICE_PASSWORD: &str = "svc-pass";

const NORMAL: u32 = 0x200;
const NORMAL_DISABLED: u32 = 0x202;
const NORMAL_SMARTCARD: u32 = 0x40200;

#[derive(Default)]
struct DirectoryState {
    users: Vec<DirectoryEntry>,
    groups: Vec<DirectoryEntry>,
    /// Bind name -> password.
    accounts: HashMap<String, String>,
    modified: Vec<(String, Vec<AttributeDelta>)>,
    connects: usize,
    closes: usize,
}

#[derive(Clone, Default)]
struct FakeDirectory(Arc<Mutex<DirectoryState>>);

impl FakeDirectory {
    fn new(users: Vec<DirectoryEntry>) -> Self {
        let dir = Self::default();
        {
            let mut state = dir.state();
            state.users = users;
            state
                .accounts
                .insert(SERVICE_USER.to_string(), SERVICE_PASSWORD.to_string());
        }
        dir
    }

    fn state(&self) -> MutexGuard<'_, DirectoryState> {
        self.0.lock().unwrap()
    }

    fn set_users(&self, users: Vec<DirectoryEntry>) {
        self.state().users = users;
    }
}

#[async_trait]
impl DirectoryConnector for FakeDirectory {
    async fn connect(
        &self,
        _connection: &DirectoryConnection,
    ) -> Result<Box<dyn DirectoryClient>, DirectoryError> {
        self.state().connects += 1;
        Ok(Box::new(FakeClient { dir: self.clone() }))
    }
}

struct FakeClient {
    dir: FakeDirectory,
}

fn filter_value<'a>(filter: &'a str, attribute: &str) -> Option<&'a str> {
    let start = filter.find(&format!("{}=", attribute))? + attribute.len() + 1;
    let rest = &filter[start..];
    Some(&rest[..rest.find(')')?])
}

fn unescape_binary(escaped: &str) -> Vec<u8> {
    escaped
        .split('\\')
        .filter(|s| !s.is_empty())
        .map(|h| u8::from_str_radix(h, 16).unwrap())
        .collect()
}

#[async_trait]
impl DirectoryClient for FakeClient {
    fn base_dn(&self) -> &str {
        BASE_DN
    }

    fn server(&self) -> &str {
        "dc01.example.com"
    }

    async fn bind(&mut self, username: &str, password: &str) -> Result<bool, DirectoryError> {
        let state = self.dir.state();
        Ok(state.accounts.get(username).map(String::as_str) == Some(password))
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let state = self.dir.state();
        if request.scope == SearchScope::Base {
            let dn = request.base_dn.clone().unwrap_or_default();
            return Ok(state
                .users
                .iter()
                .chain(state.groups.iter())
                .filter(|e| e.dn().eq_ignore_ascii_case(&dn) || dn == BASE_DN)
                .take(1)
                .cloned()
                .collect());
        }
        if let Some(escaped) = filter_value(&request.filter, "objectGUID") {
            let wanted = unescape_binary(escaped);
            return Ok(state
                .users
                .iter()
                .filter(|e| e.first_raw("objectGUID") == Some(wanted.as_slice()))
                .cloned()
                .collect());
        }
        if let Some(sam) = filter_value(&request.filter, "sAMAccountName") {
            return Ok(state
                .users
                .iter()
                .filter(|e| {
                    e.sam_account_name()
                        .is_some_and(|s| s.eq_ignore_ascii_case(sam))
                })
                .cloned()
                .collect());
        }
        Ok(state.users.clone())
    }

    async fn modify(&mut self, dn: &str, deltas: &[AttributeDelta]) -> Result<bool, DirectoryError> {
        self.dir
            .state()
            .modified
            .push((dn.to_string(), deltas.to_vec()));
        Ok(true)
    }

    async fn close(&mut self) -> Result<(), DirectoryError> {
        self.dir.state().closes += 1;
        Ok(())
    }
}

// ===========================================================================
// Helpers
// ===========================================================================

fn guid(n: u8) -> String {
    format!("6F9619FF-8B86-D011-B42D-00C04FC964{:02X}", n)
}

fn user(sam: &str, n: u8, uac: u32) -> DirectoryEntry {
    DirectoryEntry::new(format!("CN={},OU=Users,{}", sam, BASE_DN))
        .with_attribute("objectGUID", [guid_to_bytes(&guid(n)).unwrap()])
        .with_attribute(
            "objectSid",
            [string_to_sid(&format!("S-1-5-21-1-2-3-{}", 1100 + n as u32)).unwrap()],
        )
        .with_attribute("sAMAccountName", [sam])
        .with_attribute("userPrincipalName", [format!("{}@example.com", sam)])
        .with_attribute("userAccountControl", [uac.to_string()])
        .with_attribute("mail", [format!("{}@example.com", sam)])
        .with_attribute("givenName", [sam.to_uppercase()])
}

fn profile() -> ProfileConfig {
    let mut profile: ProfileConfig = toml::from_str(
        r#"
name = "corp"

[directory]
servers = ["dc01.example.com"]
base_dn = "DC=example,DC=com"

[service_account]
username = "svc-sync"
password_env = "ADSYNC_TEST_UNUSED"

[sync]
to_directory_enabled = true
disable_missing = true

[[attributes]]
directory_attribute = "title"
kind = "string"
meta_key = "title"
sync_to_directory = true
"#,
    )
    .unwrap();
    profile.service_account.as_mut().unwrap().password = Some(SERVICE_PASSWORD.into());
    profile
}

fn sqlite_store() -> Arc<SqliteIdentityStore> {
    let db = Database::in_memory().unwrap();
    db.initialize().unwrap();
    Arc::new(SqliteIdentityStore::new(Arc::new(db)))
}

fn engine(dir: &FakeDirectory, store: Arc<dyn IdentityStore>) -> SyncEngine {
    SyncEngine::new(profile(), Arc::new(dir.clone()), store)
}

fn new_identity(login: &str, n: Option<u8>) -> NewIdentity {
    NewIdentity {
        login: login.into(),
        email: Some(format!("{}@example.com", login)),
        object_guid: n.map(guid),
        sam_account_name: Some(login.into()),
        user_principal_name: Some(format!("{}@example.com", login)),
        ..NewIdentity::default()
    }
}

/// Delegates to SQLite but rejects selected writes.
struct FailingStore {
    inner: Arc<SqliteIdentityStore>,
    fail_update: Option<i64>,
    fail_disable: bool,
}

impl FailingStore {
    fn failing_update(inner: Arc<SqliteIdentityStore>, id: i64) -> Self {
        Self {
            inner,
            fail_update: Some(id),
            fail_disable: false,
        }
    }

    fn failing_disable(inner: Arc<SqliteIdentityStore>) -> Self {
        Self {
            inner,
            fail_update: None,
            fail_disable: true,
        }
    }
}

fn rejected(id: i64) -> StoreError {
    StoreError::WriteRejected {
        login: id.to_string(),
        detail: "simulated failure".into(),
    }
}

#[async_trait]
impl IdentityStore for FailingStore {
    async fn create(&self, identity: NewIdentity) -> Result<i64, StoreError> {
        self.inner.create(identity).await
    }

    async fn update(&self, id: i64, delta: IdentityDelta) -> Result<(), StoreError> {
        if self.fail_update == Some(id) {
            return Err(rejected(id));
        }
        self.inner.update(id, delta).await
    }

    async fn disable(&self, id: i64, reason: &str) -> Result<(), StoreError> {
        if self.fail_disable {
            return Err(rejected(id));
        }
        self.inner.disable(id, reason).await
    }

    async fn enable(&self, id: i64) -> Result<(), StoreError> {
        self.inner.enable(id).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<LocalIdentity>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_guid(&self, guid: &str) -> Result<Option<LocalIdentity>, StoreError> {
        self.inner.find_by_guid(guid).await
    }

    async fn find_by_sam_account_name(&self, sam: &str) -> Result<Option<LocalIdentity>, StoreError> {
        self.inner.find_by_sam_account_name(sam).await
    }

    async fn find_by_user_principal_name(&self, upn: &str) -> Result<Option<LocalIdentity>, StoreError> {
        self.inner.find_by_user_principal_name(upn).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<LocalIdentity>, StoreError> {
        self.inner.find_by_email(email).await
    }

    async fn list_synced(&self) -> Result<Vec<LocalIdentity>, StoreError> {
        self.inner.list_synced().await
    }
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[tokio::test]
async fn test_new_normal_account_is_created() {
    let dir = FakeDirectory::new(vec![user("jdoe", 1, NORMAL)]);
    let store = sqlite_store();
    let engine = engine(&dir, store.clone());

    let result = engine.sync_to_local().await.unwrap();
    assert_eq!(result.created, 1);
    assert_eq!(result.error_count(), 0);

    let jdoe = store.find_by_guid(&guid(1)).await.unwrap().unwrap();
    assert_eq!(jdoe.login, "jdoe");
    assert_eq!(jdoe.email.as_deref(), Some("jdoe@example.com"));
    assert_eq!(jdoe.user_principal_name.as_deref(), Some("jdoe@example.com"));
    assert_eq!(jdoe.domain_sid.as_deref(), Some("S-1-5-21-1-2-3"));
    assert_eq!(jdoe.attributes["first_name"], AttributeValue::Text("JDOE".into()));
    assert!(!jdoe.attributes.contains_key("title"));

    let state = dir.state();
    assert_eq!(state.connects, 1);
    assert_eq!(state.closes, 1);
}

#[tokio::test]
async fn test_missing_identity_is_disabled() {
    let dir = FakeDirectory::new(vec![user("jdoe", 1, NORMAL), user("asmith", 2, NORMAL)]);
    let store = sqlite_store();
    let engine = engine(&dir, store.clone());
    engine.sync_to_local().await.unwrap();

    dir.set_users(vec![user("jdoe", 1, NORMAL)]);
    let result = engine.sync_to_local().await.unwrap();
    assert_eq!(result.disabled, 1);
    assert_eq!(result.unchanged, 1);

    let asmith = store.find_by_guid(&guid(2)).await.unwrap().unwrap();
    assert!(asmith.disabled);
    assert!(asmith.disabled_reason.unwrap().contains("no longer found"));

    // Already disabled identities are not disabled again.
    let result = engine.sync_to_local().await.unwrap();
    assert_eq!(result.disabled, 0);
}

#[tokio::test]
async fn test_smartcard_account_is_disabled_without_update() {
    let dir = FakeDirectory::new(vec![user("jdoe", 1, NORMAL_SMARTCARD)]);
    let store = sqlite_store();
    let mut existing = new_identity("jdoe", Some(1));
    existing
        .attributes
        .insert("first_name".into(), AttributeValue::Text("John".into()));
    let id = store.create(existing).await.unwrap();

    let failing: Arc<dyn IdentityStore> = Arc::new(FailingStore::failing_update(store.clone(), id));
    let result = engine(&dir, failing).sync_to_local().await.unwrap();
    assert_eq!(result.disabled, 1);
    assert_eq!(result.error_count(), 0, "update must not be called");

    let jdoe = store.find_by_id(id).await.unwrap().unwrap();
    assert!(jdoe.disabled);
    assert!(jdoe.disabled_reason.unwrap().contains("smart card"));
    assert_eq!(jdoe.attributes["first_name"], AttributeValue::Text("John".into()));
}

#[tokio::test]
async fn test_restricted_unknown_account_is_skipped() {
    let dir = FakeDirectory::new(vec![user("jdoe", 1, NORMAL_SMARTCARD)]);
    let store = sqlite_store();
    let result = engine(&dir, store.clone()).sync_to_local().await.unwrap();
    assert_eq!(result.skipped, 1);
    assert!(store.find_by_guid(&guid(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_import_disabled_accounts() {
    let dir = FakeDirectory::new(vec![user("jdoe", 1, NORMAL_DISABLED)]);
    let store = sqlite_store();
    let mut profile = profile();
    profile.sync.import_disabled_accounts = true;
    let engine = SyncEngine::new(profile, Arc::new(dir.clone()), store.clone());

    let result = engine.sync_to_local().await.unwrap();
    assert_eq!(result.disabled, 1);
    let jdoe = store.find_by_guid(&guid(1)).await.unwrap().unwrap();
    assert!(jdoe.disabled);
    assert_eq!(jdoe.disabled_reason.as_deref(), Some("disabled in directory"));
}

#[tokio::test]
async fn test_imported_disabled_account_is_created_disabled() {
    let dir = FakeDirectory::new(vec![user("jdoe", 1, NORMAL_DISABLED)]);
    let store = sqlite_store();
    let mut profile = profile();
    profile.sync.import_disabled_accounts = true;
    let failing: Arc<dyn IdentityStore> = Arc::new(FailingStore::failing_disable(store.clone()));
    let engine = SyncEngine::new(profile, Arc::new(dir.clone()), failing);

    let result = engine.sync_to_local().await.unwrap();
    assert_eq!(result.error_count(), 0);
    assert_eq!(result.disabled, 1);
    let jdoe = store.find_by_guid(&guid(1)).await.unwrap().unwrap();
    assert!(jdoe.disabled);
    assert!(jdoe.email.is_none());
    assert_eq!(jdoe.disabled_reason.as_deref(), Some("disabled in directory"));
}

#[test]
fn test_down_level_login_not_split_when_disabled() {
    let credentials = PrincipalResolver::new(false).resolve("CORP\\jdoe", None);
    assert_eq!(credentials.sam_account_name, "CORP\\jdoe");
    assert!(credentials.netbios_domain.is_none());
}

#[tokio::test]
async fn test_failed_identity_does_not_stop_batch() {
    let dir = FakeDirectory::new(vec![
        user("alice", 1, NORMAL),
        user("bob", 2, NORMAL),
        user("carol", 3, NORMAL),
    ]);
    let store = sqlite_store();
    let mut ids = Vec::new();
    for (login, n) in [("alice", 1), ("bob", 2), ("carol", 3)] {
        ids.push(store.create(new_identity(login, Some(n))).await.unwrap());
    }

    let failing: Arc<dyn IdentityStore> = Arc::new(FailingStore::failing_update(store.clone(), ids[1]));
    let result = engine(&dir, failing).sync_to_local().await.unwrap();

    assert_eq!(result.error_count(), 1);
    assert_eq!(result.updated, 2);
    assert_eq!(result.errors[0].identity, "bob");
    assert!(result.errors[0].message.contains("simulated failure"));

    let carol = store.find_by_id(ids[2]).await.unwrap().unwrap();
    assert_eq!(carol.attributes["first_name"], AttributeValue::Text("CAROL".into()));
}

#[tokio::test]
async fn test_guid_beats_name() {
    let store = sqlite_store();
    let x = store.create(new_identity("renamed", Some(1))).await.unwrap();
    let _y = store.create(new_identity("jdoe", None)).await.unwrap();

    let entry = user("jdoe", 1, NORMAL);
    let credentials = PrincipalResolver::default().resolve("jdoe", None);
    let (found, by) = match_local_identity(store.as_ref(), &credentials, &entry)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, x);
    assert_eq!(by, MatchedBy::ObjectGuid);
}

// ===========================================================================
// Account state
// ===========================================================================

#[tokio::test]
async fn test_disable_then_enable_restores_email() {
    let dir = FakeDirectory::new(vec![user("jdoe", 1, NORMAL)]);
    let store = sqlite_store();
    let engine = engine(&dir, store.clone());
    engine.sync_to_local().await.unwrap();

    dir.set_users(vec![user("jdoe", 1, NORMAL_DISABLED)]);
    let result = engine.sync_to_local().await.unwrap();
    assert_eq!(result.disabled, 1);
    let jdoe = store.find_by_guid(&guid(1)).await.unwrap().unwrap();
    assert!(jdoe.disabled);
    assert!(jdoe.email.is_none());

    dir.set_users(vec![user("jdoe", 1, NORMAL)]);
    let result = engine.sync_to_local().await.unwrap();
    assert_eq!(result.enabled, 1);
    let jdoe = store.find_by_guid(&guid(1)).await.unwrap().unwrap();
    assert!(!jdoe.disabled);
    assert!(jdoe.disabled_reason.is_none());
    assert_eq!(jdoe.email.as_deref(), Some("jdoe@example.com"));
}

#[tokio::test]
async fn test_failed_refresh_keeps_identity_disabled() {
    let dir = FakeDirectory::new(vec![user("jdoe", 1, NORMAL)]);
    let store = sqlite_store();
    let id = store.create(new_identity("jdoe", Some(1))).await.unwrap();
    store.disable(id, "disabled in directory").await.unwrap();

    let failing: Arc<dyn IdentityStore> = Arc::new(FailingStore::failing_update(store.clone(), id));
    let result = engine(&dir, failing).sync_to_local().await.unwrap();
    assert_eq!(result.error_count(), 1);
    assert_eq!(result.enabled, 0);

    let jdoe = store.find_by_id(id).await.unwrap().unwrap();
    assert!(jdoe.disabled);
    assert_eq!(jdoe.disabled_reason.as_deref(), Some("disabled in directory"));
}

#[tokio::test]
async fn test_duplicate_email_policy() {
    let dir = FakeDirectory::new(vec![user("jdoe", 1, NORMAL)]);
    let store = sqlite_store();
    let mut other = new_identity("johnny", None);
    other.email = Some("jdoe@example.com".into());
    other.sam_account_name = None;
    other.user_principal_name = None;
    store.create(other).await.unwrap();

    let result = engine(&dir, store.clone()).sync_to_local().await.unwrap();
    assert_eq!(result.error_count(), 1);
    assert!(result.errors[0].message.contains("already used"));

    let mut profile = profile();
    profile.sync.duplicate_email = DuplicateEmailPolicy::Allow;
    let engine = SyncEngine::new(profile, Arc::new(dir.clone()), store.clone());
    let result = engine.sync_to_local().await.unwrap();
    assert_eq!(result.created, 1);
}

#[tokio::test]
async fn test_append_suffix_to_new_users() {
    let dir = FakeDirectory::new(vec![user("jdoe", 1, NORMAL)]);
    let store = sqlite_store();
    let mut profile = profile();
    profile.sync.append_suffix_to_new_users = true;
    SyncEngine::new(profile, Arc::new(dir.clone()), store.clone())
        .sync_to_local()
        .await
        .unwrap();
    let jdoe = store.find_by_guid(&guid(1)).await.unwrap().unwrap();
    assert_eq!(jdoe.login, "jdoe@example.com");
}

// ===========================================================================
// Run-level failures and hooks
// ===========================================================================

#[tokio::test]
async fn test_bind_rejected_aborts_and_closes() {
    let dir = FakeDirectory::new(vec![user("jdoe", 1, NORMAL)]);
    dir.state().accounts.clear();
    let store = sqlite_store();

    let err = engine(&dir, store.clone()).sync_to_local().await.unwrap_err();
    assert!(matches!(err, SyncError::BindRejected { .. }));
    assert_eq!(dir.state().closes, 1);
    assert!(store.find_by_guid(&guid(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_service_password() {
    let dir = FakeDirectory::new(vec![]);
    let mut profile = profile();
    profile.service_account.as_mut().unwrap().password = None;
    let engine = SyncEngine::new(profile, Arc::new(dir.clone()), sqlite_store());
    assert!(matches!(
        engine.sync_to_local().await,
        Err(SyncError::MissingServiceAccount { .. })
    ));
    assert_eq!(dir.state().connects, 0);
}

#[tokio::test]
async fn test_disabled_direction() {
    let dir = FakeDirectory::new(vec![]);
    let mut profile = profile();
    profile.sync.to_local_enabled = false;
    let engine = SyncEngine::new(profile, Arc::new(dir), sqlite_store());
    assert!(matches!(
        engine.sync_to_local().await,
        Err(SyncError::DirectionDisabled { .. })
    ));
    assert!(!engine.is_running());
}

#[derive(Default)]
struct CountingLimit(AtomicUsize);

impl ExecutionLimit for CountingLimit {
    fn extend(&self, _profile: &str) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_execution_limit_extended_before_batch() {
    let dir = FakeDirectory::new(vec![user("jdoe", 1, NORMAL)]);
    let limit = Arc::new(CountingLimit::default());
    let engine = engine(&dir, sqlite_store()).with_execution_limit(limit.clone());
    engine.sync_to_local().await.unwrap();
    assert_eq!(limit.0.load(Ordering::SeqCst), 1);
    assert!(!engine.is_running());
}

#[tokio::test]
async fn test_execution_limit_extended_before_writeback() {
    let dir = FakeDirectory::new(vec![user("jdoe", 1, NORMAL)]);
    let limit = Arc::new(CountingLimit::default());
    let engine = engine(&dir, sqlite_store()).with_execution_limit(limit.clone());
    engine.sync_to_directory().await.unwrap();
    assert_eq!(limit.0.load(Ordering::SeqCst), 1);
    assert!(!engine.is_running());
}

#[tokio::test]
async fn test_verify_connection() {
    let dir = FakeDirectory::new(vec![]);
    let base_dn = engine(&dir, sqlite_store()).verify_connection().await.unwrap();
    assert_eq!(base_dn, BASE_DN);
    assert_eq!(dir.state().closes, 1);
}

// ===========================================================================
// Login and writeback
// ===========================================================================

#[tokio::test]
async fn test_login_sync() {
    let dir = FakeDirectory::new(vec![user("jdoe", 1, NORMAL)]);
    dir.state()
        .accounts
        .insert("jdoe@example.com".into(), "hunter2".into());
    let store = sqlite_store();
    let engine = engine(&dir, store.clone());

    let denied = engine.sync_on_login("jdoe@example.com", "wrong").await.unwrap();
    assert_eq!(denied, LoginOutcome::Denied);
    assert!(store.find_by_guid(&guid(1)).await.unwrap().is_none());

    let empty = engine.sync_on_login("jdoe@example.com", "").await.unwrap();
    assert_eq!(empty, LoginOutcome::Denied);

    let outcome = engine.sync_on_login("jdoe@example.com", "hunter2").await.unwrap();
    assert!(outcome.is_allowed());
    assert!(matches!(
        outcome,
        LoginOutcome::Synced {
            outcome: SyncOutcome::Created,
            ..
        }
    ));
    let jdoe = store.find_by_guid(&guid(1)).await.unwrap().unwrap();
    assert_eq!(jdoe.sam_account_name.as_deref(), Some("jdoe"));
    assert_eq!(dir.state().closes, 2);
}

#[tokio::test]
async fn test_login_of_smartcard_account_is_skipped() {
    let dir = FakeDirectory::new(vec![user("jdoe", 1, NORMAL_SMARTCARD)]);
    dir.state()
        .accounts
        .insert("jdoe@example.com".into(), "hunter2".into());
    let outcome = engine(&dir, sqlite_store())
        .sync_on_login("jdoe@example.com", "hunter2")
        .await
        .unwrap();
    assert_eq!(outcome, LoginOutcome::Skipped(RestrictionViolation::SmartcardRequired));
    assert!(!outcome.is_allowed());
}

#[tokio::test]
async fn test_writeback_pushes_changed_attributes() {
    let entry = user("jdoe", 1, NORMAL).with_attribute("title", ["Engineer"]);
    let dir = FakeDirectory::new(vec![entry, user("asmith", 2, NORMAL)]);
    let store = sqlite_store();

    let mut jdoe = new_identity("jdoe", Some(1));
    jdoe.attributes
        .insert("title".into(), AttributeValue::Text("Manager".into()));
    store.create(jdoe).await.unwrap();
    store.create(new_identity("asmith", Some(2))).await.unwrap();
    let gone = store.create(new_identity("gone", Some(9))).await.unwrap();
    store.disable(gone, "left").await.unwrap();

    let result = engine(&dir, store).sync_to_directory().await.unwrap();
    assert_eq!(result.updated, 1);
    assert_eq!(result.unchanged, 1);
    assert_eq!(result.skipped, 1);

    let state = dir.state();
    assert_eq!(state.modified.len(), 1);
    let (dn, deltas) = &state.modified[0];
    assert!(dn.starts_with("CN=jdoe,"));
    assert_eq!(deltas, &vec![AttributeDelta::replace("title", [b"Manager".to_vec()])]);
}
