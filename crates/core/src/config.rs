//! TOML-based configuration.
//!
//! A configuration holds daemon settings plus one or more `[[profile]]`
//! tables, each describing one directory and how it is synchronized. The
//! service-account password is never stored in the file: `password_env`
//! names an environment variable that [`AppConfig::resolve_env_vars`] reads.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::directory::paging::DEFAULT_PAGE_SIZE;
use crate::directory::{DirectoryConnection, Encryption};
use crate::errors::ConfigError;
use crate::identity::attributes::{merge_with_defaults, validate_definitions, AttributeDefinition};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default, rename = "profile")]
    pub profiles: Vec<ProfileConfig>,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between scheduled runs (default 3600).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory holding the SQLite database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// When set, logs also go to a daily rolling file here.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_poll_interval() -> u64 {
    3600
}
fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/adsync")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            log_dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// One directory and its sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub name: String,

    pub directory: DirectoryConfig,

    #[serde(default)]
    pub service_account: Option<ServiceAccountConfig>,

    #[serde(default)]
    pub sync: SyncConfig,

    /// Configured attribute definitions; merged over the defaults.
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
}

impl ProfileConfig {
    /// Connection parameters for this profile's directory.
    pub fn connection(&self) -> DirectoryConnection {
        let dir = &self.directory;
        DirectoryConnection {
            servers: dir.servers.clone(),
            port: dir.port,
            encryption: dir.encryption,
            network_timeout: Duration::from_secs(dir.network_timeout_secs),
            base_dn: dir.base_dn.clone(),
            verify_certificate: dir.verify_certificate,
            ca_certificates: dir.ca_certificates.clone(),
            page_size: dir.page_size,
        }
    }

    /// Configured definitions merged over the built-in defaults.
    pub fn attribute_definitions(&self) -> Vec<AttributeDefinition> {
        merge_with_defaults(self.attributes.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Domain controllers; one is picked at random per run.
    pub servers: Vec<String>,

    /// Defaults to 636 for LDAPS, 389 otherwise.
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub encryption: Encryption,

    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,

    /// Discovered from the RootDSE when unset.
    #[serde(default)]
    pub base_dn: Option<String>,

    #[serde(default = "default_true")]
    pub verify_certificate: bool,

    #[serde(default)]
    pub ca_certificates: Vec<PathBuf>,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Accept `DOMAIN\user` logins.
    #[serde(default)]
    pub allow_down_level_logon_name: bool,

    /// Appended as `@suffix` to bare logins when binding as the user.
    #[serde(default)]
    pub account_suffix: Option<String>,

    /// Primary group DN used when the real one cannot be looked up.
    #[serde(default)]
    pub fallback_primary_group: Option<String>,
}

fn default_network_timeout() -> u64 {
    5
}
fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}
fn default_true() -> bool {
    true
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceAccountConfig {
    pub username: String,

    /// Environment variable holding the password.
    pub password_env: String,

    #[serde(skip)]
    pub password: Option<String>,
}

impl std::fmt::Debug for ServiceAccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountConfig")
            .field("username", &self.username)
            .field("password_env", &self.password_env)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// What happens when a new identity's email already belongs to another one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateEmailPolicy {
    /// Creation fails for that identity.
    #[default]
    Prevent,
    /// Creation proceeds.
    Allow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Directory to local store.
    #[serde(default = "default_true")]
    pub to_local_enabled: bool,

    /// Local store to directory.
    #[serde(default)]
    pub to_directory_enabled: bool,

    /// Synchronize an identity when it logs in.
    #[serde(default = "default_true")]
    pub login_sync_enabled: bool,

    /// Restrict enumeration to (transitive) members of these groups.
    #[serde(default)]
    pub security_groups: Vec<String>,

    /// Walk nested groups when resolving memberships.
    #[serde(default = "default_true")]
    pub recursive_groups: bool,

    /// Disable synced identities whose directory object is gone.
    #[serde(default)]
    pub disable_missing: bool,

    /// Create/update restricted accounts, then disable them locally.
    #[serde(default)]
    pub import_disabled_accounts: bool,

    #[serde(default)]
    pub duplicate_email: DuplicateEmailPolicy,

    /// New logins become `sam@suffix` instead of `sam`.
    #[serde(default)]
    pub append_suffix_to_new_users: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            to_local_enabled: true,
            to_directory_enabled: false,
            login_sync_enabled: true,
            security_groups: Vec::new(),
            recursive_groups: true,
            disable_missing: false,
            import_disabled_accounts: false,
            duplicate_email: DuplicateEmailPolicy::default(),
            append_suffix_to_new_users: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!(profiles = config.profiles.len(), "configuration parsed successfully");
        Ok(config)
    }

    /// Resolve every `password_env` reference.
    ///
    /// A missing variable only logs a warning; a run that needs the
    /// password fails later with a clear error.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");
        for profile in &mut self.profiles {
            if let Some(sa) = profile.service_account.as_mut() {
                let field = format!("profile.{}.service_account.password_env", profile.name);
                sa.password = resolve_optional_env(&sa.password_env, &field);
            }
        }
        debug!("environment variable resolution complete");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.poll_interval_secs == 0 {
            return Err(invalid("daemon.poll_interval_secs", "poll interval must be > 0"));
        }
        if self.profiles.is_empty() {
            return Err(invalid("profile", "at least one [[profile]] is required"));
        }

        let mut names = std::collections::HashSet::new();
        for profile in &self.profiles {
            if profile.name.trim().is_empty() {
                return Err(invalid("profile.name", "profile name must not be empty"));
            }
            if !names.insert(profile.name.as_str()) {
                return Err(invalid(
                    &format!("profile.{}", profile.name),
                    "profile names must be unique",
                ));
            }
            profile.validate()?;
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    pub fn profile(&self, name: &str) -> Option<&ProfileConfig> {
        self.profiles.iter().find(|p| p.name == name)
    }
}

impl ProfileConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = format!("profile.{}", self.name);
        let dir = &self.directory;

        if dir.servers.is_empty() || dir.servers.iter().any(|s| s.trim().is_empty()) {
            return Err(invalid(
                &format!("{}.directory.servers", prefix),
                "at least one non-empty server is required",
            ));
        }
        match (dir.encryption, dir.port) {
            (_, Some(0)) => {
                return Err(invalid(&format!("{}.directory.port", prefix), "port must be > 0"));
            }
            (Encryption::Ldaps, Some(389)) => {
                return Err(invalid(
                    &format!("{}.directory.port", prefix),
                    "LDAPS cannot use the plain LDAP port 389",
                ));
            }
            (Encryption::None | Encryption::StartTls, Some(636)) => {
                return Err(invalid(
                    &format!("{}.directory.port", prefix),
                    "port 636 requires encryption = \"ldaps\"",
                ));
            }
            _ => {}
        }
        if dir.page_size == 0 {
            return Err(invalid(&format!("{}.directory.page_size", prefix), "page size must be > 0"));
        }
        if dir.network_timeout_secs == 0 {
            return Err(invalid(
                &format!("{}.directory.network_timeout_secs", prefix),
                "network timeout must be > 0",
            ));
        }

        let needs_account = self.sync.to_local_enabled || self.sync.to_directory_enabled;
        if needs_account && self.service_account.is_none() {
            return Err(invalid(
                &format!("{}.service_account", prefix),
                "scheduled sync requires a service account",
            ));
        }

        let definitions = self.attribute_definitions();
        validate_definitions(&definitions)?;
        if self.sync.to_directory_enabled && !definitions.iter().any(|d| d.sync_to_directory) {
            warn!(profile = %self.name, "to_directory sync enabled but no attribute has sync_to_directory");
        }
        Ok(())
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        detail: detail.to_string(),
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
