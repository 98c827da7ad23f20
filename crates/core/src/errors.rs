//! Error types for the ADSync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Fatality is decided by the caller, not the type: a [`DirectoryError`]
//! raised while connecting aborts a run, the same variant raised while
//! resolving one nested group only marks that branch unresolved.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Directory (LDAP) errors
// ---------------------------------------------------------------------------

/// Errors from the LDAP directory access layer.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No server could be reached, or the TLS handshake failed.
    #[error("directory connection to '{server}' failed: {detail}")]
    Connection {
        server: String,
        detail: String,
    },

    /// The bind operation itself failed (transport or protocol level).
    #[error("directory bind as '{username}' failed: {detail}")]
    Bind {
        username: String,
        detail: String,
    },

    /// Malformed filter, size/time limit exceeded, or any non-success result.
    #[error("directory search under '{base_dn}' with filter '{filter}' failed: {detail}")]
    Search {
        base_dn: String,
        filter: String,
        detail: String,
    },

    /// A modify operation was rejected.
    #[error("directory modify of '{dn}' failed: {detail}")]
    Modify {
        dn: String,
        detail: String,
    },

    /// The base DN is neither configured nor advertised by the RootDSE.
    #[error("could not determine base DN: {0}")]
    BaseDnUnresolved(String),

    /// The connection configuration cannot be used.
    #[error("invalid directory configuration: {0}")]
    InvalidConfiguration(String),
}

// ---------------------------------------------------------------------------
// Identifier codec errors
// ---------------------------------------------------------------------------

/// Errors from SID / GUID encoding and decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// Binary SID is truncated or its sub-authority count disagrees with its length.
    #[error("invalid binary SID ({len} bytes): {detail}")]
    InvalidSidBytes {
        len: usize,
        detail: String,
    },

    /// String SID does not match `S-<rev>-<authority>-<subauth>*`.
    #[error("invalid SID string '{0}'")]
    InvalidSidString(String),

    /// Binary GUID is not exactly 16 bytes.
    #[error("invalid binary GUID: expected 16 bytes, got {0}")]
    InvalidGuidBytes(usize),

    /// String GUID is not 36-char hyphenated hex.
    #[error("invalid GUID string '{0}'")]
    InvalidGuidString(String),
}

// ---------------------------------------------------------------------------
// Identity store errors
// ---------------------------------------------------------------------------

/// Errors raised by an identity store implementation. Scoped to one identity.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store refused to create or update the identity.
    #[error("identity store rejected write for '{login}': {detail}")]
    WriteRejected {
        login: String,
        detail: String,
    },

    /// The email is already owned by another identity.
    #[error("email '{email}' is already used by identity {owner}")]
    DuplicateEmail {
        email: String,
        owner: i64,
    },

    /// The identity id does not exist.
    #[error("identity {0} not found")]
    NotFound(i64),

    /// Database failure underneath the store.
    #[error("identity store database error: {0}")]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Sync engine errors
// ---------------------------------------------------------------------------

/// Errors from the synchronization engine. Returned from a run entry point
/// they abort the run; raised while processing one identity inside a batch
/// they are recorded in the run result and the batch continues.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A run for this profile is already in progress.
    #[error("a sync run is already in progress (started at {started_at})")]
    AlreadyRunning {
        started_at: String,
    },

    /// The service account credentials were refused.
    #[error("bind rejected for '{username}': invalid credentials")]
    BindRejected {
        username: String,
    },

    /// A run needs service-account credentials but none are configured.
    #[error("profile '{profile}' has no service account configured")]
    MissingServiceAccount {
        profile: String,
    },

    /// The requested sync direction is disabled for this profile.
    #[error("sync direction '{direction}' is disabled for profile '{profile}'")]
    DirectionDisabled {
        profile: String,
        direction: String,
    },

    /// Fatal directory failure (connect, bind, enumeration).
    #[error("sync directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("sync identity store error: {0}")]
    Store(#[from] StoreError),

    /// Malformed objectGUID / objectSid on an entry.
    #[error("sync identifier error: {0}")]
    Identifier(#[from] IdentifierError),

    /// The directory entry lacks an attribute the engine needs.
    #[error("directory entry '{dn}' has no {attribute}")]
    MissingAttribute {
        dn: String,
        attribute: String,
    },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing {
        var: String,
        field: String,
    },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed {
        version: u32,
        detail: String,
    },

    /// Stored JSON could not be (de)serialized.
    #[error("database serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        entity: String,
        id: String,
    },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
