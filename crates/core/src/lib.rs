//! ADSync core library.
//!
//! This crate provides the building blocks for synchronizing an Active
//! Directory with a local identity store: the LDAP access layer, SID/GUID
//! codecs, group resolution, login normalization, attribute mapping,
//! SQLite persistence and the sync engine.

pub mod account_control;
pub mod config;
pub mod db;
pub mod directory;
pub mod errors;
pub mod groups;
pub mod identifier;
pub mod identity;
pub mod models;
pub mod runtime;
pub mod sync_engine;
pub mod writeback;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::{Database, SqliteIdentityStore};
pub use directory::{DirectoryClient, DirectoryConnector, LdapConnector};
pub use identity::IdentityStore;
pub use errors::CoreError;
pub use models::SyncResult;
pub use runtime::Runtime;
pub use sync_engine::{LoginOutcome, SyncEngine};
