//! LDAP directory access layer.
//!
//! [`DirectoryConnector`] opens one [`DirectoryClient`] per run. The client
//! binds, runs (optionally paged) searches and applies attribute
//! modifications. [`ldap`] holds the `ldap3`-backed implementation; the
//! traits exist so the sync engine can run against a scripted directory in
//! tests.

pub mod client;
pub mod entry;
pub mod filter;
pub mod ldap;
pub mod paging;
pub mod server;

pub use client::{
    AttributeDelta, DirectoryClient, DirectoryConnection, DirectoryConnector, Encryption,
    SearchRequest, SearchScope,
};
pub use entry::DirectoryEntry;
pub use ldap::{LdapClient, LdapConnector};
pub use paging::PagingState;
pub use server::ServerSelector;
