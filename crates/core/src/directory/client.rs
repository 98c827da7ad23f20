//! Directory client contract and connection parameters.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DirectoryError;

use super::entry::DirectoryEntry;
use super::paging::DEFAULT_PAGE_SIZE;

/// Transport security for a directory connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encryption {
    /// Plain `ldap://`.
    None,
    /// `ldap://` upgraded with the StartTLS extended operation.
    #[default]
    StartTls,
    /// Dedicated `ldaps://`.
    Ldaps,
}

impl Encryption {
    pub fn default_port(self) -> u16 {
        match self {
            Encryption::Ldaps => 636,
            Encryption::None | Encryption::StartTls => 389,
        }
    }

    fn scheme(self) -> &'static str {
        match self {
            Encryption::Ldaps => "ldaps",
            Encryption::None | Encryption::StartTls => "ldap",
        }
    }
}

impl std::fmt::Display for Encryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encryption::None => write!(f, "none"),
            Encryption::StartTls => write!(f, "start_tls"),
            Encryption::Ldaps => write!(f, "ldaps"),
        }
    }
}

/// Parameters for one directory connection. Built per run from a profile.
///
/// Carries no credentials; callers bind explicitly after connecting.
#[derive(Debug, Clone)]
pub struct DirectoryConnection {
    pub servers: Vec<String>,
    pub port: Option<u16>,
    pub encryption: Encryption,
    pub network_timeout: Duration,
    /// `None` means: discover via RootDSE `defaultNamingContext`.
    pub base_dn: Option<String>,
    pub verify_certificate: bool,
    /// Additional PEM or DER trust anchors.
    pub ca_certificates: Vec<PathBuf>,
    pub page_size: u32,
}

impl DirectoryConnection {
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers,
            port: None,
            encryption: Encryption::default(),
            network_timeout: Duration::from_secs(5),
            base_dn: None,
            verify_certificate: true,
            ca_certificates: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Effective port: the configured one, else the encryption default.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.encryption.default_port())
    }

    pub fn url_for(&self, server: &str) -> String {
        format!("{}://{}:{}", self.encryption.scheme(), server, self.port())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

/// One search request. `base_dn = None` searches under the client's base DN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base_dn: Option<String>,
    pub scope: SearchScope,
    pub filter: String,
    pub attributes: Vec<String>,
    /// `Some(n)` requests paging with page size `n` when the server supports it.
    pub page_size: Option<u32>,
}

impl SearchRequest {
    /// Subtree search under the client's base DN.
    pub fn subtree(filter: impl Into<String>) -> Self {
        Self {
            base_dn: None,
            scope: SearchScope::Subtree,
            filter: filter.into(),
            attributes: Vec::new(),
            page_size: None,
        }
    }

    /// Read a single entry by DN.
    pub fn base(dn: impl Into<String>) -> Self {
        Self {
            base_dn: Some(dn.into()),
            scope: SearchScope::Base,
            filter: "(objectClass=*)".to_string(),
            attributes: Vec::new(),
            page_size: None,
        }
    }

    pub fn under(mut self, base_dn: impl Into<String>) -> Self {
        self.base_dn = Some(base_dn.into());
        self
    }

    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn paged(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// Replace-modification of one attribute. Empty `values` clears it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDelta {
    pub name: String,
    pub values: Vec<Vec<u8>>,
}

impl AttributeDelta {
    pub fn replace<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn clear(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    pub fn is_clear(&self) -> bool {
        self.values.is_empty()
    }
}

/// An open directory session.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Resolved base DN (configured or discovered).
    fn base_dn(&self) -> &str;

    /// Server this client is connected to.
    fn server(&self) -> &str;

    /// Simple bind. `Ok(false)` means the credentials were rejected.
    async fn bind(&mut self, username: &str, password: &str) -> Result<bool, DirectoryError>;

    /// Run a search to completion. Zero matches is `Ok(vec![])`.
    async fn search(&mut self, request: &SearchRequest) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    /// Apply replace-deltas to one entry. `Ok(false)` when the server refused
    /// the change without a transport failure.
    async fn modify(&mut self, dn: &str, deltas: &[AttributeDelta]) -> Result<bool, DirectoryError>;

    /// Unbind and release the connection.
    async fn close(&mut self) -> Result<(), DirectoryError>;
}

/// Opens [`DirectoryClient`]s.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(
        &self,
        connection: &DirectoryConnection,
    ) -> Result<Box<dyn DirectoryClient>, DirectoryError>;
}
