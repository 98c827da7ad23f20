//! `ldap3`-backed [`DirectoryClient`].

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::controls::RawControl;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};
use native_tls::{Certificate, TlsConnector};
use tracing::{debug, info, warn};

use crate::errors::DirectoryError;

use super::client::{
    AttributeDelta, DirectoryClient, DirectoryConnection, DirectoryConnector, Encryption,
    SearchRequest, SearchScope,
};
use super::entry::{attr, DirectoryEntry};
use super::paging::{PagingState, PAGED_RESULTS_OID};
use super::server::ServerSelector;

/// LDAP result code for a rejected simple bind.
const INVALID_CREDENTIALS: u32 = 49;

/// Opens `ldap3` connections to a randomly chosen server of the list.
#[derive(Debug, Default)]
pub struct LdapConnector {
    selector: ServerSelector,
}

impl LdapConnector {
    pub fn new(selector: ServerSelector) -> Self {
        Self { selector }
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect(
        &self,
        connection: &DirectoryConnection,
    ) -> Result<Box<dyn DirectoryClient>, DirectoryError> {
        let server = self
            .selector
            .pick(&connection.servers)
            .ok_or_else(|| {
                DirectoryError::InvalidConfiguration("no directory servers configured".into())
            })?
            .to_string();
        let url = connection.url_for(&server);

        let settings = connection_settings(connection).map_err(|detail| {
            DirectoryError::Connection {
                server: server.clone(),
                detail,
            }
        })?;

        debug!(url = %url, encryption = %connection.encryption, "connecting to directory");
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| DirectoryError::Connection {
                server: server.clone(),
                detail: e.to_string(),
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver stopped");
            }
        });

        let mut client = LdapClient {
            ldap,
            server,
            base_dn: String::new(),
            paging_supported: false,
            network_timeout: connection.network_timeout,
        };
        client.discover(connection.base_dn.as_deref()).await?;

        info!(
            server = %client.server,
            base_dn = %client.base_dn,
            paging = client.paging_supported,
            "connected to directory"
        );
        Ok(Box::new(client))
    }
}

fn connection_settings(connection: &DirectoryConnection) -> Result<LdapConnSettings, String> {
    let mut builder = TlsConnector::builder();
    builder.danger_accept_invalid_certs(!connection.verify_certificate);

    for path in &connection.ca_certificates {
        let bytes = std::fs::read(path)
            .map_err(|e| format!("cannot read CA certificate {}: {}", path.display(), e))?;
        let cert = Certificate::from_pem(&bytes)
            .or_else(|_| Certificate::from_der(&bytes))
            .map_err(|e| format!("invalid CA certificate {}: {}", path.display(), e))?;
        builder.add_root_certificate(cert);
    }

    let connector = builder
        .build()
        .map_err(|e| format!("TLS setup failed: {}", e))?;

    Ok(LdapConnSettings::new()
        .set_starttls(connection.encryption == Encryption::StartTls)
        .set_conn_timeout(connection.network_timeout)
        .set_no_tls_verify(!connection.verify_certificate)
        .set_connector(connector))
}

fn ldap_scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::OneLevel => Scope::OneLevel,
        SearchScope::Subtree => Scope::Subtree,
    }
}

fn replace_mods(deltas: &[AttributeDelta]) -> Vec<Mod<Vec<u8>>> {
    deltas
        .iter()
        .map(|delta| {
            let values: HashSet<Vec<u8>> = delta.values.iter().cloned().collect();
            Mod::Replace(delta.name.clone().into_bytes(), values)
        })
        .collect()
}

/// One bound (or about to be bound) `ldap3` session.
pub struct LdapClient {
    ldap: Ldap,
    server: String,
    base_dn: String,
    paging_supported: bool,
    network_timeout: Duration,
}

impl LdapClient {
    /// Whether the server advertised the paged-results control.
    pub fn paging_supported(&self) -> bool {
        self.paging_supported
    }

    /// Read the RootDSE and settle the base DN.
    async fn discover(&mut self, configured_base_dn: Option<&str>) -> Result<(), DirectoryError> {
        let root = match self.read_root_dse().await {
            Ok(root) => root,
            Err(e) => match configured_base_dn {
                Some(_) => {
                    warn!(server = %self.server, error = %e, "RootDSE unreadable, paging disabled");
                    DirectoryEntry::new("")
                }
                None => return Err(DirectoryError::BaseDnUnresolved(e.to_string())),
            },
        };

        self.paging_supported = root
            .strings(attr::SUPPORTED_CONTROL)
            .iter()
            .any(|oid| oid == PAGED_RESULTS_OID);

        self.base_dn = match configured_base_dn.filter(|dn| !dn.trim().is_empty()) {
            Some(dn) => dn.to_string(),
            None => root
                .first_str(attr::DEFAULT_NAMING_CONTEXT)
                .filter(|dn| !dn.is_empty())
                .ok_or_else(|| {
                    DirectoryError::BaseDnUnresolved(format!(
                        "RootDSE of '{}' has no defaultNamingContext",
                        self.server
                    ))
                })?,
        };
        Ok(())
    }

    async fn read_root_dse(&mut self) -> Result<DirectoryEntry, DirectoryError> {
        let (entries, _) = self
            .ldap
            .with_timeout(self.network_timeout)
            .search(
                "",
                Scope::Base,
                "(objectClass=*)",
                vec!["defaultNamingContext", "supportedControl"],
            )
            .await
            .and_then(|result| result.success())
            .map_err(|e| DirectoryError::Search {
                base_dn: String::new(),
                filter: "(objectClass=*)".into(),
                detail: e.to_string(),
            })?;

        Ok(entries
            .into_iter()
            .next()
            .map(|e| DirectoryEntry::from_search_entry(SearchEntry::construct(e)))
            .unwrap_or_default())
    }

    /// Paged search driven by a caller-owned cursor.
    ///
    /// The cursor is reset first, so the same [`PagingState`] can be handed in
    /// again to re-issue the search from the first page.
    pub async fn search_paged(
        &mut self,
        request: &SearchRequest,
        paging: &mut PagingState,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let base_dn = self.request_base(request);
        let attrs = request_attributes(request);
        let search_error = |detail: String| DirectoryError::Search {
            base_dn: base_dn.clone(),
            filter: request.filter.clone(),
            detail,
        };

        paging.reset();
        let mut results = Vec::new();
        while !paging.is_exhausted() {
            let control: RawControl = paging.control().into();
            let (entries, res) = self
                .ldap
                .with_timeout(self.network_timeout)
                .with_controls(vec![control])
                .search(&base_dn, ldap_scope(request.scope), &request.filter, attrs.clone())
                .await
                .and_then(|result| result.success())
                .map_err(|e| search_error(e.to_string()))?;

            results.extend(
                entries
                    .into_iter()
                    .map(|e| DirectoryEntry::from_search_entry(SearchEntry::construct(e))),
            );
            paging.advance(PagingState::cookie_from_result(&res));
            debug!(
                page = paging.pages_fetched(),
                total = results.len(),
                "fetched search page"
            );
        }
        Ok(results)
    }

    async fn search_unpaged(
        &mut self,
        request: &SearchRequest,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let base_dn = self.request_base(request);
        let (entries, _) = self
            .ldap
            .with_timeout(self.network_timeout)
            .search(
                &base_dn,
                ldap_scope(request.scope),
                &request.filter,
                request_attributes(request),
            )
            .await
            .and_then(|result| result.success())
            .map_err(|e| DirectoryError::Search {
                base_dn: base_dn.clone(),
                filter: request.filter.clone(),
                detail: e.to_string(),
            })?;

        Ok(entries
            .into_iter()
            .map(|e| DirectoryEntry::from_search_entry(SearchEntry::construct(e)))
            .collect())
    }

    fn request_base(&self, request: &SearchRequest) -> String {
        request
            .base_dn
            .clone()
            .unwrap_or_else(|| self.base_dn.clone())
    }
}

fn request_attributes(request: &SearchRequest) -> Vec<String> {
    if request.attributes.is_empty() {
        vec!["*".to_string()]
    } else {
        request.attributes.clone()
    }
}

#[async_trait]
impl DirectoryClient for LdapClient {
    fn base_dn(&self) -> &str {
        &self.base_dn
    }

    fn server(&self) -> &str {
        &self.server
    }

    async fn bind(&mut self, username: &str, password: &str) -> Result<bool, DirectoryError> {
        let result = self
            .ldap
            .with_timeout(self.network_timeout)
            .simple_bind(username, password)
            .await
            .map_err(|e| DirectoryError::Bind {
                username: username.to_string(),
                detail: e.to_string(),
            })?;

        match result.rc {
            0 => Ok(true),
            INVALID_CREDENTIALS => {
                debug!(username, "bind rejected: invalid credentials");
                Ok(false)
            }
            rc => Err(DirectoryError::Bind {
                username: username.to_string(),
                detail: format!("result code {}: {}", rc, result.text),
            }),
        }
    }

    async fn search(
        &mut self,
        request: &SearchRequest,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        match request.page_size.filter(|_| self.paging_supported) {
            Some(size) => {
                let mut paging = PagingState::new(size);
                self.search_paged(request, &mut paging).await
            }
            None => self.search_unpaged(request).await,
        }
    }

    async fn modify(&mut self, dn: &str, deltas: &[AttributeDelta]) -> Result<bool, DirectoryError> {
        if deltas.is_empty() {
            return Ok(true);
        }
        let result = self
            .ldap
            .with_timeout(self.network_timeout)
            .modify(dn, replace_mods(deltas))
            .await
            .map_err(|e| DirectoryError::Modify {
                dn: dn.to_string(),
                detail: e.to_string(),
            })?;

        if result.rc != 0 {
            warn!(dn, rc = result.rc, text = %result.text, "directory refused modify");
            return Ok(false);
        }
        Ok(true)
    }

    async fn close(&mut self) -> Result<(), DirectoryError> {
        self.ldap
            .unbind()
            .await
            .map_err(|e| DirectoryError::Connection {
                server: self.server.clone(),
                detail: format!("unbind failed: {}", e),
            })
    }
}
