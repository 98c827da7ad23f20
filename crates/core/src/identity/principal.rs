//! Login name normalization.
//!
//! A login typed by a user can be a bare `samAccountName`, a UPN
//! (`jdoe@example.com`) or, when enabled, a Down-Level Logon Name
//! (`EXAMPLE\jdoe`). [`PrincipalResolver::resolve`] splits it into the parts
//! used for the directory lookup; [`PrincipalResolver::backfill`] replaces
//! them with the canonical values once the entry has been found.

use std::fmt;

use tracing::{debug, warn};

use crate::directory::filter::principal_filter;
use crate::directory::{DirectoryClient, DirectoryEntry, SearchRequest};
use crate::errors::{DirectoryError, IdentifierError};
use crate::identifier::domain_sid;

/// Login credentials, progressively filled from the directory.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub raw_login: String,
    pub sam_account_name: String,
    pub user_principal_name: Option<String>,
    pub upn_suffix: Option<String>,
    pub netbios_domain: Option<String>,
    pub password: Option<String>,
    pub object_guid: Option<String>,
    pub domain_sid: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("raw_login", &self.raw_login)
            .field("sam_account_name", &self.sam_account_name)
            .field("user_principal_name", &self.user_principal_name)
            .field("upn_suffix", &self.upn_suffix)
            .field("netbios_domain", &self.netbios_domain)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("object_guid", &self.object_guid)
            .field("domain_sid", &self.domain_sid)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PrincipalResolver {
    /// Accept `DOMAIN\user` logins. Off by default.
    pub allow_down_level_logon_name: bool,
}

impl PrincipalResolver {
    pub fn new(allow_down_level_logon_name: bool) -> Self {
        Self {
            allow_down_level_logon_name,
        }
    }

    pub fn resolve(&self, raw_login: &str, password: Option<&str>) -> Credentials {
        let login = raw_login.trim();
        let mut credentials = Credentials {
            raw_login: login.to_string(),
            password: password.map(str::to_string),
            ..Credentials::default()
        };

        if self.allow_down_level_logon_name {
            if let Some((domain, sam)) = login.split_once('\\') {
                credentials.netbios_domain = Some(domain.to_string());
                credentials.sam_account_name = sam.to_string();
                return credentials;
            }
        }

        match login.split_once('@') {
            Some((sam, suffix)) => {
                credentials.sam_account_name = sam.to_string();
                credentials.upn_suffix = Some(suffix.to_string());
                credentials.user_principal_name = Some(login.to_string());
            }
            None => credentials.sam_account_name = login.to_string(),
        }
        credentials
    }

    /// Overwrite login parts with the values the directory returned.
    pub fn backfill(
        &self,
        credentials: &mut Credentials,
        entry: &DirectoryEntry,
    ) -> Result<(), IdentifierError> {
        if let Some(sam) = entry.sam_account_name().filter(|s| !s.is_empty()) {
            credentials.sam_account_name = sam;
        }
        if let Some(upn) = entry.user_principal_name().filter(|s| !s.is_empty()) {
            credentials.upn_suffix = upn.split_once('@').map(|(_, suffix)| suffix.to_string());
            credentials.user_principal_name = Some(upn);
        }
        if let Some(guid) = entry.object_guid()? {
            credentials.object_guid = Some(guid);
        }
        if let Some(sid) = entry.first_raw(crate::directory::entry::attr::OBJECT_SID) {
            credentials.domain_sid = Some(domain_sid(sid)?);
        }
        Ok(())
    }

    /// Look the principal up by samAccountName or UPN.
    ///
    /// When several entries match, the one whose samAccountName equals the
    /// login wins; otherwise the first.
    pub async fn find_principal(
        &self,
        client: &mut dyn DirectoryClient,
        credentials: &Credentials,
        attributes: &[String],
    ) -> Result<Option<DirectoryEntry>, DirectoryError> {
        if credentials.sam_account_name.is_empty() {
            return Ok(None);
        }
        let filter = principal_filter(
            &credentials.sam_account_name,
            credentials.user_principal_name.as_deref(),
        );
        let request = SearchRequest::subtree(filter).attributes(attributes.iter().cloned());
        let mut entries = client.search(&request).await?;

        if entries.len() > 1 {
            warn!(
                login = %credentials.raw_login,
                matches = entries.len(),
                "login matches several directory entries"
            );
            if let Some(pos) = entries.iter().position(|e| {
                e.sam_account_name()
                    .is_some_and(|s| s.eq_ignore_ascii_case(&credentials.sam_account_name))
            }) {
                return Ok(Some(entries.swap_remove(pos)));
            }
        }

        let found = entries.into_iter().next();
        debug!(login = %credentials.raw_login, found = found.is_some(), "principal lookup");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{guid_to_bytes, string_to_sid};

    #[test]
    fn test_bare_sam_account_name() {
        let creds = PrincipalResolver::default().resolve("jdoe", Some("secret"));
        assert_eq!(creds.sam_account_name, "jdoe");
        assert_eq!(creds.user_principal_name, None);
        assert_eq!(creds.upn_suffix, None);
        assert_eq!(creds.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_upn_login() {
        let creds = PrincipalResolver::default().resolve("jdoe@example.com", None);
        assert_eq!(creds.sam_account_name, "jdoe");
        assert_eq!(creds.upn_suffix.as_deref(), Some("example.com"));
        assert_eq!(creds.user_principal_name.as_deref(), Some("jdoe@example.com"));
    }

    #[test]
    fn test_down_level_logon_name_when_enabled() {
        let creds = PrincipalResolver::new(true).resolve("EXAMPLE\\jdoe", None);
        assert_eq!(creds.netbios_domain.as_deref(), Some("EXAMPLE"));
        assert_eq!(creds.sam_account_name, "jdoe");
        assert_eq!(creds.upn_suffix, None);
    }

    #[test]
    fn test_down_level_logon_name_when_disabled() {
        let creds = PrincipalResolver::new(false).resolve("EXAMPLE\\jdoe", None);
        assert_eq!(creds.netbios_domain, None);
        assert_eq!(creds.sam_account_name, "EXAMPLE\\jdoe");

        let creds = PrincipalResolver::new(false).resolve("EXAMPLE\\jdoe@example.com", None);
        assert_eq!(creds.sam_account_name, "EXAMPLE\\jdoe");
        assert_eq!(creds.upn_suffix.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_backfill_from_entry() {
        let resolver = PrincipalResolver::default();
        let mut creds = resolver.resolve("JDOE", Some("pw"));
        let entry = DirectoryEntry::new("CN=John Doe,DC=example,DC=com")
            .with_attribute("sAMAccountName", ["jdoe"])
            .with_attribute("userPrincipalName", ["jdoe@corp.example.com"])
            .with_attribute(
                "objectGUID",
                [guid_to_bytes("6F9619FF-8B86-D011-B42D-00C04FC964FF").unwrap()],
            )
            .with_attribute("objectSid", [string_to_sid("S-1-5-21-10-20-30-1104").unwrap()]);

        resolver.backfill(&mut creds, &entry).unwrap();
        assert_eq!(creds.sam_account_name, "jdoe");
        assert_eq!(creds.upn_suffix.as_deref(), Some("corp.example.com"));
        assert_eq!(
            creds.object_guid.as_deref(),
            Some("6F9619FF-8B86-D011-B42D-00C04FC964FF")
        );
        assert_eq!(creds.domain_sid.as_deref(), Some("S-1-5-21-10-20-30"));
        assert_eq!(creds.raw_login, "JDOE");
    }

    #[test]
    fn test_debug_hides_password() {
        let creds = PrincipalResolver::default().resolve("jdoe", Some("hunter2"));
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
