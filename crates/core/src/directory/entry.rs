//! Immutable view of one search result entry.

use std::collections::BTreeMap;

use ldap3::SearchEntry;

use crate::errors::IdentifierError;
use crate::identifier::{guid_to_string, sid_to_string, ObjectIdentifier};

/// Attribute names used across the crate.
pub mod attr {
    pub const SAM_ACCOUNT_NAME: &str = "samaccountname";
    pub const USER_PRINCIPAL_NAME: &str = "userprincipalname";
    pub const OBJECT_GUID: &str = "objectguid";
    pub const OBJECT_SID: &str = "objectsid";
    pub const MEMBER_OF: &str = "memberof";
    pub const PRIMARY_GROUP_ID: &str = "primarygroupid";
    pub const USER_ACCOUNT_CONTROL: &str = "useraccountcontrol";
    pub const MAIL: &str = "mail";
    pub const DEFAULT_NAMING_CONTEXT: &str = "defaultnamingcontext";
    pub const SUPPORTED_CONTROL: &str = "supportedcontrol";
}

/// Raw attribute map of a single directory entry.
///
/// Attribute names are stored lower-cased because LDAP attribute
/// descriptions are case-insensitive. Values are kept as raw octets so that
/// binary attributes (`objectGUID`, `objectSid`) survive untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    dn: String,
    attributes: BTreeMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute insertion. Replaces existing values.
    pub fn with_attribute<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        self.attributes.insert(
            name.to_ascii_lowercase(),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Convert an `ldap3` search entry.
    ///
    /// `ldap3` splits values into UTF-8 (`attrs`) and non-UTF-8
    /// (`bin_attrs`); both are merged back into raw octets here, so a GUID
    /// that happens to be valid UTF-8 is still recoverable byte for byte.
    pub fn from_search_entry(entry: SearchEntry) -> Self {
        let mut attributes: BTreeMap<String, Vec<Vec<u8>>> = BTreeMap::new();
        for (name, values) in entry.attrs {
            attributes
                .entry(name.to_ascii_lowercase())
                .or_default()
                .extend(values.into_iter().map(String::into_bytes));
        }
        for (name, values) in entry.bin_attrs {
            attributes
                .entry(name.to_ascii_lowercase())
                .or_default()
                .extend(values);
        }
        Self {
            dn: entry.dn,
            attributes,
        }
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(&name.to_ascii_lowercase())
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// All raw values of an attribute; empty when absent.
    pub fn raw_values(&self, name: &str) -> &[Vec<u8>] {
        self.attributes
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first_raw(&self, name: &str) -> Option<&[u8]> {
        self.raw_values(name).first().map(Vec::as_slice)
    }

    /// First value decoded as UTF-8 (lossy).
    pub fn first_str(&self, name: &str) -> Option<String> {
        self.first_raw(name)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    /// All values decoded as UTF-8 (lossy).
    pub fn strings(&self, name: &str) -> Vec<String> {
        self.raw_values(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect()
    }

    pub fn first_i64(&self, name: &str) -> Option<i64> {
        self.first_str(name).and_then(|s| s.trim().parse().ok())
    }

    pub fn sam_account_name(&self) -> Option<String> {
        self.first_str(attr::SAM_ACCOUNT_NAME)
    }

    pub fn user_principal_name(&self) -> Option<String> {
        self.first_str(attr::USER_PRINCIPAL_NAME)
    }

    /// `objectGUID` in canonical string form, if present.
    pub fn object_guid(&self) -> Result<Option<String>, IdentifierError> {
        self.first_raw(attr::OBJECT_GUID)
            .map(guid_to_string)
            .transpose()
    }

    /// `objectSid` in `S-1-5-...` form, if present.
    pub fn object_sid(&self) -> Result<Option<String>, IdentifierError> {
        self.first_raw(attr::OBJECT_SID).map(sid_to_string).transpose()
    }

    /// Both identifiers; `None` when the entry carries no GUID.
    pub fn object_identifier(&self) -> Result<Option<ObjectIdentifier>, IdentifierError> {
        let Some(guid) = self.object_guid()? else {
            return Ok(None);
        };
        Ok(Some(ObjectIdentifier {
            sid: self.object_sid()?,
            guid,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_attribute_lookup_is_case_insensitive() {
        let entry = DirectoryEntry::new("CN=John Doe,OU=Staff,DC=example,DC=com")
            .with_attribute("sAMAccountName", ["jdoe"])
            .with_attribute("memberOf", ["CN=A,DC=example,DC=com", "CN=B,DC=example,DC=com"]);

        assert_eq!(entry.sam_account_name().as_deref(), Some("jdoe"));
        assert_eq!(entry.first_str("SAMACCOUNTNAME").as_deref(), Some("jdoe"));
        assert_eq!(entry.strings("memberof").len(), 2);
        assert!(entry.has("MemberOf"));
        assert!(entry.raw_values("missing").is_empty());
    }

    #[test]
    fn test_from_search_entry_merges_binary_values() {
        let mut attrs = HashMap::new();
        attrs.insert("sAMAccountName".to_string(), vec!["jdoe".to_string()]);
        let mut bin_attrs = HashMap::new();
        bin_attrs.insert("objectGUID".to_string(), vec![vec![0xFFu8; 16]]);

        let entry = DirectoryEntry::from_search_entry(SearchEntry {
            dn: "CN=jdoe,DC=example,DC=com".into(),
            attrs,
            bin_attrs,
        });

        assert_eq!(entry.dn(), "CN=jdoe,DC=example,DC=com");
        assert_eq!(entry.first_raw("objectGUID"), Some(&[0xFFu8; 16][..]));
        assert_eq!(
            entry.object_guid().unwrap().as_deref(),
            Some("FFFFFFFF-FFFF-FFFF-FFFF-FFFFFFFFFFFF")
        );
    }

    #[test]
    fn test_object_identifier() {
        let sid = crate::identifier::string_to_sid("S-1-5-21-1-2-3-1104").unwrap();
        let entry = DirectoryEntry::new("CN=x")
            .with_attribute("objectGUID", [vec![0u8; 16]])
            .with_attribute("objectSid", [sid]);
        let ident = entry.object_identifier().unwrap().unwrap();
        assert_eq!(ident.sid.as_deref(), Some("S-1-5-21-1-2-3-1104"));
        assert_eq!(ident.guid, "00000000-0000-0000-0000-000000000000");

        let no_guid = DirectoryEntry::new("CN=y");
        assert!(no_guid.object_identifier().unwrap().is_none());

        let broken = DirectoryEntry::new("CN=z").with_attribute("objectGUID", [vec![1u8, 2, 3]]);
        assert!(broken.object_guid().is_err());
    }
}
