//! Typed attribute mapping between directory entries and local identities.
//!
//! Each [`AttributeDefinition`] names a directory attribute, how to convert
//! its raw value, and the local key it is stored under. Only attributes with
//! a definition are ever written locally.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::directory::{AttributeDelta, DirectoryEntry};
use crate::errors::ConfigError;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET_SECS: i64 = 11_644_473_600;
const FILETIME_TICKS_PER_SEC: i64 = 10_000_000;

/// How a raw directory value is converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// First value as UTF-8.
    String,
    /// Every value as UTF-8.
    List,
    Integer,
    /// `TRUE`/`FALSE` or `1`/`0`.
    Bool,
    /// First value, base64 encoded.
    Octet,
    /// LDAP generalized time.
    Time,
    /// Windows FILETIME (100 ns ticks since 1601).
    Timestamp,
    /// CN component of a DN value.
    Cn,
}

impl AttributeKind {
    /// Kinds whose local value can be written back unchanged.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            AttributeKind::String | AttributeKind::List | AttributeKind::Integer | AttributeKind::Bool
        )
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub directory_attribute: String,
    pub kind: AttributeKind,
    pub meta_key: String,
    #[serde(default)]
    pub description: String,
    /// Keep an empty directory value and clear the local one with it.
    #[serde(default)]
    pub overwrite_with_empty: bool,
    #[serde(default)]
    pub sync_to_directory: bool,
    #[serde(default = "default_true")]
    pub visible_in_profile: bool,
}

impl AttributeDefinition {
    pub fn new(directory_attribute: &str, kind: AttributeKind, meta_key: &str) -> Self {
        Self {
            directory_attribute: directory_attribute.to_string(),
            kind,
            meta_key: meta_key.to_string(),
            description: String::new(),
            overwrite_with_empty: false,
            sync_to_directory: false,
            visible_in_profile: true,
        }
    }

    pub fn overwrite_with_empty(mut self, value: bool) -> Self {
        self.overwrite_with_empty = value;
        self
    }

    pub fn sync_to_directory(mut self, value: bool) -> Self {
        self.sync_to_directory = value;
        self
    }

    /// Convert this definition's attribute of `entry`.
    pub fn convert(&self, entry: &DirectoryEntry) -> AttributeValue {
        let name = self.directory_attribute.as_str();
        let value = match self.kind {
            AttributeKind::String => entry.first_str(name).map(AttributeValue::Text),
            AttributeKind::List => Some(AttributeValue::List(entry.strings(name))),
            AttributeKind::Integer => entry.first_i64(name).map(AttributeValue::Integer),
            AttributeKind::Bool => entry.first_str(name).and_then(|v| parse_bool(&v)).map(AttributeValue::Bool),
            AttributeKind::Octet => entry
                .first_raw(name)
                .filter(|v| !v.is_empty())
                .map(|v| AttributeValue::Text(BASE64.encode(v))),
            AttributeKind::Time => entry
                .first_str(name)
                .and_then(|v| generalized_time_to_rfc3339(&v))
                .map(AttributeValue::Text),
            AttributeKind::Timestamp => entry
                .first_i64(name)
                .and_then(filetime_to_rfc3339)
                .map(AttributeValue::Text),
            AttributeKind::Cn => entry.first_str(name).and_then(|v| cn_of(&v)).map(AttributeValue::Text),
        };
        value.unwrap_or(AttributeValue::Empty)
    }
}

/// A converted attribute value as stored on a local identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    List(Vec<String>),
    Integer(i64),
    Bool(bool),
    Empty,
}

impl AttributeValue {
    pub fn is_empty(&self) -> bool {
        match self {
            AttributeValue::Empty => true,
            AttributeValue::Text(s) => s.is_empty(),
            AttributeValue::List(v) => v.is_empty(),
            AttributeValue::Integer(_) | AttributeValue::Bool(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Wire values for a replace modification.
    pub fn to_directory_values(&self) -> Vec<Vec<u8>> {
        match self {
            AttributeValue::Text(s) if s.is_empty() => Vec::new(),
            AttributeValue::Text(s) => vec![s.clone().into_bytes()],
            AttributeValue::List(items) => items.iter().map(|s| s.clone().into_bytes()).collect(),
            AttributeValue::Integer(n) => vec![n.to_string().into_bytes()],
            AttributeValue::Bool(b) => vec![if *b { b"TRUE".to_vec() } else { b"FALSE".to_vec() }],
            AttributeValue::Empty => Vec::new(),
        }
    }

    /// Canonical form for comparisons: empties collapse, lists are sorted.
    fn normalized(&self) -> AttributeValue {
        match self {
            v if v.is_empty() => AttributeValue::Empty,
            AttributeValue::List(items) => {
                let mut items = items.clone();
                items.sort();
                AttributeValue::List(items)
            }
            v => v.clone(),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        v if v.eq_ignore_ascii_case("true") || v == "1" => Some(true),
        v if v.eq_ignore_ascii_case("false") || v == "0" => Some(false),
        _ => None,
    }
}

/// `20240102030405.0Z` -> `2024-01-02T03:04:05Z`.
fn generalized_time_to_rfc3339(value: &str) -> Option<String> {
    let digits = value.get(..14)?;
    let naive = NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S").ok()?;
    Some(naive.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// `0` and `i64::MAX` mean "never".
fn filetime_to_rfc3339(ticks: i64) -> Option<String> {
    if ticks <= 0 || ticks == i64::MAX {
        return None;
    }
    let secs = ticks / FILETIME_TICKS_PER_SEC - FILETIME_UNIX_OFFSET_SECS;
    let nanos = u32::try_from((ticks % FILETIME_TICKS_PER_SEC) * 100).ok()?;
    DateTime::<Utc>::from_timestamp(secs, nanos).map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Value of the leading `CN=` component of a DN, unescaping `\,`.
fn cn_of(dn: &str) -> Option<String> {
    let (kind, rest) = dn.split_once('=')?;
    if !kind.trim().eq_ignore_ascii_case("cn") {
        return None;
    }
    let mut out = String::new();
    let mut chars = rest.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            ',' => break,
            c => out.push(c),
        }
    }
    Some(out)
}

/// Attribute definitions every profile starts from.
pub fn default_definitions() -> Vec<AttributeDefinition> {
    [
        ("sAMAccountName", "sam_account_name"),
        ("userPrincipalName", "user_principal_name"),
        ("mail", "email"),
        ("givenName", "first_name"),
        ("sn", "last_name"),
        ("displayName", "display_name"),
        ("description", "description"),
    ]
    .into_iter()
    .map(|(attr, key)| AttributeDefinition::new(attr, AttributeKind::String, key))
    .collect()
}

/// Configured definitions plus every default they do not override (by
/// directory attribute or meta key).
pub fn merge_with_defaults(configured: Vec<AttributeDefinition>) -> Vec<AttributeDefinition> {
    let attrs: HashSet<String> = configured
        .iter()
        .map(|d| d.directory_attribute.to_ascii_lowercase())
        .collect();
    let keys: HashSet<&str> = configured.iter().map(|d| d.meta_key.as_str()).collect();

    let mut merged: Vec<AttributeDefinition> = default_definitions()
        .into_iter()
        .filter(|d| {
            !attrs.contains(&d.directory_attribute.to_ascii_lowercase())
                && !keys.contains(d.meta_key.as_str())
        })
        .collect();
    merged.extend(configured);
    merged
}

/// Reject definitions that cannot be applied.
pub fn validate_definitions(definitions: &[AttributeDefinition]) -> Result<(), ConfigError> {
    let mut keys = HashSet::new();
    for def in definitions {
        let field = format!("attributes.{}", def.meta_key);
        if def.directory_attribute.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field,
                detail: "directory_attribute must not be empty".into(),
            });
        }
        if def.meta_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("attributes.{}", def.directory_attribute),
                detail: "meta_key must not be empty".into(),
            });
        }
        if !keys.insert(def.meta_key.as_str()) {
            return Err(ConfigError::InvalidValue {
                field,
                detail: "meta_key is defined more than once".into(),
            });
        }
        if def.sync_to_directory && !def.kind.is_writable() {
            return Err(ConfigError::InvalidValue {
                field,
                detail: format!("{:?} attributes cannot be synced to the directory", def.kind),
            });
        }
    }
    Ok(())
}

/// Converted values keyed by meta key. Empty values are dropped unless the
/// definition asks to overwrite with empty.
pub fn map_attributes(
    entry: &DirectoryEntry,
    definitions: &[AttributeDefinition],
) -> BTreeMap<String, AttributeValue> {
    let mut mapped = BTreeMap::new();
    for def in definitions {
        let value = def.convert(entry);
        if value.is_empty() {
            if def.overwrite_with_empty {
                mapped.insert(def.meta_key.clone(), AttributeValue::Empty);
            }
            continue;
        }
        mapped.insert(def.meta_key.clone(), value);
    }
    mapped
}

/// Replace-deltas that bring `entry` in line with the local values of every
/// `sync_to_directory` definition.
pub fn directory_deltas(
    local: &BTreeMap<String, AttributeValue>,
    entry: &DirectoryEntry,
    definitions: &[AttributeDefinition],
) -> Vec<AttributeDelta> {
    definitions
        .iter()
        .filter(|def| def.sync_to_directory && def.kind.is_writable())
        .filter_map(|def| {
            let wanted = local.get(&def.meta_key)?.normalized();
            let current = def.convert(entry).normalized();
            if wanted == current {
                return None;
            }
            if wanted.is_empty() {
                return def
                    .overwrite_with_empty
                    .then(|| AttributeDelta::clear(def.directory_attribute.clone()));
            }
            Some(AttributeDelta::replace(
                def.directory_attribute.clone(),
                wanted.to_directory_values(),
            ))
        })
        .collect()
}

/// Shared, read-only attribute definition set.
#[derive(Debug, Clone)]
pub struct AttributeMapper {
    definitions: Arc<[AttributeDefinition]>,
}

impl AttributeMapper {
    /// Merge `configured` with the defaults.
    pub fn new(configured: Vec<AttributeDefinition>) -> Self {
        Self::from_definitions(merge_with_defaults(configured))
    }

    /// Use exactly these definitions.
    pub fn from_definitions(definitions: Vec<AttributeDefinition>) -> Self {
        Self {
            definitions: definitions.into(),
        }
    }

    pub fn definitions(&self) -> &[AttributeDefinition] {
        &self.definitions
    }

    /// Directory attributes to request in searches.
    pub fn directory_attributes(&self) -> Vec<String> {
        self.definitions
            .iter()
            .map(|d| d.directory_attribute.clone())
            .collect()
    }

    pub fn map(&self, entry: &DirectoryEntry) -> BTreeMap<String, AttributeValue> {
        map_attributes(entry, &self.definitions)
    }

    pub fn directory_deltas(
        &self,
        local: &BTreeMap<String, AttributeValue>,
        entry: &DirectoryEntry,
    ) -> Vec<AttributeDelta> {
        directory_deltas(local, entry, &self.definitions)
    }

    pub fn has_writeback(&self) -> bool {
        self.definitions.iter().any(|d| d.sync_to_directory)
    }
}
