//! Binary <-> string codecs for Active Directory object identifiers.
//!
//! `objectSid` and `objectGUID` arrive from the directory as raw octet
//! strings. This module converts them into their canonical textual forms
//! and back, and derives a user's primary-group SID.

pub mod guid;
pub mod sid;

pub use guid::{guid_to_bytes, guid_to_string};
pub use sid::{derive_primary_group_sid, domain_sid, sid_to_string, string_to_sid, Sid};

/// The pair of identifiers every directory principal carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectIdentifier {
    pub sid: Option<String>,
    pub guid: String,
}
