//! Security Identifier (SID) codec.
//!
//! Wire layout:
//!
//! ```text
//! revision            1 byte
//! sub-authority count 1 byte
//! identifier auth.    6 bytes, big-endian
//! sub-authorities     4 bytes each, little-endian
//! ```
//!
//! String form is `S-{revision}-{authority}-{sub1}-...-{subN}`.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex_lite::Regex;

use crate::errors::IdentifierError;

/// Windows caps a SID at 15 sub-authorities.
pub const MAX_SUB_AUTHORITIES: usize = 15;

const HEADER_LEN: usize = 8;
const MAX_AUTHORITY: u64 = (1 << 48) - 1;

fn sid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^S-(\d{1,3})-(\d+|0[xX][0-9a-fA-F]{1,12})((?:-\d+)*)$")
            .expect("SID pattern is a valid regex")
    })
}

/// A parsed security identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sid {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    /// Build a SID from its parts.
    pub fn new(
        revision: u8,
        authority: u64,
        sub_authorities: Vec<u32>,
    ) -> Result<Self, IdentifierError> {
        if authority > MAX_AUTHORITY || sub_authorities.len() > MAX_SUB_AUTHORITIES {
            return Err(IdentifierError::InvalidSidString(format!(
                "S-{}-{}-<{} sub-authorities>",
                revision,
                authority,
                sub_authorities.len()
            )));
        }
        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    /// Decode the binary wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentifierError> {
        let invalid = |detail: &str| IdentifierError::InvalidSidBytes {
            len: bytes.len(),
            detail: detail.to_string(),
        };

        if bytes.len() < HEADER_LEN {
            return Err(invalid("shorter than the 8-byte header"));
        }

        let revision = bytes[0];
        let count = bytes[1] as usize;
        if count > MAX_SUB_AUTHORITIES {
            return Err(invalid("more than 15 sub-authorities"));
        }
        if bytes.len() != HEADER_LEN + 4 * count {
            return Err(invalid("length does not match sub-authority count"));
        }

        let authority = bytes[2..HEADER_LEN]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

        let sub_authorities = bytes[HEADER_LEN..]
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    /// Encode into the binary wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + 4 * self.sub_authorities.len());
        out.push(self.revision);
        out.push(self.sub_authorities.len() as u8);
        out.extend_from_slice(&self.authority.to_be_bytes()[2..]);
        for sub in &self.sub_authorities {
            out.extend_from_slice(&sub.to_le_bytes());
        }
        out
    }

    pub fn revision(&self) -> u8 {
        self.revision
    }

    pub fn authority(&self) -> u64 {
        self.authority
    }

    pub fn sub_authorities(&self) -> &[u32] {
        &self.sub_authorities
    }

    /// The relative identifier: the final sub-authority.
    pub fn rid(&self) -> Option<u32> {
        self.sub_authorities.last().copied()
    }

    /// The domain part of the SID, i.e. this SID without its RID.
    pub fn domain(&self) -> Option<Sid> {
        if self.sub_authorities.is_empty() {
            return None;
        }
        Some(Sid {
            revision: self.revision,
            authority: self.authority,
            sub_authorities: self.sub_authorities[..self.sub_authorities.len() - 1].to_vec(),
        })
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.authority)?;
        for sub in &self.sub_authorities {
            write!(f, "-{}", sub)?;
        }
        Ok(())
    }
}

impl FromStr for Sid {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IdentifierError::InvalidSidString(s.to_string());
        let caps = sid_pattern().captures(s).ok_or_else(invalid)?;

        let revision: u8 = caps[1].parse().map_err(|_| invalid())?;

        let authority_str = &caps[2];
        let authority = match authority_str
            .strip_prefix("0x")
            .or_else(|| authority_str.strip_prefix("0X"))
        {
            Some(hex_digits) => u64::from_str_radix(hex_digits, 16).map_err(|_| invalid())?,
            None => authority_str.parse::<u64>().map_err(|_| invalid())?,
        };
        if authority > MAX_AUTHORITY {
            return Err(invalid());
        }

        let sub_authorities = caps[3]
            .split('-')
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        if sub_authorities.len() > MAX_SUB_AUTHORITIES {
            return Err(invalid());
        }

        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }
}

/// Convert a binary `objectSid` into its `S-1-5-...` string form.
pub fn sid_to_string(bytes: &[u8]) -> Result<String, IdentifierError> {
    Sid::from_bytes(bytes).map(|sid| sid.to_string())
}

/// Convert a `S-1-5-...` string into the binary `objectSid` wire form.
pub fn string_to_sid(s: &str) -> Result<Vec<u8>, IdentifierError> {
    s.parse::<Sid>().map(|sid| sid.to_bytes())
}

/// Derive the SID of a user's primary group.
///
/// The user SID's final 4 bytes (its RID) are replaced by `group_rid` packed
/// little-endian. Only meaningful when the group lives in the user's own
/// domain; a primary group in another domain cannot be derived this way.
pub fn derive_primary_group_sid(user_sid: &[u8], group_rid: u32) -> Result<Vec<u8>, IdentifierError> {
    let sid = Sid::from_bytes(user_sid)?;
    if sid.sub_authorities.is_empty() {
        return Err(IdentifierError::InvalidSidBytes {
            len: user_sid.len(),
            detail: "SID has no RID to replace".into(),
        });
    }

    let mut out = user_sid.to_vec();
    let rid_offset = out.len() - 4;
    out[rid_offset..].copy_from_slice(&group_rid.to_le_bytes());
    Ok(out)
}

/// String form of the domain SID a binary user SID belongs to.
pub fn domain_sid(user_sid: &[u8]) -> Result<String, IdentifierError> {
    let sid = Sid::from_bytes(user_sid)?;
    sid.domain()
        .map(|d| d.to_string())
        .ok_or_else(|| IdentifierError::InvalidSidBytes {
            len: user_sid.len(),
            detail: "SID has no domain part".into(),
        })
}
