//! `objectGUID` codec.
//!
//! The directory stores GUIDs in the Microsoft mixed-endian layout: the first
//! three groups (4, 2 and 2 bytes) are little-endian, the remaining 8 bytes
//! are in network order. This is exactly the layout `uuid` calls `bytes_le`.

use uuid::Uuid;

use crate::errors::IdentifierError;

/// Render a 16-byte `objectGUID` as `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`.
pub fn guid_to_string(bytes: &[u8]) -> Result<String, IdentifierError> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| IdentifierError::InvalidGuidBytes(bytes.len()))?;
    Ok(Uuid::from_bytes_le(raw)
        .hyphenated()
        .to_string()
        .to_ascii_uppercase())
}

/// Parse a hyphenated GUID string back into the 16-byte wire layout.
pub fn guid_to_bytes(s: &str) -> Result<Vec<u8>, IdentifierError> {
    if s.len() != 36 {
        return Err(IdentifierError::InvalidGuidString(s.to_string()));
    }
    let uuid = Uuid::parse_str(s).map_err(|_| IdentifierError::InvalidGuidString(s.to_string()))?;
    Ok(uuid.to_bytes_le().to_vec())
}
