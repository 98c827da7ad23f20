//! Identity resolution between directory principals and local accounts.
//!
//! - [`principal`]: login normalization and canonical back-fill
//! - [`attributes`]: typed attribute conversion and writeback deltas
//! - [`matching`]: GUID, then samAccountName, then UPN
//! - [`store`]: the local identity store contract

pub mod attributes;
pub mod matching;
pub mod principal;
pub mod store;

pub use attributes::{AttributeDefinition, AttributeKind, AttributeMapper, AttributeValue};
pub use matching::{match_local_identity, MatchedBy};
pub use principal::{Credentials, PrincipalResolver};
pub use store::{IdentityDelta, IdentityStore, LocalIdentity, NewIdentity};
