//! `userAccountControl` flags and the account restriction checks run before
//! an account is created or updated locally.
//!
//! Ref: <https://learn.microsoft.com/en-us/troubleshoot/windows-server/active-directory/useraccountcontrol-manipulate-account-properties>

use std::fmt;

use crate::directory::entry::attr;
use crate::directory::DirectoryEntry;

/// The `userAccountControl` bit field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserAccountControl(pub u32);

impl UserAccountControl {
    pub const ACCOUNTDISABLE: u32 = 0x0000_0002;
    pub const NORMAL_ACCOUNT: u32 = 0x0000_0200;
    pub const INTERDOMAIN_TRUST_ACCOUNT: u32 = 0x0000_0800;
    pub const WORKSTATION_TRUST_ACCOUNT: u32 = 0x0000_1000;
    pub const SERVER_TRUST_ACCOUNT: u32 = 0x0000_2000;
    pub const MNS_LOGON_ACCOUNT: u32 = 0x0002_0000;
    pub const SMARTCARD_REQUIRED: u32 = 0x0004_0000;
    pub const PARTIAL_SECRETS_ACCOUNT: u32 = 0x0400_0000;

    /// Any of these marks a machine or trust account.
    const NON_PERSON_MASK: u32 = Self::INTERDOMAIN_TRUST_ACCOUNT
        | Self::WORKSTATION_TRUST_ACCOUNT
        | Self::SERVER_TRUST_ACCOUNT
        | Self::MNS_LOGON_ACCOUNT
        | Self::PARTIAL_SECRETS_ACCOUNT;

    /// Read the flags from an entry. `None` when the attribute is absent or
    /// not a number.
    pub fn from_entry(entry: &DirectoryEntry) -> Option<Self> {
        entry
            .first_i64(attr::USER_ACCOUNT_CONTROL)
            .and_then(|v| u32::try_from(v).ok())
            .map(Self)
    }

    pub fn has(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    pub fn is_normal_account(self) -> bool {
        self.has(Self::NORMAL_ACCOUNT) && self.0 & Self::NON_PERSON_MASK == 0
    }

    pub fn requires_smartcard(self) -> bool {
        self.has(Self::SMARTCARD_REQUIRED)
    }

    pub fn is_disabled(self) -> bool {
        self.has(Self::ACCOUNTDISABLE)
    }
}

/// Why an account may not be used locally. A disable decision, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictionViolation {
    /// Trust, machine or otherwise non-person account, or flags unreadable.
    NotNormalAccount,
    SmartcardRequired,
    DisabledInDirectory,
}

impl RestrictionViolation {
    pub fn reason(self) -> &'static str {
        match self {
            RestrictionViolation::NotNormalAccount => "not a normal user account",
            RestrictionViolation::SmartcardRequired => "smart card required for logon",
            RestrictionViolation::DisabledInDirectory => "disabled in directory",
        }
    }
}

impl fmt::Display for RestrictionViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountDecision {
    Allowed,
    Restricted(RestrictionViolation),
}

impl AccountDecision {
    pub fn violation(self) -> Option<RestrictionViolation> {
        match self {
            AccountDecision::Allowed => None,
            AccountDecision::Restricted(v) => Some(v),
        }
    }
}

/// Check account type first, then smart card, then the disabled bit.
pub fn evaluate(uac: Option<UserAccountControl>) -> AccountDecision {
    let Some(uac) = uac else {
        return AccountDecision::Restricted(RestrictionViolation::NotNormalAccount);
    };
    if !uac.is_normal_account() {
        AccountDecision::Restricted(RestrictionViolation::NotNormalAccount)
    } else if uac.requires_smartcard() {
        AccountDecision::Restricted(RestrictionViolation::SmartcardRequired)
    } else if uac.is_disabled() {
        AccountDecision::Restricted(RestrictionViolation::DisabledInDirectory)
    } else {
        AccountDecision::Allowed
    }
}

pub fn evaluate_entry(entry: &DirectoryEntry) -> AccountDecision {
    evaluate(UserAccountControl::from_entry(entry))
}
