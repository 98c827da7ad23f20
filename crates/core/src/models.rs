//! Run-level result types shared by the engine, the database layer and the
//! daemon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Directory to local store.
    ToLocal,
    /// Local store to directory.
    ToDirectory,
    /// Single identity at login time.
    Login,
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToLocal => write!(f, "to_local"),
            Self::ToDirectory => write!(f, "to_directory"),
            Self::Login => write!(f, "login"),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-identity outcome
// ---------------------------------------------------------------------------

/// What happened to one identity during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Created,
    Updated,
    Enabled,
    Disabled,
    Skipped,
    /// Matched, but local and directory state already agree.
    Unchanged,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Skipped => "skipped",
            Self::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

/// A failure scoped to one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFailure {
    /// DN, GUID or login; whatever identified the record when it failed.
    pub identity: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Run result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    /// Every identity processed without error.
    Completed,
    /// The run finished but some identities failed.
    CompletedWithErrors,
    /// A fatal error aborted the run.
    Failed,
}

impl std::fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::CompletedWithErrors => write!(f, "completed_with_errors"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Aggregated outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub run_id: Uuid,
    pub profile: String,
    pub direction: SyncDirection,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created: usize,
    pub updated: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub skipped: usize,
    pub unchanged: usize,
    pub errors: Vec<IdentityFailure>,
}

impl SyncResult {
    pub fn new(profile: impl Into<String>, direction: SyncDirection) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            profile: profile.into(),
            direction,
            started_at: Utc::now(),
            completed_at: None,
            created: 0,
            updated: 0,
            enabled: 0,
            disabled: 0,
            skipped: 0,
            unchanged: 0,
            errors: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Enabled => self.enabled += 1,
            SyncOutcome::Disabled => self.disabled += 1,
            SyncOutcome::Skipped => self.skipped += 1,
            SyncOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn record_failure(&mut self, identity: impl Into<String>, message: impl Into<String>) {
        self.errors.push(IdentityFailure {
            identity: identity.into(),
            message: message.into(),
        });
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Identities that reached a final outcome, errors included.
    pub fn processed(&self) -> usize {
        self.created
            + self.updated
            + self.enabled
            + self.disabled
            + self.skipped
            + self.unchanged
            + self.errors.len()
    }

    pub fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn status(&self) -> SyncRunStatus {
        if self.errors.is_empty() {
            SyncRunStatus::Completed
        } else {
            SyncRunStatus::CompletedWithErrors
        }
    }

    /// One-line summary for logs and the audit trail.
    pub fn summary(&self) -> String {
        format!(
            "created: {}, updated: {}, enabled: {}, disabled: {}, skipped: {}, errors: {}",
            self.created,
            self.updated,
            self.enabled,
            self.disabled,
            self.skipped,
            self.errors.len()
        )
    }
}
