//! Runs every profile's sync on a fixed interval.
//!
//! A tick that arrives while the previous round is still running is
//! skipped rather than queued. Each finished run is written to the
//! `sync_runs` history, the audit log and the `kv_state` table.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time;
use tracing::{error, info, warn};

use adsync_core::db::Database;
use adsync_core::errors::SyncError;
use adsync_core::models::{SyncDirection, SyncResult, SyncRunStatus};
use adsync_core::sync_engine::SyncEngine;

/// Aggregate counters across rounds.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub total_rounds: AtomicU64,
    pub failed_runs: AtomicU64,
    pub consecutive_failures: AtomicU64,
}

pub struct Scheduler {
    engines: Vec<Arc<SyncEngine>>,
    db: Arc<Database>,
    poll_interval: Duration,
    running: AtomicBool,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(engines: Vec<Arc<SyncEngine>>, db: Arc<Database>, poll_interval: Duration) -> Self {
        Self {
            engines,
            db,
            poll_interval,
            running: AtomicBool::new(false),
            stats: SchedulerStats::default(),
        }
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Run rounds until `shutdown` is notified. The first round starts
    /// immediately.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            profiles = self.engines.len(),
            "scheduler started"
        );

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.maybe_run_round("scheduled").await;
                }
                _ = shutdown.notified() => {
                    info!("scheduler stopping");
                    break;
                }
            }
        }
    }

    /// One round over every profile. Returns `true` when no run failed.
    pub async fn run_once(&self) -> bool {
        self.maybe_run_round("once").await.unwrap_or(false)
    }

    /// `None` when the previous round is still running.
    async fn maybe_run_round(&self, trigger: &str) -> Option<bool> {
        let Some(_guard) = RoundGuard::try_acquire(&self.running) else {
            warn!(trigger, "skipping sync round: previous round still running");
            return None;
        };

        let round = self.stats.total_rounds.fetch_add(1, Ordering::SeqCst) + 1;
        info!(round, trigger, "starting sync round");

        let mut all_ok = true;
        for engine in &self.engines {
            all_ok &= self.run_profile(engine).await;
        }

        if all_ok {
            self.stats.consecutive_failures.store(0, Ordering::SeqCst);
        } else {
            let consecutive = self.stats.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(round, consecutive_failures = consecutive, "sync round had failed runs");
        }

        Some(all_ok)
    }

    async fn run_profile(&self, engine: &SyncEngine) -> bool {
        let profile = &engine.profile().name;
        let sync = &engine.profile().sync;
        let mut ok = true;

        if sync.to_local_enabled {
            let outcome = engine.sync_to_local().await;
            ok &= self.record(profile, SyncDirection::ToLocal, outcome);
        }
        if sync.to_directory_enabled {
            let outcome = engine.sync_to_directory().await;
            ok &= self.record(profile, SyncDirection::ToDirectory, outcome);
        }
        ok
    }

    /// Persist one run. Returns `false` for a failed run.
    fn record(&self, profile: &str, direction: SyncDirection, outcome: Result<SyncResult, SyncError>) -> bool {
        let (result, status, details, ok) = match outcome {
            Ok(result) => {
                info!(
                    profile,
                    %direction,
                    run_id = %result.run_id,
                    summary = %result.summary(),
                    "sync run finished"
                );
                let status = result.status();
                (result, status, None, true)
            }
            Err(e) => {
                self.stats.failed_runs.fetch_add(1, Ordering::SeqCst);
                error!(profile, %direction, error = %e, "sync run failed");
                let mut result = SyncResult::new(profile, direction);
                result.finish();
                (result, SyncRunStatus::Failed, Some(e.to_string()), false)
            }
        };

        let action = format!("sync_{}", direction);
        let audit_details = details.clone().unwrap_or_else(|| result.summary());
        if let Err(e) = self.db.record_sync_run(&result, status, details.as_deref()) {
            warn!(profile, error = %e, "failed to record sync run");
        }
        if let Err(e) = self
            .db
            .insert_audit_log(&action, Some(profile), None, Some(&audit_details), ok)
        {
            warn!(profile, error = %e, "failed to write audit log");
        }
        let key = format!("{}.{}", profile, direction);
        let state = [
            (format!("{}.last_run_at", key), Utc::now().to_rfc3339()),
            (format!("{}.last_status", key), status.to_string()),
            (format!("{}.last_summary", key), audit_details),
        ];
        for (k, v) in &state {
            if let Err(e) = self.db.set_state(k, v) {
                warn!(key = %k, error = %e, "failed to update state");
            }
        }
        ok
    }
}

/// Holds the round flag; cleared on drop, including during unwinding.
struct RoundGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> RoundGuard<'a> {
    fn try_acquire(running: &'a AtomicBool) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { running })
    }
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
