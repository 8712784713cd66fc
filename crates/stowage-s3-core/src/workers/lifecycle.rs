//! Lifecycle expiration worker.
//!
//! Evaluates every enabled lifecycle rule and permanently deletes live
//! versions under the rule's prefix that are older than its expiration.
//! Expiration bypasses GOVERNANCE retention; versions under legal hold or
//! active COMPLIANCE retention are skipped and counted.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::engine::ObjectEngine;
use crate::error::{StorageError, StorageResult};
use crate::ops::object::Removal;
use crate::retention::{days_before, is_hard_locked};
use crate::state::VersionId;

/// Counters of one lifecycle sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleStats {
    /// Buckets with at least one enabled rule.
    pub buckets: usize,
    /// Versions expired.
    pub expired: usize,
    /// Expired versions kept because of a legal hold or COMPLIANCE lock.
    pub skipped_locked: usize,
    /// Versions that could not be expired.
    pub errors: usize,
}

impl LifecycleStats {
    /// Add another sweep's counters.
    pub fn merge(&mut self, other: Self) {
        self.buckets += other.buckets;
        self.expired += other.expired;
        self.skipped_locked += other.skipped_locked;
        self.errors += other.errors;
    }
}

impl ObjectEngine {
    /// Expire versions matched by enabled lifecycle rules as of `now`.
    ///
    /// A rule whose candidates cannot be listed is counted as an error and
    /// the sweep moves on to the next rule.
    pub async fn run_lifecycle_sweep(&self, now: DateTime<Utc>) -> StorageResult<LifecycleStats> {
        let mut stats = LifecycleStats::default();
        for config in self.buckets.all() {
            let Some(lifecycle) = &config.lifecycle else {
                continue;
            };
            let rules: Vec<_> = lifecycle.enabled_rules().collect();
            if rules.is_empty() {
                debug!(bucket = %config.name, "no enabled lifecycle rules");
                continue;
            }

            let mut bucket_stats = LifecycleStats {
                buckets: 1,
                ..LifecycleStats::default()
            };
            let mut handled: HashSet<(String, VersionId)> = HashSet::new();
            for rule in rules {
                let Some(cutoff) = days_before(now, rule.expiration_days) else {
                    debug!(bucket = %config.name, rule = %rule.id, "expiration reaches before the calendar");
                    continue;
                };
                let candidates = match self.index.live_versions_older_than(
                    &config.name,
                    &rule.prefix,
                    cutoff,
                ) {
                    Ok(candidates) => candidates,
                    Err(e) => {
                        warn!(bucket = %config.name, rule = %rule.id, error = %e, "failed to list expiration candidates");
                        bucket_stats.errors += 1;
                        continue;
                    }
                };
                for record in candidates {
                    if !handled.insert((record.key.clone(), record.version_id)) {
                        continue;
                    }
                    if is_hard_locked(&record.lock, now) {
                        debug!(bucket = %config.name, key = %record.key, version = %record.version_id, "expired version is locked");
                        bucket_stats.skipped_locked += 1;
                        continue;
                    }
                    let stat = match self
                        .store
                        .stat(&config.name, &record.key, &record.version_id)
                        .await
                    {
                        Ok(Some(stat)) => stat,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(bucket = %config.name, key = %record.key, error = %e, "failed to stat expired version");
                            bucket_stats.errors += 1;
                            continue;
                        }
                    };
                    match self
                        .remove_versions(&config, &record.key, &[stat], true, Removal::Expired)
                        .await
                    {
                        Ok(_) => bucket_stats.expired += 1,
                        Err(StorageError::Locked { .. }) => bucket_stats.skipped_locked += 1,
                        Err(e) => {
                            warn!(bucket = %config.name, key = %record.key, rule = %rule.id, error = %e, "failed to expire version");
                            bucket_stats.errors += 1;
                        }
                    }
                }
            }
            info!(
                bucket = %config.name,
                expired = bucket_stats.expired,
                skipped_locked = bucket_stats.skipped_locked,
                "applied lifecycle rules"
            );
            stats.merge(bucket_stats);
        }
        Ok(stats)
    }
}

/// Background lifecycle worker.
#[derive(Debug)]
pub struct LifecycleWorker {
    engine: ObjectEngine,
}

impl LifecycleWorker {
    /// Creates a new lifecycle worker.
    #[must_use]
    pub fn new(engine: ObjectEngine) -> Self {
        Self { engine }
    }

    /// Spawns the worker as a background task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(&self) {
        let period = self.engine.config().lifecycle_interval();
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = period.as_secs(), "lifecycle worker started");

        // Skip the first tick (fires immediately)
        timer.tick().await;

        loop {
            timer.tick().await;
            let start = std::time::Instant::now();
            match self.engine.run_lifecycle_sweep(Utc::now()).await {
                Ok(stats) => info!(
                    elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                    buckets = stats.buckets,
                    expired = stats.expired,
                    skipped_locked = stats.skipped_locked,
                    errors = stats.errors,
                    "lifecycle sweep completed"
                ),
                Err(e) => error!(error = %e, "lifecycle sweep failed"),
            }
        }
    }
}
