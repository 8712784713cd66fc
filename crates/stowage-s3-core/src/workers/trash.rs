//! Trash retention worker.
//!
//! Purges trashed versions once they have spent the bucket's
//! `retention_days` in the trash.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::engine::ObjectEngine;
use crate::error::StorageResult;
use crate::retention::days_after;

/// Counters of one trash sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashSweepStats {
    /// Soft-delete buckets examined.
    pub buckets: usize,
    /// Versions purged.
    pub purged: usize,
    /// Bytes released.
    pub bytes: u64,
    /// Versions that could not be purged.
    pub errors: usize,
}

impl TrashSweepStats {
    /// Add another sweep's counters.
    pub fn merge(&mut self, other: Self) {
        self.buckets += other.buckets;
        self.purged += other.purged;
        self.bytes += other.bytes;
        self.errors += other.errors;
    }
}

impl ObjectEngine {
    /// Purge every trashed version whose retention ended by `now`.
    ///
    /// A bucket whose trash cannot be listed is counted as an error and
    /// skipped.
    pub async fn run_trash_sweep(&self, now: DateTime<Utc>) -> StorageResult<TrashSweepStats> {
        let mut stats = TrashSweepStats::default();
        for config in self.buckets.all() {
            if !config.soft_delete.enabled {
                continue;
            }
            let mut bucket_stats = TrashSweepStats {
                buckets: 1,
                ..TrashSweepStats::default()
            };
            let trashed = match self.index.list_trashed(Some(&config.name)) {
                Ok(trashed) => trashed,
                Err(e) => {
                    warn!(bucket = %config.name, error = %e, "failed to list trash");
                    bucket_stats.errors += 1;
                    stats.merge(bucket_stats);
                    continue;
                }
            };
            for record in trashed {
                let Some(deleted_at) = record.deleted_at else {
                    continue;
                };
                if days_after(deleted_at, config.soft_delete.retention_days) > now {
                    continue;
                }
                match self
                    .purge_version(&config.name, &record.key, record.version_id, record.size)
                    .await
                {
                    Ok(()) => {
                        bucket_stats.purged += 1;
                        bucket_stats.bytes += record.size;
                    }
                    Err(e) => {
                        warn!(bucket = %config.name, key = %record.key, error = %e, "failed to purge expired trash");
                        bucket_stats.errors += 1;
                    }
                }
            }
            debug!(bucket = %config.name, purged = bucket_stats.purged, "swept trash");
            stats.merge(bucket_stats);
        }
        Ok(stats)
    }
}

/// Background trash retention worker.
#[derive(Debug)]
pub struct TrashWorker {
    engine: ObjectEngine,
}

impl TrashWorker {
    /// Creates a new trash worker.
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
        let period = self.engine.config().trash_interval();
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = period.as_secs(), "trash worker started");

        // Skip the first tick (fires immediately)
        timer.tick().await;

        loop {
            timer.tick().await;
            match self.engine.run_trash_sweep(Utc::now()).await {
                Ok(stats) => info!(
                    buckets = stats.buckets,
                    purged = stats.purged,
                    bytes = stats.bytes,
                    errors = stats.errors,
                    "trash sweep completed"
                ),
                Err(e) => error!(error = %e, "trash sweep failed"),
            }
        }
    }
}
