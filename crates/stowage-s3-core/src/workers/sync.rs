//! Filesystem-to-index reconciliation.
//!
//! A sweep walks every bucket directory and brings the metadata index in
//! line with what is on disk: dangling `.latest` pointers are repaired,
//! missing versions inserted, trashed rows that are live again
//! resurrected, size and encryption drift corrected, latest flags fixed
//! and rows without bytes pruned. Running a sweep twice in a row makes no
//! changes the second time.
//!
//! [`SyncWorker`] runs a full sweep on a timer and single-bucket sweeps
//! after filesystem changes settle.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tracing::{debug, error, info, warn};

use crate::engine::ObjectEngine;
use crate::error::{StorageError, StorageResult};
use crate::ops::list::scanned_latest_id;
use crate::state::{BucketConfig, VersionId, VersionRecord};
use crate::storage::{PointerRepair, PointerState, ScannedObject};
use crate::validation::is_folder_key;

/// Counters of one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    /// Buckets swept.
    pub buckets: usize,
    /// Objects found on disk.
    pub objects_scanned: usize,
    /// Version rows inserted.
    pub inserted: usize,
    /// Version rows whose size or encryption was corrected.
    pub updated: usize,
    /// Trashed rows found live on disk and restored.
    pub resurrected: usize,
    /// Rows whose latest flag was corrected.
    pub latest_fixed: usize,
    /// Pointers promoted or removed.
    pub pointers_repaired: usize,
    /// Rows removed because their bytes are gone.
    pub orphans_pruned: usize,
    /// Upload rows removed because their staging is gone.
    pub uploads_pruned: usize,
    /// Bucket directories registered with default settings.
    pub buckets_registered: usize,
    /// Buckets forgotten because their directory is gone.
    pub buckets_pruned: usize,
    /// Paths that could not be read or reconciled.
    pub errors: usize,
}

impl SyncStats {
    /// Add another sweep's counters.
    pub fn merge(&mut self, other: Self) {
        self.buckets += other.buckets;
        self.objects_scanned += other.objects_scanned;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.resurrected += other.resurrected;
        self.latest_fixed += other.latest_fixed;
        self.pointers_repaired += other.pointers_repaired;
        self.orphans_pruned += other.orphans_pruned;
        self.uploads_pruned += other.uploads_pruned;
        self.buckets_registered += other.buckets_registered;
        self.buckets_pruned += other.buckets_pruned;
        self.errors += other.errors;
    }

    /// Number of changes made to the index or the filesystem.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.inserted
            + self.updated
            + self.resurrected
            + self.latest_fixed
            + self.pointers_repaired
            + self.orphans_pruned
            + self.uploads_pruned
            + self.buckets_registered
            + self.buckets_pruned
    }
}

/// Whether a scanned pointer needs [`crate::storage::VersionStore::repair_pointer`].
fn pointer_needs_repair(object: &ScannedObject) -> bool {
    if is_folder_key(&object.key) {
        return false;
    }
    match object.pointer {
        PointerState::Valid(v) => !object.versions.iter().any(|s| s.version_id == v),
        PointerState::Invalid => true,
        PointerState::Absent => object.versions.iter().any(|s| s.version_id.is_timestamp()),
    }
}

impl ObjectEngine {
    /// Reconcile every bucket with the index.
    ///
    /// Fails only when the data directory cannot be enumerated; per-bucket
    /// failures are logged and counted.
    pub async fn reconcile_all(&self) -> StorageResult<SyncStats> {
        let mut stats = SyncStats::default();
        let on_disk: HashSet<String> = self.store.list_bucket_dirs().await?.into_iter().collect();

        let mut known: HashSet<String> = self.buckets.names().into_iter().collect();
        match self.index.load_buckets() {
            Ok(configs) => known.extend(configs.into_iter().map(|c| c.name)),
            Err(e) => debug!(error = %e, "bucket pruning limited to registered buckets"),
        }
        for name in known.iter().filter(|n| !on_disk.contains(*n)) {
            self.defer_index(self.index.delete_bucket(name), name, "");
            self.buckets.remove(name);
            self.invalidate(name);
            self.cache.invalidate_buckets();
            info!(bucket = %name, "forgot bucket whose directory is gone");
            stats.buckets_pruned += 1;
        }

        let mut names: Vec<&String> = on_disk.iter().collect();
        names.sort();
        for name in names {
            match self.reconcile_bucket(name).await {
                Ok(bucket_stats) => stats.merge(bucket_stats),
                Err(e) => {
                    error!(bucket = %name, error = %e, "bucket reconciliation failed");
                    stats.errors += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Reconcile one bucket with the index.
    ///
    /// A bucket directory that is not registered yet is registered with
    /// default settings first.
    pub async fn reconcile_bucket(&self, bucket: &str) -> StorageResult<SyncStats> {
        let mut stats = SyncStats {
            buckets: 1,
            ..SyncStats::default()
        };
        if !self.buckets.contains(bucket) {
            if !self.store.bucket_dir_exists(bucket).await {
                return Err(StorageError::NoSuchBucket {
                    bucket: bucket.to_owned(),
                });
            }
            let config = BucketConfig::new(bucket);
            self.index.upsert_bucket(&config)?;
            self.buckets.put(config);
            self.cache.invalidate_buckets();
            info!(bucket, "registered bucket found on disk");
            stats.buckets_registered += 1;
        }

        let scan = self.store.scan_bucket(bucket).await?;
        for err in &scan.errors {
            warn!(bucket, error = %err, "skipped unreadable path");
        }
        stats.errors += scan.errors.len();
        stats.objects_scanned = scan.objects.len();

        // The snapshot only decides what to change. Writes are
        // insert-if-absent or single-column updates, never whole rows.
        let mut rows: HashMap<(String, VersionId), VersionRecord> = self
            .index
            .bucket_versions(bucket)?
            .into_iter()
            .map(|r| ((r.key.clone(), r.version_id), r))
            .collect();

        for object in &scan.objects {
            let latest = match self.repair_scanned_pointer(bucket, object, &mut stats).await {
                Some(latest) => latest,
                None => continue,
            };
            let mut latest_drift = 0;
            for stat in &object.versions {
                let is_latest = latest == Some(stat.version_id);
                let mut observed = VersionRecord::new(
                    bucket,
                    &object.key,
                    stat.version_id,
                    stat.size,
                    stat.last_modified,
                );
                observed.encryption = stat.encryption;
                observed.is_latest = is_latest;

                let Some(row) = rows.remove(&(object.key.clone(), stat.version_id)) else {
                    match self.index.insert_version_if_absent(&observed) {
                        Ok(true) => {
                            debug!(bucket, key = %object.key, version = %stat.version_id, "indexing version found on disk");
                            stats.inserted += 1;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!(bucket, key = %object.key, error = %e, "failed to index version");
                            stats.errors += 1;
                        }
                    }
                    continue;
                };

                if row.is_trashed() {
                    match self
                        .index
                        .mark_deleted(bucket, &object.key, &stat.version_id, None)
                    {
                        Ok(()) => {
                            info!(bucket, key = %object.key, version = %stat.version_id, "resurrected trashed version found live on disk");
                            stats.resurrected += 1;
                        }
                        Err(e) => {
                            warn!(bucket, key = %object.key, error = %e, "failed to resurrect version row");
                            stats.errors += 1;
                        }
                    }
                }
                if row.size != stat.size || row.encryption != stat.encryption {
                    match self.index.correct_version_stat(&observed) {
                        Ok(true) => stats.updated += 1,
                        Ok(false) => {}
                        Err(e) => {
                            warn!(bucket, key = %object.key, error = %e, "failed to correct version row");
                            stats.errors += 1;
                        }
                    }
                }
                let flagged = row.is_latest && !row.is_trashed();
                if flagged != is_latest {
                    latest_drift += 1;
                }
            }
            if latest_drift > 0 {
                match self.index.set_latest(bucket, &object.key, latest.as_ref()) {
                    Ok(()) => stats.latest_fixed += latest_drift,
                    Err(e) => {
                        warn!(bucket, key = %object.key, error = %e, "failed to fix latest flag");
                        stats.errors += 1;
                    }
                }
            }
        }

        self.prune_orphans(bucket, rows.into_values(), &mut stats)
            .await;
        self.prune_stale_uploads(bucket, &mut stats).await;

        if stats.mutations() > 0 {
            self.invalidate(bucket);
            info!(
                bucket,
                inserted = stats.inserted,
                updated = stats.updated,
                resurrected = stats.resurrected,
                latest_fixed = stats.latest_fixed,
                pointers_repaired = stats.pointers_repaired,
                orphans_pruned = stats.orphans_pruned,
                "reconciled bucket"
            );
        }
        Ok(stats)
    }

    /// Repair a scanned key's pointer if needed and return the version its
    /// unversioned reads now resolve to. `None` skips the key.
    async fn repair_scanned_pointer(
        &self,
        bucket: &str,
        object: &ScannedObject,
        stats: &mut SyncStats,
    ) -> Option<Option<VersionId>> {
        if !pointer_needs_repair(object) {
            return Some(scanned_latest_id(object));
        }
        match self.store.repair_pointer(bucket, &object.key).await {
            Ok(PointerRepair::Promoted(v)) => {
                stats.pointers_repaired += 1;
                Some(Some(v))
            }
            Ok(PointerRepair::Removed) => {
                stats.pointers_repaired += 1;
                self.prune_key_dirs(bucket, &object.key).await;
                Some(None)
            }
            Ok(PointerRepair::Intact | PointerRepair::NotVersioned) => {
                Some(scanned_latest_id(object))
            }
            Err(e) => {
                warn!(bucket, key = %object.key, error = %e, "pointer repair failed");
                stats.errors += 1;
                None
            }
        }
    }

    /// Delete live rows whose bytes are gone, re-checking the disk first.
    async fn prune_orphans(
        &self,
        bucket: &str,
        unseen: impl Iterator<Item = VersionRecord>,
        stats: &mut SyncStats,
    ) {
        for record in unseen {
            if record.is_trashed() {
                continue;
            }
            if self
                .store
                .version_exists(bucket, &record.key, &record.version_id)
                .await
            {
                continue;
            }
            match self
                .index
                .delete_version(bucket, &record.key, &record.version_id)
            {
                Ok(()) => {
                    info!(bucket, key = %record.key, version = %record.version_id, "pruned index row without bytes");
                    stats.orphans_pruned += 1;
                }
                Err(e) => {
                    warn!(bucket, key = %record.key, error = %e, "failed to prune orphan row");
                    stats.errors += 1;
                }
            }
        }
    }

    /// Forget upload rows whose staging directory is gone.
    async fn prune_stale_uploads(&self, bucket: &str, stats: &mut SyncStats) {
        let uploads = match self.index.list_uploads(bucket) {
            Ok(uploads) => uploads,
            Err(e) => {
                warn!(bucket, error = %e, "failed to list uploads");
                stats.errors += 1;
                return;
            }
        };
        for upload in uploads {
            match self.staging.manifest(&upload.upload_id).await {
                Ok(Some(_)) => {}
                Ok(None) => match self.index.delete_upload(&upload.upload_id) {
                    Ok(()) => {
                        debug!(bucket, upload_id = %upload.upload_id, "pruned stale upload row");
                        stats.uploads_pruned += 1;
                    }
                    Err(e) => {
                        warn!(bucket, upload_id = %upload.upload_id, error = %e, "failed to prune upload row");
                        stats.errors += 1;
                    }
                },
                Err(e) => {
                    warn!(bucket, upload_id = %upload.upload_id, error = %e, "unreadable upload manifest");
                    stats.errors += 1;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Background reconciliation worker.
///
/// Runs [`ObjectEngine::reconcile_all`] every sync interval, starting
/// immediately, and [`ObjectEngine::reconcile_bucket`] once changes under a
/// bucket have been quiet for the debounce window.
#[derive(Debug)]
pub struct SyncWorker {
    engine: ObjectEngine,
    changes: Option<UnboundedReceiver<PathBuf>>,
}

impl SyncWorker {
    /// Creates a worker driven by the timer only.
    #[must_use]
    pub fn new(engine: ObjectEngine) -> Self {
        Self {
            engine,
            changes: None,
        }
    }

    /// Also reconcile buckets whose paths arrive on `changes`.
    #[must_use]
    pub fn with_changes(mut self, changes: UnboundedReceiver<PathBuf>) -> Self {
        self.changes = Some(changes);
        self
    }

    /// Spawns the worker as a background task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(self) {
        let Self { engine, changes } = self;
        let config = engine.config();
        let mut timer = interval(config.sync_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let debounce = config.sync_debounce();

        // Without a watcher the channel never yields; the sender is held so
        // it never closes either.
        let (_idle, idle_rx) = mpsc::unbounded_channel();
        let mut changes = changes.unwrap_or(idle_rx);
        let mut changes_open = true;
        let mut pending = Debouncer::new(debounce);

        info!(
            interval_secs = config.sync_interval().as_secs(),
            debounce_ms = u64::try_from(debounce.as_millis()).unwrap_or(u64::MAX),
            "sync worker started"
        );

        loop {
            let next_due = pending.next_due();
            tokio::select! {
                _ = timer.tick() => {
                    pending.clear();
                    run_full_sweep(&engine).await;
                }
                change = changes.recv(), if changes_open => match change {
                    Some(path) => {
                        if let Some(bucket) = engine.layout().bucket_of(&path) {
                            pending.touch(bucket, Instant::now());
                        }
                    }
                    None => {
                        debug!("filesystem change channel closed");
                        changes_open = false;
                    }
                },
                () = sleep_until(next_due.unwrap_or_else(|| Instant::now() + FAR_FUTURE)), if next_due.is_some() => {
                    for bucket in pending.take_due(Instant::now()) {
                        run_bucket_sweep(&engine, &bucket).await;
                    }
                }
            }
        }
    }
}

const FAR_FUTURE: Duration = Duration::from_secs(86_400);

/// Per-bucket sweep deadlines.
///
/// Each change pushes its bucket's deadline to one window after the
/// change, capped at two windows after the first change not yet swept.
#[derive(Debug)]
struct Debouncer {
    window: Duration,
    pending: HashMap<String, (Instant, Instant)>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    fn touch(&mut self, bucket: String, now: Instant) {
        let window = self.window;
        let (first, deadline) = self.pending.entry(bucket).or_insert((now, now + window));
        *deadline = (now + window).min(*first + window * 2);
    }

    fn next_due(&self) -> Option<Instant> {
        self.pending.values().map(|(_, deadline)| *deadline).min()
    }

    /// Remove and return the buckets due by `now`, sorted.
    fn take_due(&mut self, now: Instant) -> Vec<String> {
        let mut due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(bucket, _)| bucket.clone())
            .collect();
        due.sort();
        for bucket in &due {
            self.pending.remove(bucket);
        }
        due
    }

    fn clear(&mut self) {
        self.pending.clear();
    }
}

async fn run_full_sweep(engine: &ObjectEngine) {
    let start = std::time::Instant::now();
    match engine.reconcile_all().await {
        Ok(stats) => info!(
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            buckets = stats.buckets,
            objects = stats.objects_scanned,
            mutations = stats.mutations(),
            errors = stats.errors,
            "sync sweep completed"
        ),
        Err(e) => error!(error = %e, "sync sweep failed"),
    }
}

async fn run_bucket_sweep(engine: &ObjectEngine, bucket: &str) {
    match engine.reconcile_bucket(bucket).await {
        Ok(stats) => debug!(bucket, mutations = stats.mutations(), "bucket sync completed"),
        Err(StorageError::NoSuchBucket { .. }) => {
            debug!(bucket, "changed bucket no longer exists");
        }
        Err(e) => warn!(bucket, error = %e, "bucket sync failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::engine::tests::{engine, engine_with_bucket, engine_with_index};
    use crate::index::testing::ScriptedIndex;
    use crate::state::{CreateBucketOptions, DeleteOptions, LockMode, PutOptions, Retention};

    async fn sweep(engine: &ObjectEngine) -> SyncStats {
        engine
            .reconcile_all()
            .await
            .unwrap_or_else(|e| panic!("sync: {e}"))
    }

    #[tokio::test]
    async fn test_should_index_externally_written_files_once() {
        let (dir, engine) = engine_with_bucket("b", CreateBucketOptions::default()).await;
        std::fs::create_dir_all(dir.path().join("b/nested"))
            .unwrap_or_else(|e| panic!("mkdir: {e}"));
        std::fs::write(dir.path().join("b/nested/file.txt"), b"hello")
            .unwrap_or_else(|e| panic!("write: {e}"));
        std::fs::create_dir_all(dir.path().join("b/empty"))
            .unwrap_or_else(|e| panic!("mkdir: {e}"));

        let first = sweep(&engine).await;
        assert_eq!(first.inserted, 2);
        let row = engine
            .index()
            .get_version("b", "nested/file.txt", &VersionId::LegacyFlatFile)
            .unwrap_or_else(|e| panic!("row: {e}"))
            .unwrap_or_else(|| panic!("missing legacy row"));
        assert_eq!(row.size, 5);
        assert!(row.is_latest);
        assert!(
            engine
                .index()
                .get_version("b", "empty/", &VersionId::FolderPlaceholder)
                .unwrap_or_else(|e| panic!("row: {e}"))
                .is_some()
        );

        let second = sweep(&engine).await;
        assert_eq!(second.mutations(), 0);
    }

    #[tokio::test]
    async fn test_should_prune_rows_whose_bytes_vanished() {
        let (dir, engine) = engine_with_bucket(
            "b",
            CreateBucketOptions {
                versioning: true,
                object_lock: false,
            },
        )
        .await;
        let mut body: &[u8] = b"x";
        engine
            .put_object("b", "gone", &mut body, PutOptions::default())
            .await
            .unwrap_or_else(|e| panic!("put: {e}"));
        std::fs::remove_dir_all(dir.path().join("b/gone"))
            .unwrap_or_else(|e| panic!("rm: {e}"));

        let stats = sweep(&engine).await;
        assert_eq!(stats.orphans_pruned, 1);
        assert!(
            engine
                .index()
                .versions_of("b", "gone")
                .unwrap_or_else(|e| panic!("rows: {e}"))
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_should_resurrect_trashed_row_found_live() {
        let (dir, engine) = engine_with_bucket(
            "b",
            CreateBucketOptions {
                versioning: true,
                object_lock: false,
            },
        )
        .await;
        engine
            .set_soft_delete(
                "b",
                crate::state::SoftDeletePolicy {
                    enabled: true,
                    retention_days: 1,
                },
            )
            .unwrap_or_else(|e| panic!("soft delete: {e}"));
        let mut body: &[u8] = b"x";
        let put = engine
            .put_object("b", "k", &mut body, PutOptions::default())
            .await
            .unwrap_or_else(|e| panic!("put: {e}"));
        engine
            .delete_object("b", "k", DeleteOptions::default())
            .await
            .unwrap_or_else(|e| panic!("delete: {e}"));
        let token = put.version_id.token();
        std::fs::create_dir_all(dir.path().join("b/k")).unwrap_or_else(|e| panic!("mkdir: {e}"));
        std::fs::rename(
            dir.path().join(".trash/b/k").join(&token),
            dir.path().join("b/k").join(&token),
        )
        .unwrap_or_else(|e| panic!("move back: {e}"));

        let stats = sweep(&engine).await;
        assert_eq!(stats.resurrected, 1);
        let row = engine
            .index()
            .get_version("b", "k", &put.version_id)
            .unwrap_or_else(|e| panic!("row: {e}"))
            .unwrap_or_else(|| panic!("missing row"));
        assert!(!row.is_trashed());
        assert!(row.is_latest);
    }

    async fn locked_engine(index: &Arc<ScriptedIndex>) -> (tempfile::TempDir, ObjectEngine) {
        let shared: Arc<dyn crate::index::MetadataIndex> = index.clone();
        let (dir, engine) = engine_with_index(shared).await;
        engine
            .create_bucket(
                "b",
                CreateBucketOptions {
                    versioning: true,
                    object_lock: true,
                },
            )
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        (dir, engine)
    }

    #[tokio::test]
    async fn test_should_keep_retention_written_after_snapshot() {
        let index = Arc::new(ScriptedIndex::new());
        let (_dir, engine) = locked_engine(&index).await;
        index.freeze_rows(Vec::new());

        let mut body: &[u8] = b"locked";
        let put = engine
            .put_object(
                "b",
                "k",
                &mut body,
                PutOptions {
                    retention: Some(Retention {
                        mode: LockMode::Compliance,
                        retain_until: Utc::now() + chrono::Duration::days(30),
                    }),
                    ..PutOptions::default()
                },
            )
            .await
            .unwrap_or_else(|e| panic!("put: {e}"));

        let stats = engine
            .reconcile_bucket("b")
            .await
            .unwrap_or_else(|e| panic!("sync: {e}"));
        assert_eq!(stats.inserted, 0);

        let row = engine
            .index()
            .get_version("b", "k", &put.version_id)
            .unwrap_or_else(|e| panic!("row: {e}"))
            .unwrap_or_else(|| panic!("missing row"));
        assert_eq!(row.lock.retention.map(|r| r.mode), Some(LockMode::Compliance));
        let delete = engine
            .delete_object(
                "b",
                "k",
                DeleteOptions::builder().version_id(put.version_id).build(),
            )
            .await;
        assert!(matches!(delete, Err(StorageError::Locked { .. })));
    }

    #[tokio::test]
    async fn test_should_fix_latest_flag_without_dropping_legal_hold() {
        let index = Arc::new(ScriptedIndex::new());
        let (_dir, engine) = locked_engine(&index).await;
        let mut body: &[u8] = b"held";
        let put = engine
            .put_object("b", "k", &mut body, PutOptions::default())
            .await
            .unwrap_or_else(|e| panic!("put: {e}"));
        let stale: Vec<VersionRecord> = engine
            .index()
            .versions_of("b", "k")
            .unwrap_or_else(|e| panic!("rows: {e}"))
            .into_iter()
            .map(|mut row| {
                row.is_latest = false;
                row
            })
            .collect();
        index.freeze_rows(stale);
        engine
            .put_legal_hold("b", "k", Some(&put.version_id), true)
            .await
            .unwrap_or_else(|e| panic!("hold: {e}"));

        let stats = engine
            .reconcile_bucket("b")
            .await
            .unwrap_or_else(|e| panic!("sync: {e}"));
        assert_eq!(stats.latest_fixed, 1);

        let row = engine
            .index()
            .get_version("b", "k", &put.version_id)
            .unwrap_or_else(|e| panic!("row: {e}"))
            .unwrap_or_else(|| panic!("missing row"));
        assert!(row.is_latest);
        assert!(row.lock.legal_hold);
        let delete = engine
            .delete_object(
                "b",
                "k",
                DeleteOptions::builder().version_id(put.version_id).build(),
            )
            .await;
        assert!(matches!(delete, Err(StorageError::Locked { .. })));
    }

    #[test]
    fn test_should_cap_debounce_under_steady_changes() {
        let window = Duration::from_millis(50);
        let start = Instant::now();
        let mut pending = Debouncer::new(window);
        for step in 0..20 {
            pending.touch("b".to_owned(), start + Duration::from_millis(step * 40));
        }
        assert_eq!(pending.next_due(), Some(start + window * 2));
        assert!(pending.take_due(start + window).is_empty());
        assert_eq!(pending.take_due(start + window * 2), vec!["b".to_owned()]);
        assert_eq!(pending.next_due(), None);
    }

    #[test]
    fn test_should_push_debounce_for_a_quiet_bucket() {
        let window = Duration::from_millis(50);
        let start = Instant::now();
        let mut pending = Debouncer::new(window);
        pending.touch("a".to_owned(), start);
        pending.touch("a".to_owned(), start + Duration::from_millis(20));
        pending.touch("b".to_owned(), start + Duration::from_millis(30));
        assert_eq!(
            pending.next_due(),
            Some(start + Duration::from_millis(70))
        );
        assert_eq!(
            pending.take_due(start + Duration::from_millis(80)),
            vec!["a".to_owned(), "b".to_owned()]
        );
    }

    #[tokio::test]
    async fn test_should_register_and_forget_buckets_by_directory() {
        let (dir, engine) = engine().await;
        std::fs::create_dir_all(dir.path().join("dropped-in"))
            .unwrap_or_else(|e| panic!("mkdir: {e}"));
        engine
            .create_bucket("doomed", CreateBucketOptions::default())
            .await
            .unwrap_or_else(|e| panic!("create: {e}"));
        std::fs::remove_dir_all(dir.path().join("doomed"))
            .unwrap_or_else(|e| panic!("rm: {e}"));

        let stats = sweep(&engine).await;
        assert_eq!(stats.buckets_registered, 1);
        assert_eq!(stats.buckets_pruned, 1);
        let names: Vec<_> = engine.list_buckets().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["dropped-in"]);
    }

    #[test]
    fn test_should_merge_and_count_mutations() {
        let mut total = SyncStats {
            inserted: 2,
            errors: 1,
            ..SyncStats::default()
        };
        total.merge(SyncStats {
            orphans_pruned: 1,
            objects_scanned: 10,
            ..SyncStats::default()
        });
        assert_eq!(total.mutations(), 3);
        assert_eq!(total.objects_scanned, 10);
        assert_eq!(total.errors, 1);
    }
}
