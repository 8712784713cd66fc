//! Object operation handlers.
//!
//! Implements `put_object`, `get_object`, `head_object`, `delete_object`
//! and `list_versions`, plus the shared write-recording and removal paths
//! used by multipart completion and the lifecycle worker.

use std::collections::HashMap;

use chrono::Utc;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::checksums::md5_hex;
use crate::engine::{ObjectEngine, missing_object};
use crate::error::{StorageError, StorageResult};
use crate::events::ObjectEventKind;
use crate::retention::may_mutate;
use crate::state::{
    BucketConfig, DeleteOptions, DeleteOutcome, LockState, ObjectInfo, PutOptions, PutOutcome,
    VersionId, VersionRecord,
};
use crate::storage::{CommittedVersion, ObjectBody, VersionStat};
use crate::validation::{is_folder_key, validate_object_key, validate_tags};

/// Why versions are being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removal {
    /// A caller delete; honours the bucket's soft-delete policy.
    Caller,
    /// Lifecycle expiration; always permanent.
    Expired,
}

impl ObjectEngine {
    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Store a new object version read from `reader`.
    ///
    /// Versioned buckets get a fresh timestamped version; otherwise the
    /// `simple` slot is replaced, which is refused while that version is
    /// locked. Keys ending in `/` create a folder placeholder.
    pub async fn put_object<R>(
        &self,
        bucket: &str,
        key: &str,
        reader: &mut R,
        options: PutOptions,
    ) -> StorageResult<PutOutcome>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let config = self.bucket(bucket)?;
        validate_object_key(key)?;
        validate_tags(&options.tags)?;
        if (options.retention.is_some() || options.legal_hold) && !config.object_lock.enabled {
            return Err(StorageError::ObjectLockNotEnabled {
                bucket: bucket.to_owned(),
            });
        }
        if is_folder_key(key) {
            return self.put_folder(&config, key, &options).await;
        }

        self.guard_overwrite(&config, key, options.bypass_governance)
            .await?;
        let committed = self
            .store
            .put(
                bucket,
                key,
                reader,
                config.versioning_enabled,
                options.encryption,
            )
            .await?;
        let etag = committed.etag.clone();
        Ok(self
            .record_write(&config, key, committed, etag, &options, ObjectEventKind::ObjectCreated)
            .await)
    }

    async fn put_folder(
        &self,
        config: &BucketConfig,
        key: &str,
        options: &PutOptions,
    ) -> StorageResult<PutOutcome> {
        let bucket = config.name.as_str();
        let stat = self.store.create_folder(bucket, key).await?;
        let etag = md5_hex(b"");
        let mut record = VersionRecord::new(
            bucket,
            key,
            VersionId::FolderPlaceholder,
            0,
            stat.last_modified,
        );
        record.etag = Some(etag.clone());
        record.is_latest = true;
        record.tags = options.tags.clone();
        self.defer_index(self.index.upsert_version(&record), bucket, key);
        self.invalidate(bucket);
        self.emit(
            ObjectEventKind::ObjectCreated,
            bucket,
            key,
            VersionId::FolderPlaceholder,
            0,
        );
        debug!(bucket, key, "created folder placeholder");
        Ok(PutOutcome {
            version_id: VersionId::FolderPlaceholder,
            etag,
            size: 0,
            last_modified: stat.last_modified,
        })
    }

    /// Refuse to replace a locked non-versioned object.
    ///
    /// Fails closed when the lock state cannot be read.
    pub(crate) async fn guard_overwrite(
        &self,
        config: &BucketConfig,
        key: &str,
        bypass_governance: bool,
    ) -> StorageResult<()> {
        if config.versioning_enabled {
            return Ok(());
        }
        let bucket = config.name.as_str();
        let now = Utc::now();
        for slot in [VersionId::NonVersioned, VersionId::LegacyFlatFile] {
            if !self.store.version_exists(bucket, key, &slot).await {
                continue;
            }
            let lock = self.lock_state(bucket, key, &slot)?;
            may_mutate(&lock, bypass_governance, now)
                .map_err(|reason| StorageError::Locked { reason })?;
        }
        Ok(())
    }

    /// Index, cache and event bookkeeping after a version is committed.
    pub(crate) async fn record_write(
        &self,
        config: &BucketConfig,
        key: &str,
        committed: CommittedVersion,
        etag: String,
        options: &PutOptions,
        kind: ObjectEventKind,
    ) -> PutOutcome {
        let bucket = config.name.as_str();
        let now = Utc::now();
        if let Some(migrated) = committed.migrated_legacy {
            self.rekey_legacy(bucket, key, migrated);
        }

        let stat = committed.stat;
        let mut record = VersionRecord::new(
            bucket,
            key,
            stat.version_id,
            stat.size,
            stat.last_modified,
        );
        record.etag = Some(etag.clone());
        record.encryption = stat.encryption;
        record.is_latest = true;
        record.lock = LockState {
            legal_hold: options.legal_hold,
            retention: config.retention_for_new_version(options.retention, now),
        };
        record.tags = options.tags.clone();
        self.defer_index(self.index.upsert_version(&record), bucket, key);
        self.refresh_latest(bucket, key).await;
        self.invalidate(bucket);
        self.emit(kind, bucket, key, stat.version_id, stat.size);
        debug!(bucket, key, version = %stat.version_id, size = stat.size, "stored object");

        PutOutcome {
            version_id: stat.version_id,
            etag,
            size: stat.size,
            last_modified: stat.last_modified,
        }
    }

    /// Move the index row of a migrated legacy file to its new identifier.
    fn rekey_legacy(&self, bucket: &str, key: &str, migrated: VersionId) {
        let old = match self
            .index
            .get_version(bucket, key, &VersionId::LegacyFlatFile)
        {
            Ok(old) => old,
            Err(e) => {
                self.defer_index::<()>(Err(e), bucket, key);
                return;
            }
        };
        self.defer_index(
            self.index
                .delete_version(bucket, key, &VersionId::LegacyFlatFile),
            bucket,
            key,
        );
        if let (true, Some(mut record)) = (migrated.is_timestamp(), old) {
            record.version_id = migrated;
            record.is_latest = false;
            self.defer_index(self.index.upsert_version(&record), bucket, key);
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Open an object for reading. `None` reads the latest version.
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&VersionId>,
    ) -> StorageResult<(ObjectBody, ObjectInfo)> {
        self.bucket(bucket)?;
        validate_object_key(key)?;
        let (body, stat) = self.store.open(bucket, key, version).await?;
        let info = self.object_info(bucket, key, &stat, version.is_none()).await;
        Ok((body, info))
    }

    /// Metadata of an object without its body.
    pub async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&VersionId>,
    ) -> StorageResult<ObjectInfo> {
        self.bucket(bucket)?;
        validate_object_key(key)?;
        let resolved = match version {
            Some(v) => *v,
            None => self
                .store
                .resolve_latest(bucket, key)
                .await?
                .ok_or_else(|| missing_object(key, None))?,
        };
        let stat = self
            .store
            .stat(bucket, key, &resolved)
            .await?
            .ok_or_else(|| missing_object(key, version))?;
        Ok(self.object_info(bucket, key, &stat, version.is_none()).await)
    }

    /// Every live version of a key, newest first.
    pub async fn list_versions(&self, bucket: &str, key: &str) -> StorageResult<Vec<ObjectInfo>> {
        self.bucket(bucket)?;
        validate_object_key(key)?;
        let stats = self.store.list_versions(bucket, key).await?;
        let latest = self.store.resolve_latest(bucket, key).await?;
        let rows: HashMap<VersionId, VersionRecord> = match self.index.versions_of(bucket, key) {
            Ok(rows) => rows
                .into_iter()
                .filter(|r| !r.is_trashed())
                .map(|r| (r.version_id, r))
                .collect(),
            Err(e) => {
                debug!(bucket, key, error = %e, "listing versions from disk only");
                HashMap::new()
            }
        };
        Ok(stats
            .iter()
            .map(|stat| {
                build_info(
                    bucket,
                    key,
                    stat,
                    rows.get(&stat.version_id),
                    latest == Some(stat.version_id),
                )
            })
            .collect())
    }

    /// Combine a stat with its index row, degrading to disk facts alone.
    async fn object_info(
        &self,
        bucket: &str,
        key: &str,
        stat: &VersionStat,
        resolved_latest: bool,
    ) -> ObjectInfo {
        let record = match self.index.get_version(bucket, key, &stat.version_id) {
            Ok(record) => record.filter(|r| !r.is_trashed()),
            Err(e) => {
                debug!(bucket, key, error = %e, "serving metadata from disk only");
                None
            }
        };
        let is_latest = resolved_latest
            || matches!(
                self.store.resolve_latest(bucket, key).await,
                Ok(Some(v)) if v == stat.version_id
            );
        build_info(bucket, key, stat, record.as_ref(), is_latest)
    }

    // -----------------------------------------------------------------------
    // Deletes
    // -----------------------------------------------------------------------

    /// Delete one version, or every live version when none is named.
    ///
    /// Every target is checked against its lock before anything is touched.
    /// Buckets with soft delete move the versions to the trash.
    pub async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        options: DeleteOptions,
    ) -> StorageResult<DeleteOutcome> {
        let config = self.bucket(bucket)?;
        validate_object_key(key)?;
        let targets = match &options.version_id {
            Some(v) => vec![
                self.store
                    .stat(bucket, key, v)
                    .await?
                    .ok_or_else(|| missing_object(key, Some(v)))?,
            ],
            None => self.store.list_versions(bucket, key).await?,
        };
        if targets.is_empty() {
            debug!(bucket, key, "delete of absent key");
            return Ok(DeleteOutcome::default());
        }
        self.remove_versions(
            &config,
            key,
            &targets,
            options.bypass_governance,
            Removal::Caller,
        )
        .await
    }

    /// Remove versions of one key after checking every lock.
    pub(crate) async fn remove_versions(
        &self,
        config: &BucketConfig,
        key: &str,
        targets: &[VersionStat],
        bypass_governance: bool,
        removal: Removal,
    ) -> StorageResult<DeleteOutcome> {
        let bucket = config.name.as_str();
        let now = Utc::now();
        for stat in targets {
            let lock = self.lock_state(bucket, key, &stat.version_id)?;
            may_mutate(&lock, bypass_governance, now)
                .map_err(|reason| StorageError::Locked { reason })?;
        }

        let trashed = removal == Removal::Caller && config.soft_delete.enabled;
        let mut outcome = DeleteOutcome {
            removed: Vec::with_capacity(targets.len()),
            trashed,
        };
        for stat in targets {
            let version = stat.version_id;
            if trashed {
                let trash_id = self.trash.move_to_trash(bucket, key, &version).await?;
                let marked = match self
                    .index
                    .rekey_version(bucket, key, &version, &trash_id, Some(now))
                {
                    Ok(true) => Ok(()),
                    Ok(false) => {
                        let mut record = VersionRecord::new(
                            bucket,
                            key,
                            trash_id,
                            stat.size,
                            stat.last_modified,
                        );
                        record.encryption = stat.encryption;
                        record.deleted_at = Some(now);
                        self.index.upsert_version(&record)
                    }
                    Err(e) => Err(e),
                };
                self.defer_index(marked, bucket, key);
            } else {
                self.store.delete_version(bucket, key, &version).await?;
                self.defer_index(self.index.delete_version(bucket, key, &version), bucket, key);
            }
            outcome.removed.push(version);
        }

        if let Err(e) = self.store.repair_pointer(bucket, key).await {
            warn!(bucket, key, error = %e, "pointer repair after delete failed");
        }
        self.prune_key_dirs(bucket, key).await;
        self.refresh_latest(bucket, key).await;
        self.invalidate(bucket);

        let kind = match (removal, trashed) {
            (Removal::Expired, _) => ObjectEventKind::ObjectExpired,
            (Removal::Caller, true) => ObjectEventKind::ObjectTrashed,
            (Removal::Caller, false) => ObjectEventKind::ObjectRemoved,
        };
        for stat in targets {
            self.emit(kind, bucket, key, stat.version_id, stat.size);
        }
        info!(bucket, key, versions = targets.len(), trashed, "removed object versions");
        Ok(outcome)
    }
}

fn build_info(
    bucket: &str,
    key: &str,
    stat: &VersionStat,
    record: Option<&VersionRecord>,
    is_latest: bool,
) -> ObjectInfo {
    ObjectInfo {
        bucket: bucket.to_owned(),
        key: key.to_owned(),
        version_id: stat.version_id,
        size: stat.size,
        last_modified: stat.last_modified,
        etag: record
            .filter(|r| r.size == stat.size)
            .and_then(|r| r.etag.clone()),
        encryption: stat.encryption,
        is_latest,
        lock: record.map(|r| r.lock).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::engine::tests::{engine_with_bucket, engine_with_events};
    use crate::state::{CreateBucketOptions, EncryptionAlgorithm, LockMode, Retention};

    const VERSIONED: CreateBucketOptions = CreateBucketOptions {
        versioning: true,
        object_lock: false,
    };
    const LOCKED: CreateBucketOptions = CreateBucketOptions {
        versioning: true,
        object_lock: true,
    };

    async fn put(engine: &ObjectEngine, key: &str, data: &[u8]) -> PutOutcome {
        put_with(engine, key, data, PutOptions::default()).await
    }

    async fn put_with(
        engine: &ObjectEngine,
        key: &str,
        data: &[u8],
        options: PutOptions,
    ) -> PutOutcome {
        let mut body = data;
        engine
            .put_object("b", key, &mut body, options)
            .await
            .unwrap_or_else(|e| panic!("put {key}: {e}"))
    }

    async fn read(engine: &ObjectEngine, key: &str, version: Option<&VersionId>) -> Vec<u8> {
        let (mut body, _) = engine
            .get_object("b", key, version)
            .await
            .unwrap_or_else(|e| panic!("get {key}: {e}"));
        let mut out = Vec::new();
        body.read_to_end(&mut out)
            .await
            .unwrap_or_else(|e| panic!("read: {e}"));
        out
    }

    #[tokio::test]
    async fn test_should_keep_every_version_and_serve_newest() {
        let (_dir, engine) = engine_with_bucket("b", VERSIONED).await;
        let mut ids = Vec::new();
        for n in 0..3u8 {
            ids.push(put(&engine, "doc", &[n]).await.version_id);
        }
        assert_eq!(read(&engine, "doc", None).await, vec![2]);

        let versions = engine
            .list_versions("b", "doc")
            .await
            .unwrap_or_else(|e| panic!("versions: {e}"));
        let listed: Vec<_> = versions.iter().map(|v| v.version_id).collect();
        ids.reverse();
        assert_eq!(listed, ids);
        assert!(versions[0].is_latest);
        assert!(versions[1..].iter().all(|v| !v.is_latest));

        let latest: Vec<_> = engine
            .index()
            .versions_of("b", "doc")
            .unwrap_or_else(|e| panic!("rows: {e}"))
            .into_iter()
            .filter(|r| r.is_latest)
            .map(|r| r.version_id)
            .collect();
        assert_eq!(latest, vec![ids[0]]);
    }

    #[tokio::test]
    async fn test_should_overwrite_simple_slot_without_versioning() {
        let (dir, engine) = engine_with_bucket("b", CreateBucketOptions::default()).await;
        put(&engine, "k", b"one").await;
        let second = put(&engine, "k", b"two").await;
        assert_eq!(second.version_id, VersionId::NonVersioned);
        assert_eq!(read(&engine, "k", None).await, b"two");
        assert_eq!(
            std::fs::read_dir(dir.path().join("b/k"))
                .map(|it| it.count())
                .unwrap_or(0),
            1
        );
    }

    #[tokio::test]
    async fn test_should_record_etag_and_encryption() {
        let (_dir, engine) = engine_with_bucket("b", CreateBucketOptions::default()).await;
        let options = PutOptions::builder()
            .encryption(EncryptionAlgorithm::Aes256Gcm)
            .build();
        let outcome = put_with(&engine, "secret", b"payload", options).await;
        assert_eq!(outcome.etag, md5_hex(b"payload"));

        let info = engine
            .head_object("b", "secret", None)
            .await
            .unwrap_or_else(|e| panic!("head: {e}"));
        assert_eq!(info.size, 7);
        assert_eq!(info.etag.as_deref(), Some(outcome.etag.as_str()));
        assert_eq!(info.encryption, Some(EncryptionAlgorithm::Aes256Gcm));
        assert_eq!(read(&engine, "secret", None).await, b"payload");
    }

    #[tokio::test]
    async fn test_should_block_delete_under_legal_hold_even_with_bypass() {
        let (_dir, engine) = engine_with_bucket("b", LOCKED).await;
        let options = PutOptions::builder().legal_hold(true).build();
        put_with(&engine, "held", b"x", options).await;

        let err = engine
            .delete_object(
                "b",
                "held",
                DeleteOptions::builder().bypass_governance(true).build(),
            )
            .await
            .err();
        assert!(matches!(err, Some(StorageError::Locked { .. })));
        assert_eq!(read(&engine, "held", None).await, b"x");
    }

    #[tokio::test]
    async fn test_should_allow_governance_delete_only_with_bypass() {
        let (_dir, engine) = engine_with_bucket("b", LOCKED).await;
        let options = PutOptions::builder()
            .retention(Retention {
                mode: LockMode::Governance,
                retain_until: Utc::now() + Duration::days(1),
            })
            .build();
        let outcome = put_with(&engine, "gov", b"x", options).await;

        let denied = engine
            .delete_object("b", "gov", DeleteOptions::default())
            .await;
        assert!(matches!(denied, Err(StorageError::Locked { .. })));

        let removed = engine
            .delete_object(
                "b",
                "gov",
                DeleteOptions::builder()
                    .version_id(outcome.version_id)
                    .bypass_governance(true)
                    .build(),
            )
            .await
            .unwrap_or_else(|e| panic!("delete: {e}"));
        assert_eq!(removed.removed, vec![outcome.version_id]);
        assert!(matches!(
            engine.head_object("b", "gov", None).await,
            Err(StorageError::NoSuchKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_block_compliance_delete_with_bypass() {
        let (_dir, engine) = engine_with_bucket("b", LOCKED).await;
        let options = PutOptions::builder()
            .retention(Retention {
                mode: LockMode::Compliance,
                retain_until: Utc::now() + Duration::days(1),
            })
            .build();
        put_with(&engine, "c", b"x", options).await;
        let err = engine
            .delete_object(
                "b",
                "c",
                DeleteOptions::builder().bypass_governance(true).build(),
            )
            .await
            .err();
        match err {
            Some(StorageError::Locked { reason }) => {
                assert!(reason.to_string().contains("COMPLIANCE"));
            }
            other => panic!("expected lock denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_should_reject_retention_without_object_lock() {
        let (_dir, engine) = engine_with_bucket("b", VERSIONED).await;
        let mut body: &[u8] = b"x";
        let err = engine
            .put_object(
                "b",
                "k",
                &mut body,
                PutOptions::builder().legal_hold(true).build(),
            )
            .await
            .err();
        assert!(matches!(err, Some(StorageError::ObjectLockNotEnabled { .. })));
    }

    #[tokio::test]
    async fn test_should_promote_previous_version_after_deleting_latest() {
        let (_dir, engine) = engine_with_bucket("b", VERSIONED).await;
        let first = put(&engine, "k", b"first").await;
        let second = put(&engine, "k", b"second").await;
        engine
            .delete_object(
                "b",
                "k",
                DeleteOptions::builder().version_id(second.version_id).build(),
            )
            .await
            .unwrap_or_else(|e| panic!("delete: {e}"));

        let info = engine
            .head_object("b", "k", None)
            .await
            .unwrap_or_else(|e| panic!("head: {e}"));
        assert_eq!(info.version_id, first.version_id);
        assert!(info.is_latest);
        assert_eq!(read(&engine, "k", None).await, b"first");
    }

    #[tokio::test]
    async fn test_should_remove_empty_directories_after_last_delete() {
        let (dir, engine) = engine_with_bucket("b", VERSIONED).await;
        put(&engine, "a/b/c", b"x").await;
        engine
            .delete_object("b", "a/b/c", DeleteOptions::default())
            .await
            .unwrap_or_else(|e| panic!("delete: {e}"));
        assert!(!dir.path().join("b/a").exists());
        assert!(dir.path().join("b").is_dir());
    }

    #[tokio::test]
    async fn test_should_create_and_delete_folder_placeholder() {
        let (dir, engine, mut events) = engine_with_events().await;
        engine
            .create_bucket("b", CreateBucketOptions::default())
            .await
            .unwrap_or_else(|e| panic!("bucket: {e}"));
        let outcome = put(&engine, "photos/", b"").await;
        assert_eq!(outcome.version_id, VersionId::FolderPlaceholder);
        assert_eq!(outcome.version_id.wire_token(), "");
        assert!(dir.path().join("b/photos").is_dir());
        let created = events.recv().await.unwrap_or_else(|| panic!("no event"));
        assert_eq!(created.kind, ObjectEventKind::ObjectCreated);

        engine
            .delete_object("b", "photos/", DeleteOptions::default())
            .await
            .unwrap_or_else(|e| panic!("delete: {e}"));
        assert!(!dir.path().join("b/photos").exists());
        let removed = events.recv().await.unwrap_or_else(|| panic!("no event"));
        assert_eq!(removed.kind, ObjectEventKind::ObjectRemoved);
    }

    #[tokio::test]
    async fn test_should_refuse_overwrite_of_locked_simple_object() {
        let (_dir, engine) = engine_with_bucket("b", CreateBucketOptions::default()).await;
        put(&engine, "k", b"held").await;
        let mut row = engine
            .index()
            .get_version("b", "k", &VersionId::NonVersioned)
            .unwrap_or_else(|e| panic!("row: {e}"))
            .unwrap_or_else(|| panic!("missing row"));
        row.lock.legal_hold = true;
        engine
            .index()
            .upsert_version(&row)
            .unwrap_or_else(|e| panic!("upsert: {e}"));

        let mut body: &[u8] = b"replacement";
        let err = engine
            .put_object("b", "k", &mut body, PutOptions::default())
            .await
            .err();
        assert!(matches!(err, Some(StorageError::Locked { .. })));
        assert_eq!(read(&engine, "k", None).await, b"held");
    }

    #[tokio::test]
    async fn test_should_migrate_legacy_row_on_versioned_write() {
        let (dir, engine) = engine_with_bucket("b", VERSIONED).await;
        std::fs::write(dir.path().join("b/old.txt"), b"legacy")
            .unwrap_or_else(|e| panic!("seed: {e}"));
        engine
            .reconcile_bucket("b")
            .await
            .unwrap_or_else(|e| panic!("sync: {e}"));

        put(&engine, "old.txt", b"fresh").await;
        let rows = engine
            .index()
            .versions_of("b", "old.txt")
            .unwrap_or_else(|e| panic!("rows: {e}"));
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.version_id.is_timestamp()));
        assert_eq!(read(&engine, "old.txt", None).await, b"fresh");
    }

    #[tokio::test]
    async fn test_should_reject_traversal_keys() {
        let (_dir, engine) = engine_with_bucket("b", VERSIONED).await;
        let err = engine.head_object("b", "../escape", None).await.err();
        assert!(matches!(err, Some(StorageError::InvalidArgument { .. })));
    }
}
