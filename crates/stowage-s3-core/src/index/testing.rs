//! An index wrapper for exercising failure and race handling in tests.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{MetadataIndex, SqliteIndex, UsageCounters};
use crate::error::{StorageError, StorageResult};
use crate::state::{BucketConfig, MultipartUpload, PartRecord, VersionId, VersionRecord};

/// In-memory sqlite index with two knobs: bucket listings that fail, and a
/// frozen `bucket_versions` answer standing in for a snapshot taken before
/// concurrent writes.
#[derive(Debug)]
pub(crate) struct ScriptedIndex {
    inner: SqliteIndex,
    failing_bucket: Mutex<Option<String>>,
    frozen_rows: Mutex<Option<Vec<VersionRecord>>>,
}

impl ScriptedIndex {
    pub(crate) fn new() -> Self {
        Self {
            inner: SqliteIndex::open_in_memory().unwrap_or_else(|e| panic!("index: {e}")),
            failing_bucket: Mutex::new(None),
            frozen_rows: Mutex::new(None),
        }
    }

    /// Fail trash and expiration listings of `bucket`.
    pub(crate) fn fail_listings_of(&self, bucket: &str) {
        *self.failing_bucket.lock() = Some(bucket.to_owned());
    }

    /// Answer every `bucket_versions` call with `rows`.
    pub(crate) fn freeze_rows(&self, rows: Vec<VersionRecord>) {
        *self.frozen_rows.lock() = Some(rows);
    }

    fn check(&self, bucket: Option<&str>) -> StorageResult<()> {
        match (self.failing_bucket.lock().as_deref(), bucket) {
            (Some(failing), Some(bucket)) if failing == bucket => {
                Err(StorageError::IndexUnavailable {
                    message: format!("listing {bucket} failed"),
                })
            }
            _ => Ok(()),
        }
    }
}

impl MetadataIndex for ScriptedIndex {
    fn upsert_bucket(&self, config: &BucketConfig) -> StorageResult<()> {
        self.inner.upsert_bucket(config)
    }

    fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.inner.delete_bucket(bucket)
    }

    fn load_buckets(&self) -> StorageResult<Vec<BucketConfig>> {
        self.inner.load_buckets()
    }

    fn upsert_version(&self, record: &VersionRecord) -> StorageResult<()> {
        self.inner.upsert_version(record)
    }

    fn insert_version_if_absent(&self, record: &VersionRecord) -> StorageResult<bool> {
        self.inner.insert_version_if_absent(record)
    }

    fn correct_version_stat(&self, observed: &VersionRecord) -> StorageResult<bool> {
        self.inner.correct_version_stat(observed)
    }

    fn rekey_version(
        &self,
        bucket: &str,
        key: &str,
        from: &VersionId,
        to: &VersionId,
        deleted_at: Option<DateTime<Utc>>,
    ) -> StorageResult<bool> {
        self.inner.rekey_version(bucket, key, from, to, deleted_at)
    }

    fn get_version(
        &self,
        bucket: &str,
        key: &str,
        version: &VersionId,
    ) -> StorageResult<Option<VersionRecord>> {
        self.inner.get_version(bucket, key, version)
    }

    fn delete_version(&self, bucket: &str, key: &str, version: &VersionId) -> StorageResult<()> {
        self.inner.delete_version(bucket, key, version)
    }

    fn versions_of(&self, bucket: &str, key: &str) -> StorageResult<Vec<VersionRecord>> {
        self.inner.versions_of(bucket, key)
    }

    fn bucket_versions(&self, bucket: &str) -> StorageResult<Vec<VersionRecord>> {
        if let Some(rows) = self.frozen_rows.lock().as_ref() {
            return Ok(rows.iter().filter(|r| r.bucket == bucket).cloned().collect());
        }
        self.inner.bucket_versions(bucket)
    }

    fn set_latest(&self, bucket: &str, key: &str, latest: Option<&VersionId>) -> StorageResult<()> {
        self.inner.set_latest(bucket, key, latest)
    }

    fn mark_deleted(
        &self,
        bucket: &str,
        key: &str,
        version: &VersionId,
        deleted_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        self.inner.mark_deleted(bucket, key, version, deleted_at)
    }

    fn list_latest(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<VersionRecord>> {
        self.inner.list_latest(bucket, prefix)
    }

    fn list_trashed(&self, bucket: Option<&str>) -> StorageResult<Vec<VersionRecord>> {
        self.check(bucket)?;
        self.inner.list_trashed(bucket)
    }

    fn live_versions_older_than(
        &self,
        bucket: &str,
        prefix: &str,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<VersionRecord>> {
        self.check(Some(bucket))?;
        self.inner.live_versions_older_than(bucket, prefix, cutoff)
    }

    fn usage(&self, bucket: Option<&str>) -> StorageResult<UsageCounters> {
        self.inner.usage(bucket)
    }

    fn insert_upload(&self, upload: &MultipartUpload) -> StorageResult<()> {
        self.inner.insert_upload(upload)
    }

    fn get_upload(&self, upload_id: &str) -> StorageResult<Option<MultipartUpload>> {
        self.inner.get_upload(upload_id)
    }

    fn delete_upload(&self, upload_id: &str) -> StorageResult<()> {
        self.inner.delete_upload(upload_id)
    }

    fn record_part(&self, upload_id: &str, part: &PartRecord) -> StorageResult<()> {
        self.inner.record_part(upload_id, part)
    }

    fn list_parts(&self, upload_id: &str) -> StorageResult<Vec<PartRecord>> {
        self.inner.list_parts(upload_id)
    }

    fn list_uploads(&self, bucket: &str) -> StorageResult<Vec<MultipartUpload>> {
        self.inner.list_uploads(bucket)
    }
}
