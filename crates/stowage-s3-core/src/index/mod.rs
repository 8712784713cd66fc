//! Metadata index.
//!
//! The index is a derived, eventually consistent cache of filesystem truth:
//! bucket settings, one row per stored version (live or trashed) and the
//! bookkeeping of in-progress multipart uploads. It is injected into the
//! engine as `Arc<dyn MetadataIndex>`; [`SqliteIndex`] is the production
//! implementation.
//!
//! Every method is a short synchronous call. Failures surface as
//! [`StorageError::IndexUnavailable`](crate::error::StorageError::IndexUnavailable)
//! so callers can decide between degrading and failing closed.

pub mod sqlite;
#[cfg(test)]
pub(crate) mod testing;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StorageResult;
use crate::state::{BucketConfig, MultipartUpload, PartRecord, VersionId, VersionRecord};

pub use sqlite::SqliteIndex;

/// Aggregate counters over live and trashed versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounters {
    /// Keys with a live latest version.
    pub objects: u64,
    /// Live versions, folder placeholders excluded.
    pub versions: u64,
    /// Plaintext bytes across live versions.
    pub bytes: u64,
    /// Versions in the trash.
    pub trashed_versions: u64,
    /// Plaintext bytes in the trash.
    pub trashed_bytes: u64,
}

impl UsageCounters {
    /// Add another set of counters.
    pub fn merge(&mut self, other: Self) {
        self.objects += other.objects;
        self.versions += other.versions;
        self.bytes += other.bytes;
        self.trashed_versions += other.trashed_versions;
        self.trashed_bytes += other.trashed_bytes;
    }
}

/// Persistent metadata over the version store.
pub trait MetadataIndex: Send + Sync + std::fmt::Debug {
    // -----------------------------------------------------------------------
    // Buckets
    // -----------------------------------------------------------------------

    /// Insert or replace a bucket configuration.
    fn upsert_bucket(&self, config: &BucketConfig) -> StorageResult<()>;

    /// Remove a bucket and every row that belongs to it.
    fn delete_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// All bucket configurations.
    fn load_buckets(&self) -> StorageResult<Vec<BucketConfig>>;

    // -----------------------------------------------------------------------
    // Versions
    // -----------------------------------------------------------------------

    /// Insert or replace a version row.
    fn upsert_version(&self, record: &VersionRecord) -> StorageResult<()>;

    /// Insert a version row unless the key already has one for that
    /// version. Returns whether a row was inserted.
    fn insert_version_if_absent(&self, record: &VersionRecord) -> StorageResult<bool>;

    /// Overwrite the size, encryption and modification time of an existing
    /// row with the values in `observed` and drop its etag. Only rows that
    /// differ in size or encryption are touched. Returns whether a row
    /// changed.
    fn correct_version_stat(&self, observed: &VersionRecord) -> StorageResult<bool>;

    /// Move a row to another version identifier and set its trash
    /// timestamp, replacing any row already under `to`. Returns whether a
    /// row was moved.
    fn rekey_version(
        &self,
        bucket: &str,
        key: &str,
        from: &VersionId,
        to: &VersionId,
        deleted_at: Option<DateTime<Utc>>,
    ) -> StorageResult<bool>;

    /// One version row.
    fn get_version(
        &self,
        bucket: &str,
        key: &str,
        version: &VersionId,
    ) -> StorageResult<Option<VersionRecord>>;

    /// Remove one version row.
    fn delete_version(&self, bucket: &str, key: &str, version: &VersionId) -> StorageResult<()>;

    /// Every row of a key, live and trashed.
    fn versions_of(&self, bucket: &str, key: &str) -> StorageResult<Vec<VersionRecord>>;

    /// Every row of a bucket, live and trashed.
    fn bucket_versions(&self, bucket: &str) -> StorageResult<Vec<VersionRecord>>;

    /// Flag `latest` as the only latest row of a key (`None` clears all).
    fn set_latest(&self, bucket: &str, key: &str, latest: Option<&VersionId>) -> StorageResult<()>;

    /// Set or clear the trash timestamp of a row.
    fn mark_deleted(
        &self,
        bucket: &str,
        key: &str,
        version: &VersionId,
        deleted_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()>;

    /// Live latest rows whose key starts with `prefix`, sorted by key.
    fn list_latest(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<VersionRecord>>;

    /// Trashed rows, optionally restricted to one bucket.
    fn list_trashed(&self, bucket: Option<&str>) -> StorageResult<Vec<VersionRecord>>;

    /// Live non-folder rows under `prefix` last modified before `cutoff`.
    fn live_versions_older_than(
        &self,
        bucket: &str,
        prefix: &str,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<VersionRecord>>;

    /// Usage counters, optionally restricted to one bucket.
    fn usage(&self, bucket: Option<&str>) -> StorageResult<UsageCounters>;

    // -----------------------------------------------------------------------
    // Multipart uploads
    // -----------------------------------------------------------------------

    /// Record a new upload.
    fn insert_upload(&self, upload: &MultipartUpload) -> StorageResult<()>;

    /// One upload.
    fn get_upload(&self, upload_id: &str) -> StorageResult<Option<MultipartUpload>>;

    /// Forget an upload and its parts.
    fn delete_upload(&self, upload_id: &str) -> StorageResult<()>;

    /// Insert or replace a part.
    fn record_part(&self, upload_id: &str, part: &PartRecord) -> StorageResult<()>;

    /// Parts of an upload, sorted by part number.
    fn list_parts(&self, upload_id: &str) -> StorageResult<Vec<PartRecord>>;

    /// Uploads targeting a bucket, oldest first.
    fn list_uploads(&self, bucket: &str) -> StorageResult<Vec<MultipartUpload>>;
}
