//! Object configuration handlers.
//!
//! Implements `put_object_tagging`, `get_object_tagging`,
//! `delete_object_tagging`, `put_retention`, `get_retention`,
//! `put_legal_hold` and `get_legal_hold`. These change index metadata only,
//! so index failures are returned to the caller instead of deferred.

use std::collections::HashMap;

use chrono::Utc;
use tracing::info;

use crate::engine::{ObjectEngine, missing_object};
use crate::error::{StorageError, StorageResult};
use crate::retention::may_change_retention;
use crate::state::{Retention, VersionId, VersionRecord};
use crate::validation::{validate_object_key, validate_tags};

impl ObjectEngine {
    /// Index row of a live version, synthesized from disk when the index
    /// has not caught up yet.
    async fn target_record(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&VersionId>,
    ) -> StorageResult<VersionRecord> {
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
        if let Some(record) = self.index.get_version(bucket, key, &resolved)? {
            if !record.is_trashed() {
                return Ok(record);
            }
        }
        let stat = self
            .store
            .stat(bucket, key, &resolved)
            .await?
            .ok_or_else(|| missing_object(key, version))?;
        let mut record =
            VersionRecord::new(bucket, key, stat.version_id, stat.size, stat.last_modified);
        record.encryption = stat.encryption;
        record.is_latest = version.is_none();
        Ok(record)
    }

    fn require_object_lock(&self, bucket: &str) -> StorageResult<()> {
        if self.bucket(bucket)?.object_lock.enabled {
            Ok(())
        } else {
            Err(StorageError::ObjectLockNotEnabled {
                bucket: bucket.to_owned(),
            })
        }
    }

    // -----------------------------------------------------------------------
    // Tagging
    // -----------------------------------------------------------------------

    /// Replace the tag set of a version. Returns the version tagged.
    pub async fn put_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&VersionId>,
        tags: HashMap<String, String>,
    ) -> StorageResult<VersionId> {
        validate_tags(&tags)?;
        let mut record = self.target_record(bucket, key, version).await?;
        record.tags = tags;
        self.index.upsert_version(&record)?;
        Ok(record.version_id)
    }

    /// Tag set of a version.
    pub async fn get_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&VersionId>,
    ) -> StorageResult<HashMap<String, String>> {
        Ok(self.target_record(bucket, key, version).await?.tags)
    }

    /// Remove every tag of a version.
    pub async fn delete_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&VersionId>,
    ) -> StorageResult<VersionId> {
        self.put_object_tagging(bucket, key, version, HashMap::new())
            .await
    }

    // -----------------------------------------------------------------------
    // Retention
    // -----------------------------------------------------------------------

    /// Set or clear the retention of a version.
    ///
    /// COMPLIANCE retention can only be extended. Shortening or removing
    /// GOVERNANCE retention requires `bypass_governance`.
    pub async fn put_retention(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&VersionId>,
        retention: Option<Retention>,
        bypass_governance: bool,
    ) -> StorageResult<()> {
        self.require_object_lock(bucket)?;
        let now = Utc::now();
        if let Some(r) = retention {
            if r.retain_until <= now {
                return Err(StorageError::InvalidArgument {
                    message: "retain-until date must be in the future".to_owned(),
                });
            }
        }
        let mut record = self.target_record(bucket, key, version).await?;
        may_change_retention(record.lock.retention, retention, bypass_governance, now)
            .map_err(|reason| StorageError::Locked { reason })?;
        record.lock.retention = retention;
        self.index.upsert_version(&record)?;
        info!(
            bucket,
            key,
            version = %record.version_id,
            mode = retention.map(|r| r.mode.as_str()),
            "set object retention"
        );
        Ok(())
    }

    /// Retention of a version.
    pub async fn get_retention(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&VersionId>,
    ) -> StorageResult<Option<Retention>> {
        self.require_object_lock(bucket)?;
        Ok(self
            .target_record(bucket, key, version)
            .await?
            .lock
            .retention)
    }

    // -----------------------------------------------------------------------
    // Legal hold
    // -----------------------------------------------------------------------

    /// Place or lift a legal hold.
    pub async fn put_legal_hold(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&VersionId>,
        on: bool,
    ) -> StorageResult<()> {
        self.require_object_lock(bucket)?;
        let mut record = self.target_record(bucket, key, version).await?;
        record.lock.legal_hold = on;
        self.index.upsert_version(&record)?;
        info!(bucket, key, version = %record.version_id, on, "set legal hold");
        Ok(())
    }

    /// Whether a version is under legal hold.
    pub async fn get_legal_hold(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&VersionId>,
    ) -> StorageResult<bool> {
        self.require_object_lock(bucket)?;
        Ok(self
            .target_record(bucket, key, version)
            .await?
            .lock
            .legal_hold)
    }
}
