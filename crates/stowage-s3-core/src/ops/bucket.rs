//! Bucket operation handlers.
//!
//! Implements `create_bucket`, `bucket_exists`, `list_buckets`,
//! `delete_bucket`, `get_bucket_config`, `set_versioning`,
//! `set_object_lock` and `set_soft_delete`.

use chrono::Utc;
use tracing::{debug, info};

use crate::engine::ObjectEngine;
use crate::error::{StorageError, StorageResult};
use crate::retention::{may_mutate, validate_period_days};
use crate::state::{
    BucketConfig, BucketSummary, CreateBucketOptions, ObjectLockConfig, SoftDeletePolicy,
};
use crate::validation::validate_bucket_name;

impl ObjectEngine {
    // -----------------------------------------------------------------------
    // Bucket CRUD
    // -----------------------------------------------------------------------

    /// Create a bucket.
    pub async fn create_bucket(
        &self,
        name: &str,
        options: CreateBucketOptions,
    ) -> StorageResult<BucketConfig> {
        validate_bucket_name(name)?;
        if self.buckets.contains(name) {
            return Err(StorageError::BucketAlreadyExists {
                bucket: name.to_owned(),
            });
        }

        self.store.create_bucket_dir(name).await?;
        let mut config = BucketConfig::new(name);
        config.versioning_enabled = options.versioning || options.object_lock;
        config.object_lock.enabled = options.object_lock;

        self.defer_index(self.index.upsert_bucket(&config), name, "");
        self.buckets.put(config.clone());
        self.cache.invalidate_buckets();
        info!(
            bucket = name,
            versioning = config.versioning_enabled,
            object_lock = config.object_lock.enabled,
            "created bucket"
        );
        Ok(config)
    }

    /// Whether a bucket exists.
    #[must_use]
    pub fn bucket_exists(&self, name: &str) -> bool {
        self.buckets.contains(name)
    }

    /// All buckets, sorted by name.
    #[must_use]
    pub fn list_buckets(&self) -> Vec<BucketSummary> {
        if let Some(cached) = self.cache.buckets() {
            return cached;
        }
        let summaries = self.buckets.summaries();
        self.cache.store_buckets(summaries.clone());
        summaries
    }

    /// Delete a bucket with its live tree, trash, uploads and index rows.
    ///
    /// Refuses while any live version is locked. Fails closed when lock
    /// state cannot be read.
    pub async fn delete_bucket(&self, name: &str) -> StorageResult<()> {
        self.bucket(name)?;
        let now = Utc::now();
        for record in self.index.bucket_versions(name)? {
            if record.is_trashed() {
                continue;
            }
            may_mutate(&record.lock, false, now)
                .map_err(|reason| StorageError::Locked { reason })?;
        }

        let mut upload_ids: Vec<String> = match self.index.list_uploads(name) {
            Ok(uploads) => uploads.into_iter().map(|u| u.upload_id).collect(),
            Err(e) => {
                debug!(bucket = name, error = %e, "listing uploads from staging instead");
                Vec::new()
            }
        };
        upload_ids.extend(
            self.staging
                .manifests()
                .await?
                .into_iter()
                .filter(|u| u.bucket == name)
                .map(|u| u.upload_id),
        );
        upload_ids.sort();
        upload_ids.dedup();
        for upload_id in &upload_ids {
            self.staging.remove(upload_id).await?;
        }

        self.store.remove_bucket_dir(name).await?;
        self.trash.remove_bucket(name).await?;
        self.defer_index(self.index.delete_bucket(name), name, "");
        self.buckets.remove(name);
        self.invalidate(name);
        self.cache.invalidate_buckets();
        info!(bucket = name, uploads = upload_ids.len(), "deleted bucket");
        Ok(())
    }

    /// Settings of a bucket.
    pub fn get_bucket_config(&self, name: &str) -> StorageResult<BucketConfig> {
        self.bucket(name)
    }

    // -----------------------------------------------------------------------
    // Bucket settings
    // -----------------------------------------------------------------------

    /// Apply `update` to a bucket's settings and persist them.
    pub(crate) fn update_bucket<F>(&self, name: &str, update: F) -> StorageResult<BucketConfig>
    where
        F: FnOnce(&mut BucketConfig) -> StorageResult<()>,
    {
        let mut config = self.bucket(name)?;
        update(&mut config)?;
        self.index.upsert_bucket(&config)?;
        self.buckets.put(config.clone());
        self.invalidate(name);
        Ok(config)
    }

    /// Turn versioning on or off. Object-locked buckets stay versioned.
    pub fn set_versioning(&self, name: &str, enabled: bool) -> StorageResult<BucketConfig> {
        let config = self.update_bucket(name, |config| {
            if !enabled && config.object_lock.enabled {
                return Err(StorageError::InvalidArgument {
                    message: "versioning cannot be disabled while object lock is enabled"
                        .to_owned(),
                });
            }
            config.versioning_enabled = enabled;
            Ok(())
        })?;
        info!(bucket = name, enabled, "set bucket versioning");
        Ok(config)
    }

    /// Replace the object lock configuration.
    ///
    /// Enabling object lock also enables versioning; once enabled it cannot
    /// be disabled.
    pub fn set_object_lock(
        &self,
        name: &str,
        lock: ObjectLockConfig,
    ) -> StorageResult<BucketConfig> {
        if let Some(default) = lock.default_retention {
            validate_period_days("default retention", default.days, false)?;
        }
        let config = self.update_bucket(name, |config| {
            if config.object_lock.enabled && !lock.enabled {
                return Err(StorageError::InvalidArgument {
                    message: "object lock cannot be disabled once enabled".to_owned(),
                });
            }
            if lock.enabled {
                config.versioning_enabled = true;
            }
            config.object_lock = lock;
            Ok(())
        })?;
        info!(bucket = name, enabled = lock.enabled, "set object lock configuration");
        Ok(config)
    }

    /// Replace the soft-delete policy.
    pub fn set_soft_delete(
        &self,
        name: &str,
        policy: SoftDeletePolicy,
    ) -> StorageResult<BucketConfig> {
        validate_period_days("trash retention", policy.retention_days, true)?;
        let config = self.update_bucket(name, |config| {
            config.soft_delete = policy;
            Ok(())
        })?;
        info!(
            bucket = name,
            enabled = policy.enabled,
            retention_days = policy.retention_days,
            "set soft-delete policy"
        );
        Ok(config)
    }
}
