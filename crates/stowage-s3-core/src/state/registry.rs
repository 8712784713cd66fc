//! In-memory bucket registry.
//!
//! [`BucketRegistry`] mirrors the bucket rows of the metadata index so that
//! every request can read bucket settings without touching sqlite. The
//! engine writes through: index first, then the registry.

use dashmap::DashMap;

use crate::error::{StorageError, StorageResult};

use super::bucket::{BucketConfig, BucketSummary};

/// Concurrent map of bucket name to configuration.
pub struct BucketRegistry {
    buckets: DashMap<String, BucketConfig>,
}

impl std::fmt::Debug for BucketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketRegistry")
            .field("bucket_count", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

impl Default for BucketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Replace the registry contents.
    pub fn load(&self, configs: impl IntoIterator<Item = BucketConfig>) {
        self.buckets.clear();
        for config in configs {
            self.buckets.insert(config.name.clone(), config);
        }
    }

    /// Whether a bucket is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.buckets.contains_key(name)
    }

    /// Clone a bucket's configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoSuchBucket`] if the bucket is not registered.
    pub fn get(&self, name: &str) -> StorageResult<BucketConfig> {
        self.buckets
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NoSuchBucket {
                bucket: name.to_owned(),
            })
    }

    /// Insert or replace a configuration.
    pub fn put(&self, config: BucketConfig) {
        self.buckets.insert(config.name.clone(), config);
    }

    /// Remove a bucket, returning its last configuration.
    pub fn remove(&self, name: &str) -> Option<BucketConfig> {
        self.buckets.remove(name).map(|(_, config)| config)
    }

    /// All registered bucket names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buckets.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Snapshot of every configuration, sorted by name.
    #[must_use]
    pub fn all(&self) -> Vec<BucketConfig> {
        let mut configs: Vec<BucketConfig> =
            self.buckets.iter().map(|e| e.value().clone()).collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }

    /// Bucket summaries sorted by name.
    #[must_use]
    pub fn summaries(&self) -> Vec<BucketSummary> {
        self.all()
            .into_iter()
            .map(|c| BucketSummary {
                name: c.name,
                created_at: c.created_at,
            })
            .collect()
    }
}
