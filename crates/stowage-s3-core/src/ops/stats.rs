//! Storage statistics.
//!
//! Counters come from the index. When it cannot be read the live trees are
//! scanned instead; trash counters are then reported as zero.

use serde::Serialize;
use tracing::debug;

use crate::engine::ObjectEngine;
use crate::error::StorageResult;
use crate::index::UsageCounters;
use crate::ops::list::scanned_latest_id;
use crate::state::VersionId;

/// Usage across every bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    /// Number of buckets.
    pub buckets: usize,
    /// Aggregate counters.
    #[serde(flatten)]
    pub usage: UsageCounters,
}

/// Usage of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketStats {
    /// Bucket name.
    pub bucket: String,
    /// Bucket counters.
    #[serde(flatten)]
    pub usage: UsageCounters,
}

impl ObjectEngine {
    /// Usage across every bucket.
    pub async fn stats(&self) -> StorageResult<StorageStats> {
        let names = self.buckets.names();
        let usage = match self.index.usage(None) {
            Ok(usage) => usage,
            Err(e) => {
                debug!(error = %e, "computing usage from filesystem scan");
                let mut total = UsageCounters::default();
                for name in &names {
                    total.merge(self.scan_usage(name).await?);
                }
                total
            }
        };
        Ok(StorageStats {
            buckets: names.len(),
            usage,
        })
    }

    /// Usage of one bucket.
    pub async fn bucket_stats(&self, bucket: &str) -> StorageResult<BucketStats> {
        self.bucket(bucket)?;
        let usage = match self.index.usage(Some(bucket)) {
            Ok(usage) => usage,
            Err(e) => {
                debug!(bucket, error = %e, "computing usage from filesystem scan");
                self.scan_usage(bucket).await?
            }
        };
        Ok(BucketStats {
            bucket: bucket.to_owned(),
            usage,
        })
    }

    async fn scan_usage(&self, bucket: &str) -> StorageResult<UsageCounters> {
        let scan = self.store.scan_bucket(bucket).await?;
        let mut usage = UsageCounters::default();
        for object in &scan.objects {
            if object
                .versions
                .iter()
                .all(|v| v.version_id == VersionId::FolderPlaceholder)
            {
                continue;
            }
            if scanned_latest_id(object).is_some() {
                usage.objects += 1;
            }
            usage.versions += object.versions.len() as u64;
            usage.bytes += object.versions.iter().map(|v| v.size).sum::<u64>();
        }
        Ok(usage)
    }
}
