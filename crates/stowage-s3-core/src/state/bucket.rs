//! Bucket configuration types.
//!
//! A [`BucketConfig`] holds every per-bucket setting: versioning, object
//! lock, soft delete, lifecycle, CORS and website hosting. It is persisted
//! as JSON in the metadata index and mirrored in memory by the bucket
//! registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::object::{LockMode, Retention};
use crate::retention::days_after;

// ---------------------------------------------------------------------------
// Supporting configuration types
// ---------------------------------------------------------------------------

/// Default retention applied to new versions in a lock-enabled bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultRetention {
    /// Retention mode stamped on new versions.
    pub mode: LockMode,
    /// Retention period in days.
    pub days: u32,
}

impl DefaultRetention {
    /// The retention a version written at `now` receives.
    #[must_use]
    pub fn stamp(&self, now: DateTime<Utc>) -> Retention {
        Retention {
            mode: self.mode,
            retain_until: days_after(now, self.days),
        }
    }
}

/// Object lock configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectLockConfig {
    /// Whether object lock is enabled. Cannot be turned off once on.
    pub enabled: bool,
    /// Optional default retention rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_retention: Option<DefaultRetention>,
}

/// Soft-delete (trash) policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftDeletePolicy {
    /// Route deletes through the trash.
    pub enabled: bool,
    /// Days a trashed version survives before the trash worker purges it.
    pub retention_days: u32,
}

/// Status of a lifecycle rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleStatus {
    /// The rule is evaluated by the lifecycle worker.
    #[default]
    Enabled,
    /// The rule is kept but ignored.
    Disabled,
}

/// A single expiration rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRule {
    /// Rule identifier, unique within the bucket.
    pub id: String,
    /// Whether the rule is active.
    #[serde(default)]
    pub status: RuleStatus,
    /// Key prefix the rule applies to. Empty matches every key.
    #[serde(default)]
    pub prefix: String,
    /// Versions older than this many days are expired.
    pub expiration_days: u32,
}

/// Lifecycle configuration for a bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleConfiguration {
    /// The rules, evaluated independently.
    pub rules: Vec<LifecycleRule>,
}

impl LifecycleConfiguration {
    /// Iterate over enabled rules.
    pub fn enabled_rules(&self) -> impl Iterator<Item = &LifecycleRule> {
        self.rules
            .iter()
            .filter(|r| r.status == RuleStatus::Enabled)
    }
}

/// CORS rule configuration stored on a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsRule {
    /// Optional identifier for the rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Origins that are allowed to make cross-domain requests.
    pub allowed_origins: Vec<String>,
    /// HTTP methods that the origin is allowed to execute.
    pub allowed_methods: Vec<String>,
    /// Headers that are allowed in a pre-flight `OPTIONS` request.
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    /// Headers in the response that customers are able to access.
    #[serde(default)]
    pub expose_headers: Vec<String>,
    /// Time in seconds that the browser should cache the preflight response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_seconds: Option<u32>,
}

/// Static website hosting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteConfig {
    /// Suffix appended to directory requests (e.g. `index.html`).
    pub index_document: String,
    /// Key served for 4xx errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_document: Option<String>,
    /// Redirect every request to this host instead of serving content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_all_requests_to: Option<String>,
}

// ---------------------------------------------------------------------------
// BucketConfig
// ---------------------------------------------------------------------------

/// All persisted state of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketConfig {
    /// Bucket name.
    pub name: String,
    /// When the bucket was created (or first discovered on disk).
    pub created_at: DateTime<Utc>,
    /// Whether writes create timestamped versions.
    #[serde(default)]
    pub versioning_enabled: bool,
    /// Object lock settings.
    #[serde(default)]
    pub object_lock: ObjectLockConfig,
    /// Trash policy.
    #[serde(default)]
    pub soft_delete: SoftDeletePolicy,
    /// Expiration rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<LifecycleConfiguration>,
    /// CORS rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<Vec<CorsRule>>,
    /// Website hosting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<WebsiteConfig>,
}

impl BucketConfig {
    /// A bucket with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            versioning_enabled: false,
            object_lock: ObjectLockConfig::default(),
            soft_delete: SoftDeletePolicy::default(),
            lifecycle: None,
            cors: None,
            website: None,
        }
    }

    /// Retention a new version receives, preferring an explicit override.
    #[must_use]
    pub fn retention_for_new_version(
        &self,
        explicit: Option<Retention>,
        now: DateTime<Utc>,
    ) -> Option<Retention> {
        if !self.object_lock.enabled {
            return None;
        }
        explicit.or_else(|| self.object_lock.default_retention.map(|d| d.stamp(now)))
    }
}

/// Summary entry returned by `list_buckets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSummary {
    /// Bucket name.
    pub name: String,
    /// Creation date.
    pub created_at: DateTime<Utc>,
}

/// Options accepted by `create_bucket`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateBucketOptions {
    /// Enable versioning from the start.
    pub versioning: bool,
    /// Enable object lock (implies versioning).
    pub object_lock: bool,
}
