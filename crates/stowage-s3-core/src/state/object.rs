//! Object and version metadata types.
//!
//! [`VersionRecord`] is the row shape of the metadata index: one record per
//! stored version, live or trashed. The request/response types used by the
//! object operations ([`PutOptions`], [`DeleteOptions`], [`ListQuery`] and
//! friends) live here as well.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::version::VersionId;

// ---------------------------------------------------------------------------
// Lock types
// ---------------------------------------------------------------------------

/// Object lock retention mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LockMode {
    /// Deletable by callers presenting the governance bypass.
    Governance,
    /// Not deletable by anyone until the retain-until date passes.
    Compliance,
}

impl LockMode {
    /// Return the canonical S3 string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Governance => "GOVERNANCE",
            Self::Compliance => "COMPLIANCE",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GOVERNANCE" => Ok(Self::Governance),
            "COMPLIANCE" => Ok(Self::Compliance),
            _ => Err(format!("unknown lock mode: {s}")),
        }
    }
}

/// A retention setting: mode plus the instant it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Retention {
    /// The retention mode.
    pub mode: LockMode,
    /// The instant after which the version may be deleted.
    pub retain_until: DateTime<Utc>,
}

/// Lock-relevant state of one version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockState {
    /// Whether a legal hold is in effect.
    #[serde(default)]
    pub legal_hold: bool,
    /// Retention, if any has been applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<Retention>,
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Server-side encryption applied to a stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    /// Chunked AES-256-GCM with the engine master key.
    #[serde(rename = "AES256-GCM")]
    Aes256Gcm,
}

impl EncryptionAlgorithm {
    /// Return the tag stored in the metadata index.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "AES256-GCM",
        }
    }

    /// Parse an index tag, returning `None` for unknown values.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        (tag == "AES256-GCM").then_some(Self::Aes256Gcm)
    }
}

// ---------------------------------------------------------------------------
// VersionRecord
// ---------------------------------------------------------------------------

/// Index record for one stored version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    /// Owning bucket.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Version identifier.
    pub version_id: VersionId,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Filesystem modification time of the version file.
    pub last_modified: DateTime<Utc>,
    /// MD5 hex digest or multipart composite tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Encryption applied to the stored bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionAlgorithm>,
    /// Whether this is the version unversioned reads resolve to.
    pub is_latest: bool,
    /// Legal hold and retention.
    #[serde(default)]
    pub lock: LockState,
    /// Set while the version sits in the trash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Object tags.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl VersionRecord {
    /// Create a live, unlocked record.
    #[must_use]
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        version_id: VersionId,
        size: u64,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            version_id,
            size,
            last_modified,
            etag: None,
            encryption: None,
            is_latest: false,
            lock: LockState::default(),
            deleted_at: None,
            tags: HashMap::new(),
        }
    }

    /// Whether the version currently lives in the trash.
    #[must_use]
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Sort versions newest first: mtime descending, ties by identifier descending.
pub fn sort_newest_first(records: &mut [VersionRecord]) {
    records.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| b.version_id.cmp(&a.version_id))
    });
}

// ---------------------------------------------------------------------------
// Object metadata returned to callers
// ---------------------------------------------------------------------------

/// Metadata describing a resolved object version.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    /// Owning bucket.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Resolved version.
    pub version_id: VersionId,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Filesystem modification time.
    pub last_modified: DateTime<Utc>,
    /// ETag, when known to the index.
    pub etag: Option<String>,
    /// Encryption applied to the stored bytes.
    pub encryption: Option<EncryptionAlgorithm>,
    /// Whether this version is the current one.
    pub is_latest: bool,
    /// Lock state, default when the index could not be consulted.
    pub lock: LockState,
}

/// Options for a single-request object write.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct PutOptions {
    /// Encrypt the stored bytes.
    #[builder(default, setter(strip_option))]
    pub encryption: Option<EncryptionAlgorithm>,
    /// Explicit retention overriding the bucket default.
    #[builder(default, setter(strip_option))]
    pub retention: Option<Retention>,
    /// Place a legal hold on the new version.
    #[builder(default)]
    pub legal_hold: bool,
    /// Tags attached to the new version.
    #[builder(default)]
    pub tags: HashMap<String, String>,
    /// Permit replacing a GOVERNANCE-locked non-versioned object.
    #[builder(default)]
    pub bypass_governance: bool,
}

/// Result of a successful object write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// The identifier of the new version.
    pub version_id: VersionId,
    /// MD5 hex digest, or multipart composite tag.
    pub etag: String,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Filesystem modification time of the new version.
    pub last_modified: DateTime<Utc>,
}

/// Options for an object delete.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct DeleteOptions {
    /// Delete only this version. `None` deletes every live version.
    #[builder(default, setter(strip_option))]
    pub version_id: Option<VersionId>,
    /// Permit deleting GOVERNANCE-locked versions.
    #[builder(default)]
    pub bypass_governance: bool,
}

/// Result of a delete call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Versions that were removed from the live tree.
    pub removed: Vec<VersionId>,
    /// Whether they went to the trash rather than being destroyed.
    pub trashed: bool,
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Default page size for object listings.
pub const DEFAULT_MAX_KEYS: usize = 1000;

/// Parameters for listing the current objects of a bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, TypedBuilder)]
pub struct ListQuery {
    /// Only keys starting with this prefix.
    #[builder(default, setter(into))]
    pub prefix: String,
    /// Roll keys sharing a segment up to this delimiter into common prefixes.
    #[builder(default, setter(strip_option, into))]
    pub delimiter: Option<String>,
    /// Case-insensitive substring filter on the key.
    #[builder(default, setter(strip_option, into))]
    pub search: Option<String>,
    /// Only entries sorting strictly after this key.
    #[builder(default, setter(strip_option, into))]
    pub start_after: Option<String>,
    /// Page size. Zero means the default.
    #[builder(default)]
    pub max_keys: usize,
}

/// One current object in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    /// Object key.
    pub key: String,
    /// Current version.
    pub version_id: VersionId,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Filesystem modification time.
    pub last_modified: DateTime<Utc>,
    /// ETag, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// A page of listing results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsResult {
    /// Objects on this page, sorted by key.
    pub objects: Vec<ObjectSummary>,
    /// Rolled-up prefixes when a delimiter was given.
    pub common_prefixes: Vec<String>,
    /// Whether more entries follow.
    pub is_truncated: bool,
    /// Pass as `start_after` to fetch the next page.
    pub next_start_after: Option<String>,
}
