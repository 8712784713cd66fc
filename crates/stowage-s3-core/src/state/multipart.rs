//! Multipart upload state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::object::EncryptionAlgorithm;

/// Lowest valid part number.
pub const MIN_PART_NUMBER: u32 = 1;
/// Highest valid part number.
pub const MAX_PART_NUMBER: u32 = 10_000;

/// An in-progress multipart upload. Serialized as the staging manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartUpload {
    /// Random hex identifier.
    pub upload_id: String,
    /// Destination bucket.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    /// Encryption applied when the parts are assembled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionAlgorithm>,
    /// When the upload was initiated.
    pub initiated: DateTime<Utc>,
}

/// One uploaded part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartRecord {
    /// Part number, 1..=10000.
    pub part_number: u32,
    /// Part size in bytes.
    pub size: u64,
    /// MD5 hex digest of the part.
    pub etag: String,
    /// When the part was stored.
    pub last_modified: DateTime<Utc>,
}

/// A part named in a completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// Part number.
    pub part_number: u32,
    /// ETag the caller received for the part, checked when present.
    pub etag: Option<String>,
}

impl CompletedPart {
    /// A part reference without an etag check.
    #[must_use]
    pub fn new(part_number: u32) -> Self {
        Self {
            part_number,
            etag: None,
        }
    }
}
