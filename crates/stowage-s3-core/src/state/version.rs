//! Version identifiers.
//!
//! Every stored version is addressed by a [`VersionId`]. Timestamped
//! versions carry nanoseconds since the Unix epoch and are written to disk
//! as decimal file names; the three sentinels name slots that exist outside
//! the versioning scheme. A `simple` version moved to the trash is renamed
//! to `simple-<ns>` so every deletion of a non-versioned key keeps its own
//! trashed copy.
//!
//! Sentinels order below every timestamp so "newest" comparisons always
//! prefer a real version.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// On-disk token for the non-versioned slot.
pub const NON_VERSIONED_TOKEN: &str = "simple";
/// On-disk token for folder placeholders.
pub const FOLDER_TOKEN: &str = "folder";
/// On-disk token for flat files that predate the key-directory layout.
pub const LEGACY_TOKEN: &str = "legacy";

/// Identifier of a single stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionId {
    /// A version written while versioning was enabled (ns since epoch).
    Timestamp(u64),
    /// The single slot used by non-versioned writes.
    NonVersioned,
    /// A zero-byte folder placeholder (key ends with `/`).
    FolderPlaceholder,
    /// A plain file at the key path.
    LegacyFlatFile,
    /// A non-versioned slot in the trash, keyed by its deletion time (ns).
    TrashedSimple(u64),
}

impl VersionId {
    /// Allocate a fresh timestamp identifier.
    #[must_use]
    pub fn next() -> Self {
        Self::Timestamp(next_timestamp())
    }

    /// The on-disk file name for this version.
    #[must_use]
    pub fn token(&self) -> String {
        match self {
            Self::Timestamp(ns) => ns.to_string(),
            Self::NonVersioned => NON_VERSIONED_TOKEN.to_owned(),
            Self::FolderPlaceholder => FOLDER_TOKEN.to_owned(),
            Self::LegacyFlatFile => LEGACY_TOKEN.to_owned(),
            Self::TrashedSimple(ns) => format!("{NON_VERSIONED_TOKEN}-{ns}"),
        }
    }

    /// The live slot this version occupies once restored.
    #[must_use]
    pub fn live_slot(&self) -> Self {
        match self {
            Self::TrashedSimple(_) => Self::NonVersioned,
            other => *other,
        }
    }

    /// The identifier reported to clients. Folder placeholders have none.
    #[must_use]
    pub fn wire_token(&self) -> String {
        match self {
            Self::FolderPlaceholder => String::new(),
            other => other.token(),
        }
    }

    /// Whether this is a timestamped version.
    #[must_use]
    pub fn is_timestamp(&self) -> bool {
        matches!(self, Self::Timestamp(_))
    }

    /// Whether the given file name could be a version file inside a key
    /// directory.
    #[must_use]
    pub fn is_version_file_name(name: &str) -> bool {
        name == NON_VERSIONED_TOKEN || parse_timestamp(name).is_some()
    }

    fn rank(&self) -> (u8, u64) {
        match self {
            Self::FolderPlaceholder => (0, 0),
            Self::LegacyFlatFile => (1, 0),
            Self::TrashedSimple(ns) => (2, *ns),
            Self::NonVersioned => (3, 0),
            Self::Timestamp(ns) => (4, *ns),
        }
    }
}

impl Ord for VersionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for VersionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// Error returned when a string is not a valid version token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version id: {0:?}")]
pub struct ParseVersionIdError(String);

impl FromStr for VersionId {
    type Err = ParseVersionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            NON_VERSIONED_TOKEN | "null" => Ok(Self::NonVersioned),
            FOLDER_TOKEN | "" => Ok(Self::FolderPlaceholder),
            LEGACY_TOKEN => Ok(Self::LegacyFlatFile),
            other => match other
                .strip_prefix(NON_VERSIONED_TOKEN)
                .and_then(|rest| rest.strip_prefix('-'))
            {
                Some(ns) => parse_timestamp(ns).map(Self::TrashedSimple),
                None => parse_timestamp(other).map(Self::Timestamp),
            }
            .ok_or_else(|| ParseVersionIdError(other.to_owned())),
        }
    }
}

impl Serialize for VersionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.token())
    }
}

impl<'de> Deserialize<'de> for VersionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn parse_timestamp(s: &str) -> Option<u64> {
    if s.is_empty() || s.len() > 20 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

// ---------------------------------------------------------------------------
// Monotonic clock
// ---------------------------------------------------------------------------

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// Return a process-wide strictly increasing nanosecond timestamp.
///
/// Each call yields `max(now_ns, last + 1)`, so two versions written in the
/// same nanosecond (or across a backwards clock step) still sort correctly.
#[must_use]
pub fn next_timestamp() -> u64 {
    let now = Utc::now()
        .timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0);
    let mut last = LAST_TIMESTAMP.load(AtomicOrdering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_TIMESTAMP.compare_exchange_weak(
            last,
            candidate,
            AtomicOrdering::AcqRel,
            AtomicOrdering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}
