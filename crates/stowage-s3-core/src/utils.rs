//! Shared utilities: ID generation and time conversion.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a random upload ID for multipart uploads (32 hex characters).
///
/// # Examples
///
/// ```
/// use stowage_s3_core::utils::generate_upload_id;
///
/// let id = generate_upload_id();
/// assert_eq!(id.len(), 32);
/// assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
/// ```
#[must_use]
pub fn generate_upload_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Name for a temporary file. Always dot-prefixed so discovery skips it.
#[must_use]
pub fn temp_file_name() -> String {
    format!(".tmp-{}", Uuid::new_v4().simple())
}

/// Convert a filesystem timestamp to UTC.
#[must_use]
pub fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Nanoseconds since the epoch for a filesystem timestamp, saturating at zero.
#[must_use]
pub fn system_time_to_nanos(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
