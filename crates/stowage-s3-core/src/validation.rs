//! Validation for bucket names, object keys and tags.
//!
//! Bucket names follow the
//! [Amazon S3 naming rules](https://docs.aws.amazon.com/AmazonS3/latest/userguide/bucketnamingrules.html)
//! except for the three-character minimum, which is left to the protocol
//! layer: short names such as `b1` are valid directory names and the engine
//! accepts them.
//! Object keys are additionally constrained by the on-disk layout: every
//! `/`-separated segment becomes a directory, so segments may not be empty,
//! relative, or start with the `.` reserved for engine-private names.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::error::StorageError;

/// Maximum number of tags allowed on a single version.
const MAX_TAGS: usize = 10;

/// Maximum length of a tag key in characters.
const MAX_TAG_KEY_LEN: usize = 128;

/// Maximum length of a tag value in characters.
const MAX_TAG_VALUE_LEN: usize = 256;

/// Maximum object key length in bytes.
const MAX_KEY_BYTES: usize = 1024;

/// Minimum bucket name length.
const MIN_BUCKET_NAME_LEN: usize = 1;

/// Maximum bucket name length.
const MAX_BUCKET_NAME_LEN: usize = 63;

/// Validate an S3 bucket name.
///
/// Rules:
/// - 1-63 characters long
/// - Only lowercase letters, numbers, hyphens, and dots
/// - Must start and end with a letter or number
/// - No consecutive dots (`..`)
/// - Not formatted as an IPv4 address (e.g. `192.168.0.1`)
/// - Must not start with `xn--`
///
/// # Examples
///
/// ```
/// use stowage_s3_core::validation::validate_bucket_name;
///
/// assert!(validate_bucket_name("my-valid-bucket").is_ok());
/// assert!(validate_bucket_name("AB").is_err());
/// ```
pub fn validate_bucket_name(name: &str) -> Result<(), StorageError> {
    let invalid = |reason: &str| StorageError::InvalidBucketName {
        name: name.to_owned(),
        reason: reason.to_owned(),
    };
    let len = name.len();

    if !(MIN_BUCKET_NAME_LEN..=MAX_BUCKET_NAME_LEN).contains(&len) {
        return Err(invalid(&format!(
            "Bucket name must be between {MIN_BUCKET_NAME_LEN} and {MAX_BUCKET_NAME_LEN} characters long"
        )));
    }

    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
    {
        return Err(invalid(
            "Bucket name must only contain lowercase letters, numbers, hyphens, and dots",
        ));
    }

    let first = name.as_bytes()[0];
    let last = name.as_bytes()[len - 1];
    if !(first.is_ascii_lowercase() || first.is_ascii_digit())
        || !(last.is_ascii_lowercase() || last.is_ascii_digit())
    {
        return Err(invalid("Bucket name must start and end with a letter or number"));
    }

    if name.contains("..") {
        return Err(invalid("Bucket name must not contain consecutive dots"));
    }

    if name.parse::<Ipv4Addr>().is_ok() {
        return Err(invalid("Bucket name must not be formatted as an IP address"));
    }

    if name.starts_with("xn--") {
        return Err(invalid("Bucket name must not start with 'xn--'"));
    }

    Ok(())
}

/// Validate an object key against S3 limits and the directory layout.
///
/// A single trailing `/` marks a folder placeholder and is allowed.
///
/// # Examples
///
/// ```
/// use stowage_s3_core::validation::validate_object_key;
///
/// assert!(validate_object_key("photos/2024/image.jpg").is_ok());
/// assert!(validate_object_key("photos/").is_ok());
/// assert!(validate_object_key("a//b").is_err());
/// assert!(validate_object_key(".hidden").is_err());
/// ```
pub fn validate_object_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidArgument {
            message: "Object key must not be empty".to_owned(),
        });
    }

    if key.len() > MAX_KEY_BYTES {
        return Err(StorageError::KeyTooLong);
    }

    let body = key.strip_suffix('/').unwrap_or(key);
    if body.is_empty() {
        return Err(StorageError::InvalidArgument {
            message: "Object key must contain a name".to_owned(),
        });
    }

    for segment in body.split('/') {
        if segment.is_empty() {
            return Err(StorageError::InvalidArgument {
                message: format!("Object key {key:?} contains an empty path segment"),
            });
        }
        if segment.starts_with('.') {
            return Err(StorageError::InvalidArgument {
                message: format!("Object key segment {segment:?} must not start with '.'"),
            });
        }
        if segment.contains('\\') || segment.contains('\0') {
            return Err(StorageError::InvalidArgument {
                message: format!("Object key segment {segment:?} contains a reserved character"),
            });
        }
    }

    Ok(())
}

/// Length of an upload ID as produced by `generate_upload_id`.
const UPLOAD_ID_LEN: usize = 32;

/// Validate a caller-supplied multipart upload ID.
///
/// Upload IDs name a directory under the staging root, so anything other
/// than 32 lowercase hex characters is answered with `NoSuchUpload`.
///
/// # Examples
///
/// ```
/// use stowage_s3_core::utils::generate_upload_id;
/// use stowage_s3_core::validation::validate_upload_id;
///
/// assert!(validate_upload_id(&generate_upload_id()).is_ok());
/// assert!(validate_upload_id("../photos").is_err());
/// ```
pub fn validate_upload_id(upload_id: &str) -> Result<(), StorageError> {
    let well_formed = upload_id.len() == UPLOAD_ID_LEN
        && upload_id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if well_formed {
        Ok(())
    } else {
        Err(StorageError::NoSuchUpload {
            upload_id: upload_id.to_owned(),
        })
    }
}

/// Whether a key addresses a folder placeholder.
#[must_use]
pub fn is_folder_key(key: &str) -> bool {
    key.ends_with('/')
}

/// Validate a tag key.
pub fn validate_tag_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidTag {
            message: "Tag key must not be empty".to_owned(),
        });
    }
    if key.chars().count() > MAX_TAG_KEY_LEN {
        return Err(StorageError::InvalidTag {
            message: format!(
                "Tag key must not exceed {MAX_TAG_KEY_LEN} characters, got {}",
                key.chars().count()
            ),
        });
    }
    Ok(())
}

/// Validate a tag value.
pub fn validate_tag_value(value: &str) -> Result<(), StorageError> {
    if value.chars().count() > MAX_TAG_VALUE_LEN {
        return Err(StorageError::InvalidTag {
            message: format!(
                "Tag value must not exceed {MAX_TAG_VALUE_LEN} characters, got {}",
                value.chars().count()
            ),
        });
    }
    Ok(())
}

/// Validate a complete tag set.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use stowage_s3_core::validation::validate_tags;
///
/// let tags = HashMap::from([("env".to_owned(), "prod".to_owned())]);
/// assert!(validate_tags(&tags).is_ok());
/// ```
pub fn validate_tags(tags: &HashMap<String, String>) -> Result<(), StorageError> {
    if tags.len() > MAX_TAGS {
        return Err(StorageError::InvalidTag {
            message: format!(
                "Object tags cannot be greater than {MAX_TAGS}, got {}",
                tags.len()
            ),
        });
    }
    for (key, value) in tags {
        validate_tag_key(key)?;
        validate_tag_value(value)?;
    }
    Ok(())
}
