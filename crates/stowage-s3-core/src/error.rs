//! Storage engine error types.
//!
//! Defines [`StorageError`], the domain error enum returned by every engine
//! operation. Each variant maps to a concrete S3 error code through
//! [`StorageError::code`], so the protocol layer can translate engine
//! failures into wire errors without inspecting messages.
//!
//! # Usage
//!
//! ```
//! use stowage_s3_core::error::StorageError;
//!
//! let err = StorageError::NoSuchBucket {
//!     bucket: "my-bucket".to_owned(),
//! };
//! assert_eq!(err.code(), "NoSuchBucket");
//! ```

use crate::retention::LockDenial;

/// Storage engine error type.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    // -----------------------------------------------------------------------
    // Bucket errors
    // -----------------------------------------------------------------------
    /// The specified bucket does not exist.
    #[error("The specified bucket does not exist: {bucket}")]
    NoSuchBucket {
        /// The bucket name that was not found.
        bucket: String,
    },

    /// A bucket with this name already exists.
    #[error("The requested bucket name is not available: {bucket}")]
    BucketAlreadyExists {
        /// The bucket name that already exists.
        bucket: String,
    },

    /// The specified bucket name is not valid.
    #[error("Invalid bucket name: {name}: {reason}")]
    InvalidBucketName {
        /// The invalid bucket name.
        name: String,
        /// The reason for the error.
        reason: String,
    },

    // -----------------------------------------------------------------------
    // Object / version errors
    // -----------------------------------------------------------------------
    /// The specified key does not exist.
    #[error("The specified key does not exist: {key}")]
    NoSuchKey {
        /// The key that was not found.
        key: String,
    },

    /// The specified version does not exist.
    #[error("The specified version does not exist: key={key}, version_id={version_id}")]
    NoSuchVersion {
        /// The key for the version.
        key: String,
        /// The version ID that was not found.
        version_id: String,
    },

    // -----------------------------------------------------------------------
    // Retention / lock errors
    // -----------------------------------------------------------------------
    /// A legal hold or retention period blocks the operation.
    #[error("Object is locked: {reason}")]
    Locked {
        /// The lock that denied the operation, with its mode and date.
        reason: LockDenial,
    },

    /// The operation conflicts with current state (e.g. restore target occupied).
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// Object lock is not enabled on the bucket.
    #[error("Object Lock is not enabled for bucket: {bucket}")]
    ObjectLockNotEnabled {
        /// The bucket name.
        bucket: String,
    },

    // -----------------------------------------------------------------------
    // Multipart upload errors
    // -----------------------------------------------------------------------
    /// The specified multipart upload does not exist.
    #[error("The specified upload does not exist: {upload_id}")]
    NoSuchUpload {
        /// The upload ID that was not found.
        upload_id: String,
    },

    /// A part named in the completion request has no stored bytes.
    #[error("Part {part_number} of upload {upload_id} is missing")]
    IncompletePart {
        /// The upload ID.
        upload_id: String,
        /// The missing part number.
        part_number: u32,
    },

    /// A part number is out of range or the part list is unusable.
    #[error("Invalid part: {message}")]
    InvalidPart {
        /// Description of the problem.
        message: String,
    },

    // -----------------------------------------------------------------------
    // Validation errors
    // -----------------------------------------------------------------------
    /// An argument provided is invalid.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// A tag key or value is invalid.
    #[error("Invalid tag: {message}")]
    InvalidTag {
        /// Description of the tag error.
        message: String,
    },

    /// The key is too long.
    #[error("Your key is too long")]
    KeyTooLong,

    // -----------------------------------------------------------------------
    // Infrastructure errors
    // -----------------------------------------------------------------------
    /// A filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The metadata index could not be reached or returned an error.
    #[error("Metadata index unavailable: {message}")]
    IndexUnavailable {
        /// The underlying failure.
        message: String,
    },

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StorageError {
    /// Return the S3 error code string for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSuchBucket { .. } => "NoSuchBucket",
            Self::BucketAlreadyExists { .. } => "BucketAlreadyOwnedByYou",
            Self::InvalidBucketName { .. } => "InvalidBucketName",
            Self::NoSuchKey { .. } => "NoSuchKey",
            Self::NoSuchVersion { .. } => "NoSuchVersion",
            Self::Locked { .. } => "AccessDenied",
            Self::Conflict { .. } => "OperationAborted",
            Self::ObjectLockNotEnabled { .. } => "InvalidRequest",
            Self::NoSuchUpload { .. } => "NoSuchUpload",
            Self::IncompletePart { .. } | Self::InvalidPart { .. } => "InvalidPart",
            Self::InvalidArgument { .. } => "InvalidArgument",
            Self::InvalidTag { .. } => "InvalidTag",
            Self::KeyTooLong => "KeyTooLongError",
            Self::IndexUnavailable { .. } => "ServiceUnavailable",
            Self::Io(_) | Self::Internal(_) => "InternalError",
        }
    }

    /// Whether this error means the addressed entity does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NoSuchBucket { .. }
                | Self::NoSuchKey { .. }
                | Self::NoSuchVersion { .. }
                | Self::NoSuchUpload { .. }
        ) || matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Whether read paths should fall back to direct filesystem inspection.
    #[must_use]
    pub fn is_index_unavailable(&self) -> bool {
        matches!(self, Self::IndexUnavailable { .. })
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::IndexUnavailable {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(anyhow::anyhow!("serialization failed: {err}"))
    }
}

/// Convenience result type for storage engine operations.
pub type StorageResult<T> = Result<T, StorageError>;
