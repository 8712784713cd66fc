//! Engine data model.
//!
//! Buckets, versions, locks and multipart uploads, shared by the index,
//! the version store and the operation handlers.

pub mod bucket;
pub mod multipart;
pub mod object;
pub mod registry;
pub mod version;

pub use bucket::{
    BucketConfig, BucketSummary, CorsRule, CreateBucketOptions, DefaultRetention,
    LifecycleConfiguration, LifecycleRule, ObjectLockConfig, RuleStatus, SoftDeletePolicy,
    WebsiteConfig,
};
pub use multipart::{CompletedPart, MultipartUpload, PartRecord};
pub use object::{
    DeleteOptions, DeleteOutcome, EncryptionAlgorithm, ListObjectsResult, ListQuery, LockMode,
    LockState, ObjectInfo, ObjectSummary, PutOptions, PutOutcome, Retention, VersionRecord,
};
pub use registry::BucketRegistry;
pub use version::VersionId;
