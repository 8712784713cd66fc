//! Filesystem-backed S3 object storage engine for Stowage.
//!
//! The filesystem is the source of truth: every bucket is a directory and
//! every object version a file, so the tree can be browsed, backed up or
//! edited with ordinary tools. A sqlite metadata index answers listings,
//! lock checks and usage queries, and is kept in line with the tree by a
//! reconciliation worker.
//!
//! Supports versioning, object lock (legal hold, GOVERNANCE and COMPLIANCE
//! retention), soft delete with a trash mirror, multipart uploads,
//! lifecycle expiration, tagging, at-rest encryption and object events.
//!
//! # Architecture
//!
//! ```text
//! protocol layer (HTTP, RPC, CLI)
//!        |
//!        v
//! ObjectEngine (ops::*, workers::*)
//!        |
//!        +--> VersionStore / TrashStore / UploadStaging   (filesystem)
//!        +--> MetadataIndex (sqlite)                      (derived)
//!        +--> ListingCache, EventSink                     (injected)
//! ```

pub mod cache;
pub mod checksums;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod index;
pub mod multipart;
mod ops;
pub mod retention;
pub mod state;
pub mod storage;
pub mod trash;
pub mod utils;
pub mod validation;
pub mod workers;

pub use config::EngineConfig;
pub use engine::ObjectEngine;
pub use error::{StorageError, StorageResult};
pub use ops::stats::{BucketStats, StorageStats};
