//! Physical storage: directory layout, version files and encryption.

pub mod crypto;
pub mod layout;
pub mod version_store;

pub use crypto::MasterKey;
pub use layout::Layout;
pub use version_store::{
    BucketScan, COPY_BUFFER_SIZE, CommittedVersion, ObjectBody, PointerRepair, PointerState,
    ScannedObject, VersionStat, VersionStore, VersionWriter,
};
