//! On-disk layout.
//!
//! ```text
//! <root>/<bucket>/<key>/.latest            pointer file (versioned keys)
//! <root>/<bucket>/<key>/<timestamp>         one file per version
//! <root>/<bucket>/<key>/simple              non-versioned object body
//! <root>/<bucket>/<key>                     plain file = legacy object
//! <root>/<bucket>/<key>/  (empty dir)       folder placeholder
//! <root>/.trash/<bucket>/<key>/<version>    trash mirror (`simple-<ns>` for
//!                                          trashed non-versioned bodies)
//! <root>/.uploads/<upload_id>/              multipart staging
//! <root>/.stowage/                          index, master key, temp files
//! ```
//!
//! Names starting with `.` are reserved; discovery never treats them as
//! buckets, key segments or versions.

use std::path::{Component, Path, PathBuf};

use crate::config::SYSTEM_DIR_NAME;
use crate::state::VersionId;

/// Pointer file naming the latest version of a versioned key.
pub const POINTER_FILE: &str = ".latest";
/// Trash mirror directory under the data root.
pub const TRASH_DIR: &str = ".trash";
/// Multipart staging directory under the data root.
pub const UPLOADS_DIR: &str = ".uploads";
/// Multipart manifest file name inside a staging directory.
pub const MANIFEST_FILE: &str = "upload.json";

/// Whether a directory entry name is reserved for the engine.
#[must_use]
pub fn is_reserved_name(name: &str) -> bool {
    name.starts_with('.')
}

/// Path arithmetic over a data root.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Create a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Engine-private directory.
    #[must_use]
    pub fn system_dir(&self) -> PathBuf {
        self.root.join(SYSTEM_DIR_NAME)
    }

    /// Scratch directory for in-flight writes. Same filesystem as the data.
    #[must_use]
    pub fn tmp_dir(&self) -> PathBuf {
        self.system_dir().join("tmp")
    }

    /// Persisted master key.
    #[must_use]
    pub fn master_key_path(&self) -> PathBuf {
        self.system_dir().join("master.key")
    }

    // -----------------------------------------------------------------------
    // Live tree
    // -----------------------------------------------------------------------

    /// Directory of a bucket.
    #[must_use]
    pub fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    /// Path a key maps to: its directory, or its legacy flat file.
    #[must_use]
    pub fn key_path(&self, bucket: &str, key: &str) -> PathBuf {
        join_key(self.bucket_dir(bucket), key)
    }

    /// Pointer file of a key.
    #[must_use]
    pub fn pointer_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.key_path(bucket, key).join(POINTER_FILE)
    }

    /// Live path of a version.
    #[must_use]
    pub fn version_path(&self, bucket: &str, key: &str, version: &VersionId) -> PathBuf {
        match version {
            VersionId::LegacyFlatFile | VersionId::FolderPlaceholder => self.key_path(bucket, key),
            other => self.key_path(bucket, key).join(other.token()),
        }
    }

    // -----------------------------------------------------------------------
    // Trash mirror
    // -----------------------------------------------------------------------

    /// Root of the trash mirror.
    #[must_use]
    pub fn trash_root(&self) -> PathBuf {
        self.root.join(TRASH_DIR)
    }

    /// Trash directory of a bucket.
    #[must_use]
    pub fn trash_bucket_dir(&self, bucket: &str) -> PathBuf {
        self.trash_root().join(bucket)
    }

    /// Trash directory of a key.
    #[must_use]
    pub fn trash_key_dir(&self, bucket: &str, key: &str) -> PathBuf {
        join_key(self.trash_bucket_dir(bucket), key)
    }

    /// Trash path of a version. Sentinels keep their token as file name.
    #[must_use]
    pub fn trash_version_path(&self, bucket: &str, key: &str, version: &VersionId) -> PathBuf {
        self.trash_key_dir(bucket, key).join(version.token())
    }

    // -----------------------------------------------------------------------
    // Multipart staging
    // -----------------------------------------------------------------------

    /// Root of multipart staging.
    #[must_use]
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    /// Staging directory of one upload.
    #[must_use]
    pub fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.uploads_dir().join(upload_id)
    }

    /// Manifest of one upload.
    #[must_use]
    pub fn manifest_path(&self, upload_id: &str) -> PathBuf {
        self.upload_dir(upload_id).join(MANIFEST_FILE)
    }

    /// Staged bytes of one part.
    #[must_use]
    pub fn part_path(&self, upload_id: &str, part_number: u32) -> PathBuf {
        self.upload_dir(upload_id)
            .join(format!("part-{part_number}"))
    }

    // -----------------------------------------------------------------------
    // Reverse mapping
    // -----------------------------------------------------------------------

    /// Bucket owning a live-tree path, or `None` for reserved or foreign paths.
    #[must_use]
    pub fn bucket_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        match relative.components().next()? {
            Component::Normal(name) => {
                let name = name.to_str()?;
                (!is_reserved_name(name)).then(|| name.to_owned())
            }
            _ => None,
        }
    }

    /// Key for a path relative to a bucket directory.
    #[must_use]
    pub fn key_from_relative(relative: &Path) -> Option<String> {
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(name) => segments.push(name.to_str()?.to_owned()),
                _ => return None,
            }
        }
        (!segments.is_empty()).then(|| segments.join("/"))
    }
}

fn join_key(mut base: PathBuf, key: &str) -> PathBuf {
    for segment in key.trim_end_matches('/').split('/') {
        base.push(segment);
    }
    base
}
