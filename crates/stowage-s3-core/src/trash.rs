//! Trash mirror.
//!
//! Soft-deleted versions are renamed from the live tree into
//! `<data_dir>/.trash/<bucket>/<key>/<version-token>` and moved back on
//! restore. Folder placeholders are represented in the trash by an empty
//! marker file named `folder`. The `simple` slot is trashed as
//! `simple-<ns>`, one file per deletion, so overwriting and deleting a
//! non-versioned key again never replaces an earlier trashed copy.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::state::VersionId;
use crate::state::version::next_timestamp;
use crate::storage::Layout;

fn not_found(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound
}

/// Filesystem side of soft delete.
#[derive(Debug, Clone)]
pub struct TrashStore {
    layout: Layout,
}

impl TrashStore {
    /// A trash store rooted at the layout's trash directory.
    #[must_use]
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Whether trashed bytes exist for a version.
    pub async fn contains(&self, bucket: &str, key: &str, version: &VersionId) -> bool {
        fs::metadata(self.layout.trash_version_path(bucket, key, version))
            .await
            .is_ok_and(|m| m.is_file())
    }

    /// Newest trashed copy of a key's `simple` slot.
    pub async fn newest_simple(&self, bucket: &str, key: &str) -> io::Result<Option<VersionId>> {
        let mut entries = match fs::read_dir(self.layout.trash_key_dir(bucket, key)).await {
            Ok(entries) => entries,
            Err(e) if not_found(&e) || e.kind() == io::ErrorKind::NotADirectory => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let mut newest = None;
        while let Some(entry) = entries.next_entry().await? {
            let parsed: Option<VersionId> =
                entry.file_name().to_str().and_then(|n| n.parse().ok());
            if let Some(v @ VersionId::TrashedSimple(_)) = parsed {
                newest = newest.max(Some(v));
            }
        }
        Ok(newest)
    }

    /// Move a live version into the trash and return its trash identifier.
    ///
    /// The identifier equals `version` except for the `simple` slot, which
    /// gets a fresh [`VersionId::TrashedSimple`].
    pub async fn move_to_trash(
        &self,
        bucket: &str,
        key: &str,
        version: &VersionId,
    ) -> io::Result<VersionId> {
        let trash_id = match version {
            VersionId::NonVersioned => VersionId::TrashedSimple(next_timestamp()),
            other => *other,
        };
        let live = self.layout.version_path(bucket, key, version);
        let trashed = self.layout.trash_version_path(bucket, key, &trash_id);
        if let Some(parent) = trashed.parent() {
            fs::create_dir_all(parent).await?;
        }

        if *version == VersionId::FolderPlaceholder {
            fs::File::create(&trashed).await?;
            match fs::remove_dir(&live).await {
                Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {
                    debug!(bucket, key, "trashed folder still has children, keeping directory");
                }
                Err(e) if !not_found(&e) => return Err(e),
                _ => {}
            }
        } else {
            fs::rename(&live, &trashed).await?;
        }
        debug!(bucket, key, version = %version, trash_id = %trash_id, "moved version to trash");
        Ok(trash_id)
    }

    /// Move a trashed version back into its live slot.
    ///
    /// `version` is the trash identifier. Fails with `Conflict` when the
    /// live slot is occupied and with `NoSuchVersion` when nothing is in the
    /// trash.
    pub async fn restore(&self, bucket: &str, key: &str, version: &VersionId) -> StorageResult<()> {
        let trashed = self.layout.trash_version_path(bucket, key, version);
        if !fs::metadata(&trashed).await.is_ok_and(|m| m.is_file()) {
            return Err(StorageError::NoSuchVersion {
                key: key.to_owned(),
                version_id: version.token(),
            });
        }
        let slot = version.live_slot();
        let live = self.layout.version_path(bucket, key, &slot);
        let key_path = self.layout.key_path(bucket, key);

        match slot {
            VersionId::FolderPlaceholder => {
                fs::create_dir_all(&live).await?;
                fs::remove_file(&trashed).await?;
            }
            VersionId::LegacyFlatFile => {
                if fs::symlink_metadata(&key_path).await.is_ok() {
                    return Err(occupied(key, &slot));
                }
                if let Some(parent) = key_path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::rename(&trashed, &live).await?;
            }
            _ => {
                if fs::symlink_metadata(&key_path).await.is_ok_and(|m| m.is_file()) {
                    return Err(occupied(key, &slot));
                }
                if fs::symlink_metadata(&live).await.is_ok() {
                    return Err(occupied(key, &slot));
                }
                fs::create_dir_all(&key_path).await?;
                fs::rename(&trashed, &live).await?;
            }
        }
        self.prune(bucket, &trashed).await;
        debug!(bucket, key, version = %version, "restored version from trash");
        Ok(())
    }

    /// Remove trashed bytes. Missing bytes are not an error.
    pub async fn purge(&self, bucket: &str, key: &str, version: &VersionId) -> io::Result<()> {
        let trashed = self.layout.trash_version_path(bucket, key, version);
        match fs::remove_file(&trashed).await {
            Err(e) if !not_found(&e) => return Err(e),
            _ => {}
        }
        self.prune(bucket, &trashed).await;
        Ok(())
    }

    /// Remove a bucket's whole trash tree.
    pub async fn remove_bucket(&self, bucket: &str) -> io::Result<()> {
        match fs::remove_dir_all(self.layout.trash_bucket_dir(bucket)).await {
            Err(e) if !not_found(&e) => Err(e),
            _ => Ok(()),
        }
    }

    /// Remove empty trash directories above `path`, up to the bucket's trash root.
    async fn prune(&self, bucket: &str, path: &Path) {
        let stop = self.layout.trash_bucket_dir(bucket);
        let mut dir: Option<PathBuf> = path.parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if current == stop || !current.starts_with(&stop) {
                break;
            }
            if fs::remove_dir(&current).await.is_err() {
                break;
            }
            dir = current.parent().map(Path::to_path_buf);
        }
    }
}

fn occupied(key: &str, version: &VersionId) -> StorageError {
    StorageError::Conflict {
        message: format!("live slot for {key} version {version} is occupied"),
    }
}
