//! Trash handlers.
//!
//! Implements `list_trash`, `restore_object`, `purge_trashed` and
//! `empty_trash`. Trashed versions are found through the index; the bytes
//! live in the trash mirror managed by [`crate::trash::TrashStore`].

use tracing::{debug, info};

use crate::engine::ObjectEngine;
use crate::error::{StorageError, StorageResult};
use crate::events::ObjectEventKind;
use crate::state::{ObjectInfo, VersionId, VersionRecord};
use crate::validation::validate_object_key;

impl ObjectEngine {
    /// Trashed versions, optionally restricted to one bucket.
    pub fn list_trash(&self, bucket: Option<&str>) -> StorageResult<Vec<VersionRecord>> {
        if let Some(name) = bucket {
            self.bucket(name)?;
        }
        self.index.list_trashed(bucket)
    }

    /// Move a trashed version back into the live tree.
    ///
    /// `version` is the identifier listed by [`Self::list_trash`]; `simple`
    /// addresses the most recently trashed non-versioned copy. The pointer
    /// is moved to the restored version when it is newer than the current
    /// latest. Fails with `Conflict` when the live slot has been reused
    /// since the delete.
    pub async fn restore_object(
        &self,
        bucket: &str,
        key: &str,
        version: VersionId,
    ) -> StorageResult<ObjectInfo> {
        self.bucket(bucket)?;
        validate_object_key(key)?;
        let trash_id = self.trashed_id(bucket, key, version).await?;
        let version = trash_id.live_slot();
        let current = self.store.resolve_latest(bucket, key).await?;
        self.trash.restore(bucket, key, &trash_id).await?;

        if let VersionId::Timestamp(restored) = version {
            let newer = match current {
                None => true,
                Some(VersionId::Timestamp(latest)) => restored > latest,
                Some(_) => false,
            };
            if newer {
                self.store.write_pointer(bucket, key, &version).await?;
            }
        }

        let marked = match self
            .index
            .rekey_version(bucket, key, &trash_id, &version, None)
        {
            Ok(true) => Ok(()),
            Ok(false) => match self.store.stat(bucket, key, &version).await? {
                Some(stat) => {
                    let mut record = VersionRecord::new(
                        bucket,
                        key,
                        version,
                        stat.size,
                        stat.last_modified,
                    );
                    record.encryption = stat.encryption;
                    self.index.upsert_version(&record)
                }
                None => Ok(()),
            },
            Err(e) => Err(e),
        };
        self.defer_index(marked, bucket, key);
        self.refresh_latest(bucket, key).await;
        self.invalidate(bucket);

        let info = self.head_object(bucket, key, Some(&version)).await?;
        self.emit(ObjectEventKind::ObjectRestored, bucket, key, version, info.size);
        info!(bucket, key, version = %version, "restored object version");
        Ok(info)
    }

    /// Permanently remove one trashed version.
    pub async fn purge_trashed(
        &self,
        bucket: &str,
        key: &str,
        version: VersionId,
    ) -> StorageResult<()> {
        self.bucket(bucket)?;
        validate_object_key(key)?;
        let version = self.trashed_id(bucket, key, version).await?;
        let record = self
            .index
            .get_version(bucket, key, &version)?
            .filter(VersionRecord::is_trashed);
        if record.is_none() && !self.trash.contains(bucket, key, &version).await {
            return Err(StorageError::NoSuchVersion {
                key: key.to_owned(),
                version_id: version.token(),
            });
        }
        let size = record.map_or(0, |r| r.size);
        self.purge_version(bucket, key, version, size).await
    }

    /// Purge every trashed version, optionally in one bucket. Returns the
    /// number purged.
    pub async fn empty_trash(&self, bucket: Option<&str>) -> StorageResult<usize> {
        let records = self.list_trash(bucket)?;
        for record in &records {
            self.purge_version(&record.bucket, &record.key, record.version_id, record.size)
                .await?;
        }
        info!(bucket = bucket.unwrap_or("*"), purged = records.len(), "emptied trash");
        Ok(records.len())
    }

    /// The trash identifier a caller-supplied version addresses.
    async fn trashed_id(
        &self,
        bucket: &str,
        key: &str,
        version: VersionId,
    ) -> StorageResult<VersionId> {
        if version != VersionId::NonVersioned {
            return Ok(version);
        }
        Ok(self
            .trash
            .newest_simple(bucket, key)
            .await?
            .unwrap_or(version))
    }

    /// Remove trashed bytes and the index row, then announce it.
    pub(crate) async fn purge_version(
        &self,
        bucket: &str,
        key: &str,
        version: VersionId,
        size: u64,
    ) -> StorageResult<()> {
        self.trash.purge(bucket, key, &version).await?;
        self.defer_index(self.index.delete_version(bucket, key, &version), bucket, key);
        self.emit(ObjectEventKind::ObjectPurged, bucket, key, version, size);
        debug!(bucket, key, version = %version, "purged trashed version");
        Ok(())
    }
}
