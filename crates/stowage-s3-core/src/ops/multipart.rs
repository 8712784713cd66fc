//! Multipart upload handlers.
//!
//! Implements `create_multipart_upload`, `upload_part`,
//! `complete_multipart_upload`, `abort_multipart_upload`, `list_parts` and
//! `list_multipart_uploads`. The staging directory is authoritative; the
//! index answers listings when it is available.

use chrono::Utc;
use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::checksums::composite_etag;
use crate::engine::ObjectEngine;
use crate::error::{StorageError, StorageResult};
use crate::events::ObjectEventKind;
use crate::multipart::order_parts;
use crate::state::{
    CompletedPart, EncryptionAlgorithm, MultipartUpload, PartRecord, PutOptions, PutOutcome,
};
use crate::utils::generate_upload_id;
use crate::validation::{is_folder_key, validate_object_key, validate_upload_id};

impl ObjectEngine {
    /// Start a multipart upload to `bucket`/`key`.
    pub async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        encryption: Option<EncryptionAlgorithm>,
    ) -> StorageResult<MultipartUpload> {
        self.bucket(bucket)?;
        validate_object_key(key)?;
        if is_folder_key(key) {
            return Err(StorageError::InvalidArgument {
                message: format!("cannot upload parts to folder key {key}"),
            });
        }
        let upload = MultipartUpload {
            upload_id: generate_upload_id(),
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            encryption,
            initiated: Utc::now(),
        };
        self.staging.create(&upload).await?;
        self.defer_index(self.index.insert_upload(&upload), bucket, key);
        info!(bucket, key, upload_id = %upload.upload_id, "created multipart upload");
        Ok(upload)
    }

    /// Upload (or replace) one part.
    pub async fn upload_part<R>(
        &self,
        upload_id: &str,
        part_number: u32,
        reader: &mut R,
    ) -> StorageResult<PartRecord>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let upload = self.find_upload(upload_id).await?;
        let part = self
            .staging
            .write_part(upload_id, part_number, reader)
            .await?;
        self.defer_index(
            self.index.record_part(upload_id, &part),
            &upload.bucket,
            &upload.key,
        );
        debug!(upload_id, part_number, size = part.size, "stored part");
        Ok(part)
    }

    /// Assemble the named parts into a new object version.
    ///
    /// Parts are concatenated in ascending part-number order. The etag is
    /// the composite `<md5 of part digests>-<count>`.
    pub async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<PutOutcome> {
        let upload = self.find_upload(upload_id).await?;
        let config = self.bucket(&upload.bucket)?;
        let ordered = order_parts(upload_id, parts)?;
        self.staging.check_parts(upload_id, &ordered).await?;
        self.guard_overwrite(&config, &upload.key, false).await?;

        let mut writer = self
            .store
            .begin_write(
                &upload.bucket,
                &upload.key,
                config.versioning_enabled,
                upload.encryption,
            )
            .await?;
        let digests = match self
            .staging
            .assemble(upload_id, &ordered, &mut writer)
            .await
        {
            Ok(digests) => digests,
            Err(e) => {
                writer.abort().await;
                return Err(e);
            }
        };
        let committed = writer.commit().await?;
        let etag = composite_etag(&digests);

        let outcome = self
            .record_write(
                &config,
                &upload.key,
                committed,
                etag,
                &PutOptions::default(),
                ObjectEventKind::MultipartCompleted,
            )
            .await;
        self.staging.remove(upload_id).await?;
        self.defer_index(
            self.index.delete_upload(upload_id),
            &upload.bucket,
            &upload.key,
        );
        info!(
            bucket = %upload.bucket,
            key = %upload.key,
            upload_id,
            parts = ordered.len(),
            size = outcome.size,
            "completed multipart upload"
        );
        Ok(outcome)
    }

    /// Discard an upload and its parts. Unknown uploads are ignored.
    pub async fn abort_multipart_upload(&self, upload_id: &str) -> StorageResult<()> {
        validate_upload_id(upload_id)?;
        self.staging.remove(upload_id).await?;
        if let Err(e) = self.index.delete_upload(upload_id) {
            debug!(upload_id, error = %e, "abort left an index row for the next sync");
        }
        info!(upload_id, "aborted multipart upload");
        Ok(())
    }

    /// Parts uploaded so far, sorted by part number.
    pub async fn list_parts(&self, upload_id: &str) -> StorageResult<Vec<PartRecord>> {
        self.find_upload(upload_id).await?;
        match self.index.list_parts(upload_id) {
            Ok(parts) => Ok(parts),
            Err(e) => {
                debug!(upload_id, error = %e, "listing parts from staging");
                self.staging.parts_on_disk(upload_id).await
            }
        }
    }

    /// In-progress uploads targeting a bucket, oldest first.
    pub async fn list_multipart_uploads(&self, bucket: &str) -> StorageResult<Vec<MultipartUpload>> {
        self.bucket(bucket)?;
        match self.index.list_uploads(bucket) {
            Ok(uploads) => Ok(uploads),
            Err(e) => {
                debug!(bucket, error = %e, "listing uploads from staging");
                Ok(self
                    .staging
                    .manifests()
                    .await?
                    .into_iter()
                    .filter(|u| u.bucket == bucket)
                    .collect())
            }
        }
    }

    /// An upload whose staging manifest still exists.
    ///
    /// Index rows without a manifest are stale and dropped on sight.
    async fn find_upload(&self, upload_id: &str) -> StorageResult<MultipartUpload> {
        validate_upload_id(upload_id)?;
        if let Some(upload) = self.staging.manifest(upload_id).await? {
            return Ok(upload);
        }
        if let Ok(Some(stale)) = self.index.get_upload(upload_id) {
            debug!(upload_id, bucket = %stale.bucket, "dropping upload row without staging");
            self.defer_index(self.index.delete_upload(upload_id), &stale.bucket, &stale.key);
        }
        Err(StorageError::NoSuchUpload {
            upload_id: upload_id.to_owned(),
        })
    }
}
