//! Multipart upload integration tests.

#[cfg(test)]
mod tests {
    use stowage_s3_core::StorageError;
    use stowage_s3_core::events::ObjectEventKind;
    use stowage_s3_core::state::{CompletedPart, CreateBucketOptions, EncryptionAlgorithm};
    use stowage_s3_core::storage::crypto::is_encrypted_header;

    use crate::{Harness, read};

    async fn upload_part(h: &Harness, upload_id: &str, part_number: u32, mut body: &[u8]) {
        h.engine
            .upload_part(upload_id, part_number, &mut body)
            .await
            .unwrap_or_else(|e| panic!("upload part {part_number}: {e}"));
    }

    #[tokio::test]
    async fn test_should_assemble_encrypted_upload_from_parts() {
        let mut h = Harness::start().await;
        h.engine
            .create_bucket("media", CreateBucketOptions::default())
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        let upload = h
            .engine
            .create_multipart_upload("media", "video.bin", Some(EncryptionAlgorithm::Aes256Gcm))
            .await
            .unwrap_or_else(|e| panic!("create upload: {e}"));

        upload_part(&h, &upload.upload_id, 2, b"-tail").await;
        upload_part(&h, &upload.upload_id, 1, b"head").await;

        let listed = h
            .engine
            .list_multipart_uploads("media")
            .await
            .unwrap_or_else(|e| panic!("list uploads: {e}"));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].upload_id, upload.upload_id);

        let outcome = h
            .engine
            .complete_multipart_upload(
                &upload.upload_id,
                &[CompletedPart::new(2), CompletedPart::new(1)],
            )
            .await
            .unwrap_or_else(|e| panic!("complete: {e}"));
        assert!(outcome.etag.ends_with("-2"));
        assert_eq!(outcome.size, 9);

        assert_eq!(read(&h.engine, "media", "video.bin", None).await, b"head-tail");
        let raw = std::fs::read(h.engine.layout().version_path(
            "media",
            "video.bin",
            &outcome.version_id,
        ))
        .unwrap_or_else(|e| panic!("read raw version: {e}"));
        assert!(is_encrypted_header(&raw));

        assert!(!h.engine.layout().upload_dir(&upload.upload_id).exists());
        assert!(
            h.engine
                .list_multipart_uploads("media")
                .await
                .unwrap_or_else(|e| panic!("list uploads: {e}"))
                .is_empty()
        );
        assert!(h.drain_events().contains(&ObjectEventKind::MultipartCompleted));
    }

    #[tokio::test]
    async fn test_should_resume_upload_after_restart() {
        let h = Harness::start().await;
        h.engine
            .create_bucket("media", CreateBucketOptions::default())
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        let upload = h
            .engine
            .create_multipart_upload("media", "big.dat", None)
            .await
            .unwrap_or_else(|e| panic!("create upload: {e}"));
        upload_part(&h, &upload.upload_id, 1, b"first ").await;

        let h = h.restart().await;
        let parts = h
            .engine
            .list_parts(&upload.upload_id)
            .await
            .unwrap_or_else(|e| panic!("list parts: {e}"));
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].part_number, 1);
        assert_eq!(parts[0].size, 6);

        upload_part(&h, &upload.upload_id, 2, b"second").await;
        h.engine
            .complete_multipart_upload(
                &upload.upload_id,
                &[CompletedPart::new(1), CompletedPart::new(2)],
            )
            .await
            .unwrap_or_else(|e| panic!("complete: {e}"));
        assert_eq!(read(&h.engine, "media", "big.dat", None).await, b"first second");
    }

    #[tokio::test]
    async fn test_should_discard_aborted_upload_and_its_parts() {
        let h = Harness::start().await;
        h.engine
            .create_bucket("media", CreateBucketOptions::default())
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        let upload = h
            .engine
            .create_multipart_upload("media", "gone.dat", None)
            .await
            .unwrap_or_else(|e| panic!("create upload: {e}"));
        upload_part(&h, &upload.upload_id, 1, b"bytes").await;

        h.engine
            .abort_multipart_upload(&upload.upload_id)
            .await
            .unwrap_or_else(|e| panic!("abort: {e}"));
        h.engine
            .abort_multipart_upload(&upload.upload_id)
            .await
            .unwrap_or_else(|e| panic!("second abort: {e}"));

        let err = h
            .engine
            .complete_multipart_upload(&upload.upload_id, &[CompletedPart::new(1)])
            .await
            .err()
            .unwrap_or_else(|| panic!("complete after abort should fail"));
        assert!(matches!(err, StorageError::NoSuchUpload { .. }));
        assert!(
            h.engine
                .head_object("media", "gone.dat", None)
                .await
                .is_err()
        );
    }
}
