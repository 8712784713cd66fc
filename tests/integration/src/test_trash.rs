//! Soft delete and trash integration tests.

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use stowage_s3_core::events::ObjectEventKind;
    use stowage_s3_core::state::{CreateBucketOptions, DeleteOptions, SoftDeletePolicy};

    use crate::{Harness, put, read};

    async fn soft_delete_bucket(h: &Harness, name: &str, retention_days: u32) {
        h.engine
            .create_bucket(
                name,
                CreateBucketOptions {
                    versioning: true,
                    object_lock: false,
                },
            )
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        h.engine
            .set_soft_delete(
                name,
                SoftDeletePolicy {
                    enabled: true,
                    retention_days,
                },
            )
            .unwrap_or_else(|e| panic!("enable soft delete: {e}"));
    }

    #[tokio::test]
    async fn test_should_restore_trashed_object_after_restart() {
        let h = Harness::start().await;
        soft_delete_bucket(&h, "files", 30).await;
        let v = put(&h.engine, "files", "photos/cat.jpg", b"meow").await;

        let outcome = h
            .engine
            .delete_object("files", "photos/cat.jpg", DeleteOptions::default())
            .await
            .unwrap_or_else(|e| panic!("delete: {e}"));
        assert!(outcome.trashed);
        assert!(!h.path("files/photos").exists());
        assert!(
            h.path(&format!(".trash/files/photos/cat.jpg/{}", v.version_id))
                .is_file()
        );

        let stats = h
            .engine
            .bucket_stats("files")
            .await
            .unwrap_or_else(|e| panic!("stats: {e}"));
        assert_eq!(stats.usage.objects, 0);
        assert_eq!(stats.usage.trashed_versions, 1);
        assert_eq!(stats.usage.trashed_bytes, 4);

        let mut h = h.restart().await;
        let trashed = h
            .engine
            .list_trash(Some("files"))
            .unwrap_or_else(|e| panic!("list trash: {e}"));
        assert_eq!(trashed.len(), 1);
        assert_eq!(trashed[0].key, "photos/cat.jpg");

        let info = h
            .engine
            .restore_object("files", "photos/cat.jpg", v.version_id)
            .await
            .unwrap_or_else(|e| panic!("restore: {e}"));
        assert!(info.is_latest);
        assert_eq!(read(&h.engine, "files", "photos/cat.jpg", None).await, b"meow");
        assert!(
            h.engine
                .list_trash(Some("files"))
                .unwrap_or_else(|e| panic!("list trash: {e}"))
                .is_empty()
        );
        assert!(h.drain_events().contains(&ObjectEventKind::ObjectRestored));
    }

    #[tokio::test]
    async fn test_should_purge_trash_once_retention_lapses() {
        let mut h = Harness::start().await;
        soft_delete_bucket(&h, "files", 7).await;
        let v = put(&h.engine, "files", "old.log", b"0123456789").await;
        h.engine
            .delete_object("files", "old.log", DeleteOptions::default())
            .await
            .unwrap_or_else(|e| panic!("delete: {e}"));
        let _ = h.drain_events();

        let early = h
            .engine
            .run_trash_sweep(Utc::now() + Duration::days(6))
            .await
            .unwrap_or_else(|e| panic!("sweep: {e}"));
        assert_eq!(early.purged, 0);

        let due = h
            .engine
            .run_trash_sweep(Utc::now() + Duration::days(8))
            .await
            .unwrap_or_else(|e| panic!("sweep: {e}"));
        assert_eq!(due.purged, 1);
        assert_eq!(due.bytes, 10);
        assert!(
            !h.path(&format!(".trash/files/old.log/{}", v.version_id))
                .exists()
        );
        assert_eq!(h.drain_events(), vec![ObjectEventKind::ObjectPurged]);

        let stats = h
            .engine
            .stats()
            .await
            .unwrap_or_else(|e| panic!("stats: {e}"));
        assert_eq!(stats.usage.trashed_versions, 0);
    }

    #[tokio::test]
    async fn test_should_empty_trash_across_buckets() {
        let h = Harness::start().await;
        soft_delete_bucket(&h, "alpha", 30).await;
        soft_delete_bucket(&h, "bravo", 30).await;
        for bucket in ["alpha", "bravo"] {
            put(&h.engine, bucket, "k", b"v").await;
            h.engine
                .delete_object(bucket, "k", DeleteOptions::default())
                .await
                .unwrap_or_else(|e| panic!("delete: {e}"));
        }

        let purged = h
            .engine
            .empty_trash(None)
            .await
            .unwrap_or_else(|e| panic!("empty trash: {e}"));
        assert_eq!(purged, 2);
        assert!(
            h.engine
                .list_trash(None)
                .unwrap_or_else(|e| panic!("list trash: {e}"))
                .is_empty()
        );
    }
}
