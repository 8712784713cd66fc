//! Walkthroughs of whole user stories, one engine call at a time.

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use stowage_s3_core::StorageError;
    use stowage_s3_core::state::{
        CreateBucketOptions, DeleteOptions, SoftDeletePolicy, VersionId,
    };

    use crate::{Harness, put, read};

    const VERSIONED: CreateBucketOptions = CreateBucketOptions {
        versioning: true,
        object_lock: false,
    };

    #[tokio::test]
    async fn test_should_serve_each_version_of_a_versioned_key() {
        let h = Harness::start().await;
        h.engine
            .create_bucket("b1", VERSIONED)
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));

        let t1 = put(&h.engine, "b1", "a.txt", b"v1").await.version_id;
        let t2 = put(&h.engine, "b1", "a.txt", b"v2").await.version_id;

        assert_eq!(read(&h.engine, "b1", "a.txt", None).await, b"v2");
        assert_eq!(read(&h.engine, "b1", "a.txt", Some(&t1)).await, b"v1");
        let versions: Vec<VersionId> = h
            .engine
            .list_versions("b1", "a.txt")
            .await
            .unwrap_or_else(|e| panic!("list versions: {e}"))
            .into_iter()
            .map(|info| info.version_id)
            .collect();
        assert_eq!(versions, vec![t2, t1]);
    }

    #[tokio::test]
    async fn test_should_purge_zero_day_trash_and_refuse_restore() {
        let h = Harness::start().await;
        h.engine
            .create_bucket("b2", CreateBucketOptions::default())
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        h.engine
            .set_soft_delete(
                "b2",
                SoftDeletePolicy {
                    enabled: true,
                    retention_days: 0,
                },
            )
            .unwrap_or_else(|e| panic!("enable soft delete: {e}"));

        put(&h.engine, "b2", "a.txt", b"gone soon").await;
        let outcome = h
            .engine
            .delete_object("b2", "a.txt", DeleteOptions::default())
            .await
            .unwrap_or_else(|e| panic!("delete: {e}"));
        assert!(outcome.trashed);
        assert_eq!(
            h.engine
                .list_trash(Some("b2"))
                .unwrap_or_else(|e| panic!("list trash: {e}"))
                .len(),
            1
        );

        let swept = h
            .engine
            .run_trash_sweep(Utc::now())
            .await
            .unwrap_or_else(|e| panic!("sweep: {e}"));
        assert_eq!(swept.purged, 1);

        let restored = h
            .engine
            .restore_object("b2", "a.txt", VersionId::NonVersioned)
            .await;
        assert!(matches!(restored, Err(StorageError::NoSuchVersion { .. })));
    }

    #[tokio::test]
    async fn test_should_promote_survivor_when_latest_bytes_vanish() {
        let h = Harness::start().await;
        h.engine
            .create_bucket("b3", VERSIONED)
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        let t1 = put(&h.engine, "b3", "a.txt", b"v1").await.version_id;
        let t2 = put(&h.engine, "b3", "a.txt", b"v2").await.version_id;

        std::fs::remove_file(h.path(&format!("b3/a.txt/{t2}")))
            .unwrap_or_else(|e| panic!("remove latest: {e}"));
        h.engine
            .reconcile_all()
            .await
            .unwrap_or_else(|e| panic!("sync: {e}"));

        assert_eq!(read(&h.engine, "b3", "a.txt", None).await, b"v1");
        let head = h
            .engine
            .head_object("b3", "a.txt", None)
            .await
            .unwrap_or_else(|e| panic!("head: {e}"));
        assert_eq!(head.version_id, t1);
        assert!(head.is_latest);
    }
}
