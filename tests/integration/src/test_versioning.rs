//! Versioning integration tests.

#[cfg(test)]
mod tests {
    use stowage_s3_core::StorageError;
    use stowage_s3_core::events::ObjectEventKind;
    use stowage_s3_core::state::{CreateBucketOptions, DeleteOptions, ListQuery};

    use crate::{Harness, put, read};

    const VERSIONED: CreateBucketOptions = CreateBucketOptions {
        versioning: true,
        object_lock: false,
    };

    #[tokio::test]
    async fn test_should_keep_version_history_across_restart() {
        let h = Harness::start().await;
        h.engine
            .create_bucket("docs", VERSIONED)
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        let v1 = put(&h.engine, "docs", "report.txt", b"draft").await;
        let v2 = put(&h.engine, "docs", "report.txt", b"final").await;
        assert_ne!(v1.version_id, v2.version_id);

        let h = h.restart().await;
        assert!(h.engine.bucket_exists("docs"));
        let versions = h
            .engine
            .list_versions("docs", "report.txt")
            .await
            .unwrap_or_else(|e| panic!("list versions: {e}"));
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version_id, v2.version_id);
        assert!(versions[0].is_latest);
        assert!(!versions[1].is_latest);
        assert_eq!(versions[1].etag.as_deref(), Some(v1.etag.as_str()));

        assert_eq!(read(&h.engine, "docs", "report.txt", None).await, b"final");
        assert_eq!(
            read(&h.engine, "docs", "report.txt", Some(&v1.version_id)).await,
            b"draft"
        );
    }

    #[tokio::test]
    async fn test_should_serve_unversioned_write_after_suspending_versioning() {
        let h = Harness::start().await;
        h.engine
            .create_bucket("docs", VERSIONED)
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        put(&h.engine, "docs", "a.txt", b"one").await;
        put(&h.engine, "docs", "a.txt", b"two").await;

        h.engine
            .set_versioning("docs", false)
            .unwrap_or_else(|e| panic!("suspend versioning: {e}"));
        put(&h.engine, "docs", "a.txt", b"three").await;

        assert_eq!(read(&h.engine, "docs", "a.txt", None).await, b"three");
        let versions = h
            .engine
            .list_versions("docs", "a.txt")
            .await
            .unwrap_or_else(|e| panic!("list versions: {e}"));
        assert_eq!(versions.len(), 3);
        assert_eq!(versions.iter().filter(|v| v.is_latest).count(), 1);
    }

    #[tokio::test]
    async fn test_should_delete_every_version_without_version_id() {
        let mut h = Harness::start().await;
        h.engine
            .create_bucket("docs", VERSIONED)
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        put(&h.engine, "docs", "dir/a.txt", b"1").await;
        put(&h.engine, "docs", "dir/a.txt", b"2").await;
        put(&h.engine, "docs", "dir/b.txt", b"3").await;

        let outcome = h
            .engine
            .delete_object("docs", "dir/a.txt", DeleteOptions::default())
            .await
            .unwrap_or_else(|e| panic!("delete: {e}"));
        assert_eq!(outcome.removed.len(), 2);
        assert!(!outcome.trashed);

        let err = h
            .engine
            .head_object("docs", "dir/a.txt", None)
            .await
            .err()
            .unwrap_or_else(|| panic!("object should be gone"));
        assert!(matches!(err, StorageError::NoSuchKey { .. }));

        let listing = h
            .engine
            .list_objects("docs", &ListQuery::default())
            .await
            .unwrap_or_else(|e| panic!("list: {e}"));
        let keys: Vec<_> = listing.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["dir/b.txt"]);

        let kinds = h.drain_events();
        assert_eq!(
            kinds
                .iter()
                .filter(|k| **k == ObjectEventKind::ObjectRemoved)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_should_promote_previous_version_when_latest_deleted() {
        let h = Harness::start().await;
        h.engine
            .create_bucket("docs", VERSIONED)
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        let v1 = put(&h.engine, "docs", "k", b"old").await;
        let v2 = put(&h.engine, "docs", "k", b"new").await;

        h.engine
            .delete_object(
                "docs",
                "k",
                DeleteOptions {
                    version_id: Some(v2.version_id),
                    bypass_governance: false,
                },
            )
            .await
            .unwrap_or_else(|e| panic!("delete latest: {e}"));

        let info = h
            .engine
            .head_object("docs", "k", None)
            .await
            .unwrap_or_else(|e| panic!("head: {e}"));
        assert_eq!(info.version_id, v1.version_id);
        assert!(info.is_latest);
        assert_eq!(read(&h.engine, "docs", "k", None).await, b"old");
    }
}
