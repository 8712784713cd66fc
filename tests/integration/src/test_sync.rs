//! Filesystem reconciliation integration tests.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stowage_s3_core::index::MetadataIndex;
    use stowage_s3_core::state::{CreateBucketOptions, ListQuery, VersionId};
    use stowage_s3_core::workers::{FsWatcher, SyncWorker};

    use crate::{Harness, put, read};

    const VERSIONED: CreateBucketOptions = CreateBucketOptions {
        versioning: true,
        object_lock: false,
    };

    fn write_external(h: &Harness, relative: &str, body: &[u8]) {
        let path = h.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap_or_else(|e| panic!("mkdir: {e}"));
        }
        std::fs::write(&path, body).unwrap_or_else(|e| panic!("write {relative}: {e}"));
    }

    #[tokio::test]
    async fn test_should_adopt_bucket_dropped_into_data_dir() {
        let h = Harness::start().await;
        write_external(&h, "imports/2024/report.pdf", b"%PDF-1.7");
        write_external(&h, "imports/readme.txt", b"hi");

        let first = h
            .engine
            .reconcile_all()
            .await
            .unwrap_or_else(|e| panic!("sync: {e}"));
        assert_eq!(first.buckets_registered, 1);
        assert_eq!(first.inserted, 2);
        assert!(h.engine.bucket_exists("imports"));

        let listing = h
            .engine
            .list_objects("imports", &ListQuery::default())
            .await
            .unwrap_or_else(|e| panic!("list: {e}"));
        let keys: Vec<_> = listing.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["2024/report.pdf", "readme.txt"]);
        assert_eq!(
            read(&h.engine, "imports", "2024/report.pdf", None).await,
            b"%PDF-1.7"
        );

        let second = h
            .engine
            .reconcile_all()
            .await
            .unwrap_or_else(|e| panic!("sync: {e}"));
        assert_eq!(second.mutations(), 0);

        let h = h.restart().await;
        assert!(h.engine.bucket_exists("imports"));
    }

    #[tokio::test]
    async fn test_should_forget_objects_removed_outside_the_engine() {
        let h = Harness::start().await;
        h.engine
            .create_bucket("docs", VERSIONED)
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        let v = put(&h.engine, "docs", "notes/todo.md", b"- ship").await;
        put(&h.engine, "docs", "keep.md", b"stay").await;

        std::fs::remove_dir_all(h.path("docs/notes")).unwrap_or_else(|e| panic!("rm: {e}"));
        let stats = h
            .engine
            .reconcile_bucket("docs")
            .await
            .unwrap_or_else(|e| panic!("sync: {e}"));
        assert_eq!(stats.orphans_pruned, 1);
        assert!(
            h.engine
                .index()
                .get_version("docs", "notes/todo.md", &v.version_id)
                .unwrap_or_else(|e| panic!("index: {e}"))
                .is_none()
        );

        let listing = h
            .engine
            .list_objects("docs", &ListQuery::default())
            .await
            .unwrap_or_else(|e| panic!("list: {e}"));
        let keys: Vec<_> = listing.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["keep.md"]);
        let usage = h
            .engine
            .bucket_stats("docs")
            .await
            .unwrap_or_else(|e| panic!("stats: {e}"))
            .usage;
        assert_eq!(usage.objects, 1);
        assert_eq!(usage.bytes, 4);
    }

    #[tokio::test]
    async fn test_should_repair_dangling_latest_pointer() {
        let h = Harness::start().await;
        h.engine
            .create_bucket("docs", VERSIONED)
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        let v1 = put(&h.engine, "docs", "k", b"first").await;
        let v2 = put(&h.engine, "docs", "k", b"second").await;

        let layout = h.engine.layout();
        std::fs::remove_file(layout.version_path("docs", "k", &v2.version_id))
            .unwrap_or_else(|e| panic!("rm: {e}"));

        let stats = h
            .engine
            .reconcile_bucket("docs")
            .await
            .unwrap_or_else(|e| panic!("sync: {e}"));
        assert_eq!(stats.pointers_repaired, 1);
        assert_eq!(stats.orphans_pruned, 1);
        let pointer = std::fs::read_to_string(layout.pointer_path("docs", "k"))
            .unwrap_or_else(|e| panic!("read pointer: {e}"));
        assert_eq!(pointer.trim(), v1.version_id.token());

        let row = h
            .engine
            .index()
            .get_version("docs", "k", &v1.version_id)
            .unwrap_or_else(|e| panic!("index: {e}"))
            .unwrap_or_else(|| panic!("row for surviving version"));
        assert!(row.is_latest);
        assert_eq!(read(&h.engine, "docs", "k", None).await, b"first");

        let again = h
            .engine
            .reconcile_bucket("docs")
            .await
            .unwrap_or_else(|e| panic!("sync: {e}"));
        assert_eq!(again.mutations(), 0);
    }

    #[tokio::test]
    async fn test_should_reconcile_watched_changes_in_background() {
        let h = Harness::start().await;
        let (watcher, changes) =
            FsWatcher::start(h.engine.layout()).unwrap_or_else(|e| panic!("watch: {e}"));
        let worker = SyncWorker::new(h.engine.clone())
            .with_changes(changes)
            .spawn();

        tokio::time::sleep(Duration::from_millis(200)).await;
        write_external(&h, "inbox/letter.txt", b"dear reader");

        let indexed = async {
            loop {
                let row = h
                    .engine
                    .index()
                    .get_version("inbox", "letter.txt", &VersionId::LegacyFlatFile)
                    .ok()
                    .flatten();
                if h.engine.bucket_exists("inbox") && row.is_some() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), indexed)
            .await
            .unwrap_or_else(|_| panic!("external write was not reconciled"));

        worker.abort();
        drop(watcher);
    }
}
